use std::future::Future;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use mirsal_types::backend::SubscriptionHandle;

/// Lifecycle of the coordinator's live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubscriptionState {
    Unsubscribed,
    /// A subscribe call is in flight and not yet acknowledged.
    Subscribing { room_id: Uuid },
    Active { room_id: Uuid },
}

/// The one acknowledged subscription the coordinator owns, together with
/// the task delivering its notifications. Dropping it tears both down.
pub(crate) struct LiveSubscription {
    handle: SubscriptionHandle,
    generation: u64,
    task: JoinHandle<()>,
}

impl LiveSubscription {
    pub(crate) fn spawn<F>(handle: SubscriptionHandle, generation: u64, delivery: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(
            "Subscription {} active for room {} (generation {})",
            handle.id(),
            handle.room_id(),
            generation
        );
        Self {
            handle,
            generation,
            task: tokio::spawn(delivery),
        }
    }

    pub(crate) fn room_id(&self) -> Uuid {
        self.handle.room_id()
    }

    pub(crate) fn id(&self) -> Uuid {
        self.handle.id()
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        debug!(
            "Tearing down subscription {} for room {} (generation {})",
            self.handle.id(),
            self.handle.room_id(),
            self.generation
        );
        self.handle.unsubscribe();
        self.task.abort();
    }
}
