use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use mirsal_types::backend::{Subscription, SubscriptionHandle};
use mirsal_types::events::MessageInserted;

/// Fans out message-insert notifications to room-filtered subscriptions.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<ChangeFeedInner>,
}

struct ChangeFeedInner {
    /// Every subscription sees every insert and filters by room
    broadcast_tx: broadcast::Sender<MessageInserted>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(ChangeFeedInner { broadcast_tx }),
        }
    }

    /// Publish an insert. Returns how many subscriptions received it.
    pub fn publish(&self, inserted: MessageInserted) -> usize {
        self.inner.broadcast_tx.send(inserted).unwrap_or(0)
    }

    /// Open a subscription for inserts into `room_id`.
    ///
    /// The broadcast receiver is registered before this returns, so every
    /// insert published afterwards reaches the subscription.
    pub fn subscribe(&self, room_id: Uuid) -> Subscription {
        let mut broadcast_rx = self.inner.broadcast_tx.subscribe();
        let (tx, inserts) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let handle = SubscriptionHandle::new(room_id, token.clone());
        let subscription_id = handle.id();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    result = broadcast_rx.recv() => {
                        let inserted = match result {
                            Ok(inserted) => inserted,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Subscription {} lagged by {} notifications", subscription_id, n);
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };

                        if inserted.room_id != room_id {
                            continue;
                        }

                        trace!("Subscription {} forwarding message {}", subscription_id, inserted.id);
                        if tx.send(inserted).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Subscription {} for room {} closed", subscription_id, room_id);
        });

        Subscription { handle, inserts }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}
