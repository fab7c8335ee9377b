use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use mirsal_client::coordinator::DEFAULT_MESSAGE_WINDOW;

pub struct Config {
    pub db_path: PathBuf,
    pub settings_path: PathBuf,
    /// `None` lets the stored setting or the built-in default decide.
    pub prefers_dark: Option<bool>,
    pub message_window: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = lookup("MIRSAL_DB_PATH").unwrap_or_else(|| "mirsal.db".into());
        let settings_path =
            lookup("MIRSAL_SETTINGS_PATH").unwrap_or_else(|| "mirsal-settings.json".into());

        let prefers_dark = match lookup("MIRSAL_PREFERS_DARK").as_deref() {
            None | Some("") => None,
            Some("1" | "true") => Some(true),
            Some("0" | "false") => Some(false),
            Some(other) => bail!("MIRSAL_PREFERS_DARK must be true or false, got {:?}", other),
        };

        let message_window = match lookup("MIRSAL_MESSAGE_WINDOW") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("MIRSAL_MESSAGE_WINDOW is not a number: {:?}", raw))?,
            None => DEFAULT_MESSAGE_WINDOW,
        };

        Ok(Self {
            db_path: PathBuf::from(db_path),
            settings_path: PathBuf::from(settings_path),
            prefers_dark,
            message_window,
        })
    }
}
