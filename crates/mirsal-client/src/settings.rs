//! Client-local appearance settings: the cosmetic theme and dark mode.
//!
//! Values live in a flat string key/value store under [`THEME_KEY`] and
//! [`DARK_MODE_KEY`]. Reading resolves stored value, then system
//! preference, then the built-in default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{info, warn};

use mirsal_types::models::Theme;

pub const THEME_KEY: &str = "mirsal-theme";
pub const DARK_MODE_KEY: &str = "mirsal-dark-mode";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to create settings directory at {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write settings file to {path:?}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Flat string storage, the shape of a browser's local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// A JSON object on disk, rewritten whole on every `set`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Load `path`, starting empty if it is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = Self::load_from_disk(&path);
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> BTreeMap<String, String> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => {
                info!("Settings file not found at {:?}, using defaults", path);
                return BTreeMap::new();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring malformed settings file {:?}: {}", path, e);
            BTreeMap::new()
        })
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let content = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, content).map_err(|e| SettingsError::WriteFile {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        let mut next = values.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(&next)?;
        *values = next;
        Ok(())
    }
}

/// Resolved appearance, ready to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appearance {
    pub theme: Theme,
    pub dark_mode: bool,
}

impl Appearance {
    /// Style classes for the document root.
    pub fn classes(&self) -> Vec<String> {
        let mut classes = vec![self.theme.class_name()];
        if self.dark_mode {
            classes.push("dark".to_string());
        }
        classes
    }
}

pub struct ThemeSettings<S> {
    store: S,
    /// Host's "prefers dark" signal; `None` when it has none.
    system_prefers_dark: Option<bool>,
}

impl<S: KeyValueStore> ThemeSettings<S> {
    pub fn new(store: S, system_prefers_dark: Option<bool>) -> Self {
        Self {
            store,
            system_prefers_dark,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn theme(&self) -> Theme {
        match self.store.get(THEME_KEY) {
            Some(raw) => raw.parse::<Theme>().unwrap_or_else(|e| {
                warn!("{}, using {}", e, Theme::default());
                Theme::default()
            }),
            None => Theme::default(),
        }
    }

    pub fn dark_mode(&self) -> bool {
        match self.store.get(DARK_MODE_KEY) {
            Some(raw) => raw == "true",
            None => self.system_prefers_dark.unwrap_or(false),
        }
    }

    pub fn appearance(&self) -> Appearance {
        Appearance {
            theme: self.theme(),
            dark_mode: self.dark_mode(),
        }
    }

    pub fn set_theme(&self, theme: Theme) -> Result<(), SettingsError> {
        self.store.set(THEME_KEY, theme.as_str())
    }

    pub fn set_dark_mode(&self, dark: bool) -> Result<(), SettingsError> {
        self.store.set(DARK_MODE_KEY, if dark { "true" } else { "false" })
    }

    /// Flip dark mode and return the new value.
    pub fn toggle_dark_mode(&self) -> Result<bool, SettingsError> {
        let dark = !self.dark_mode();
        self.set_dark_mode(dark)?;
        Ok(dark)
    }
}
