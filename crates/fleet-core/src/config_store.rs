//! Versioned, atomically swappable configuration shared by every worker.
//!
//! Readers call [`ConfigStore::current`], which clones an `Arc` under a read
//! lock held only for that clone. Writers go through [`ConfigStore::reload`] /
//! [`ConfigStore::replace`]: the new document is parsed and validated first,
//! and only a valid document is swapped in under the swap mutex with
//! `version + 1`. Subscribers hold a
//! `watch` receiver, so a slow subscriber sees the latest snapshot rather than
//! a backlog.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{Config, ConfigError};

/// Where a configuration document comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A JSON file on disk.
    File(PathBuf),
    /// JSON text (e.g. a request body).
    Json(String),
    /// An already-parsed JSON value.
    Value(serde_json::Value),
}

impl ConfigSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ConfigSource::File(path.into())
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "file:{}", path.display()),
            ConfigSource::Json(_) => write!(f, "inline-json"),
            ConfigSource::Value(_) => write!(f, "inline-value"),
        }
    }
}

/// An immutable, versioned configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
    pub config: Config,
}

struct Inner {
    current: RwLock<Arc<ConfigSnapshot>>,
    swap_lock: Mutex<()>,
    notify: watch::Sender<Arc<ConfigSnapshot>>,
}

/// Single owner of the running configuration. Cheap to clone.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("version", &self.version())
            .finish()
    }
}

impl ConfigStore {
    /// Create a store holding `config` as version 1.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let snapshot = Arc::new(ConfigSnapshot {
            version: 1,
            loaded_at: Utc::now(),
            config,
        });
        let (notify, _) = watch::channel(snapshot.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                current: RwLock::new(snapshot),
                swap_lock: Mutex::new(()),
                notify,
            }),
        })
    }

    /// Load `source` and create a store from it.
    pub fn open(source: &ConfigSource) -> Result<Self, ConfigError> {
        let config = Self::load(source)?;
        info!(source = %source, "configuration loaded");
        Self::new(config)
    }

    /// Parse and validate `source` without touching any store.
    pub fn load(source: &ConfigSource) -> Result<Config, ConfigError> {
        match source {
            ConfigSource::File(path) => Config::load_from(path),
            ConfigSource::Json(text) => Config::from_json_str(text),
            ConfigSource::Value(value) => Config::from_value(value.clone()),
        }
    }

    /// The snapshot currently in effect. Never waits on parsing or
    /// validation, only on the pointer swap itself.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn version(&self) -> u64 {
        self.current().version
    }

    /// Load `source` and swap it in. On error the running snapshot is kept
    /// and the error is handed back to the caller.
    pub fn reload(&self, source: &ConfigSource) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        match Self::load(source) {
            Ok(config) => Ok(self.swap(config)),
            Err(e) => {
                warn!(source = %source, error = %e, version = self.version(), "configuration reload rejected");
                Err(e)
            }
        }
    }

    /// Validate `config` and swap it in.
    pub fn replace(&self, config: Config) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        if let Err(e) = config.validate() {
            warn!(error = %e, version = self.version(), "configuration replace rejected");
            return Err(e);
        }
        Ok(self.swap(config))
    }

    /// Receive every successful swap; intermediate versions may be skipped
    /// if the receiver falls behind.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigSnapshot>> {
        self.inner.notify.subscribe()
    }

    fn swap(&self, config: Config) -> Arc<ConfigSnapshot> {
        let _guard = self
            .inner
            .swap_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let version = self.current().version + 1;
        let snapshot = Arc::new(ConfigSnapshot {
            version,
            loaded_at: Utc::now(),
            config,
        });
        *self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        self.inner.notify.send_replace(snapshot.clone());
        info!(version, "configuration swapped in");
        snapshot
    }
}
