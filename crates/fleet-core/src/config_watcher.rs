use crossbeam_channel::{Receiver, RecvTimeoutError};
use notify::{
    event::{CreateKind, ModifyKind, RenameMode},
    EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config_store::{ConfigSource, ConfigStore};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the config-file watcher.
#[derive(Debug, Clone)]
pub struct ConfigWatcherConfig {
    pub path: PathBuf,
    /// Quiet period after the last change before reloading.
    pub debounce_ms: u64,
}

impl ConfigWatcherConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            debounce_ms: 200,
        }
    }
}

/// Returns `true` for event kinds that may have changed file contents.
/// Editors often write a temp file and rename it over the original, so
/// creates and renames count as well as data writes.
fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => true,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both | RenameMode::To | RenameMode::Any)) => {
            true
        }
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => true,
        _ => false,
    }
}

fn touches_file(event: &notify::Event, file_name: &OsString) -> bool {
    is_content_change(&event.kind)
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some_and(|n| n == file_name.as_os_str()))
}

/// Reloads a [`ConfigStore`] whenever its backing file changes on disk.
///
/// The parent directory is watched (non-recursively) and events are filtered
/// to the config file name. Each burst of events is debounced into a single
/// [`ConfigStore::reload`]; a rejected document is logged and the running
/// snapshot stays in effect.
pub struct ConfigWatcher {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ConfigWatcher {
    /// Start watching. The background thread exits when `cancel` fires.
    pub fn spawn(
        store: ConfigStore,
        config: ConfigWatcherConfig,
        cancel: CancellationToken,
    ) -> Result<Self, notify::Error> {
        let file_name = config
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| notify::Error::generic("config path has no file name"))?;
        let dir = match config.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher.watch(Path::new(&dir), RecursiveMode::NonRecursive)?;
        info!(path = %config.path.display(), "watching configuration file");

        let thread_cancel = cancel.clone();
        let handle = std::thread::Builder::new()
            .name("fleet-config-watcher".into())
            .spawn(move || {
                // The watcher must live as long as the loop.
                let _watcher: RecommendedWatcher = watcher;
                watch_loop(store, config, file_name, rx, thread_cancel);
            })
            .map_err(notify::Error::io)?;

        Ok(Self { handle, cancel })
    }

    /// Stop the watcher thread and wait for it to exit.
    pub fn stop(self) {
        self.cancel.cancel();
        if self.handle.join().is_err() {
            warn!("config watcher thread panicked");
        }
    }
}

fn watch_loop(
    store: ConfigStore,
    config: ConfigWatcherConfig,
    file_name: OsString,
    rx: Receiver<notify::Result<notify::Event>>,
    cancel: CancellationToken,
) {
    let debounce = Duration::from_millis(config.debounce_ms);
    let source = ConfigSource::File(config.path.clone());
    let mut pending_since: Option<Instant> = None;

    while !cancel.is_cancelled() {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) => {
                if touches_file(&event, &file_name) {
                    debug!(kind = ?event.kind, "configuration file changed");
                    pending_since = Some(Instant::now());
                }
            }
            Ok(Err(e)) => warn!(error = %e, "config watcher error"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if pending_since.is_some_and(|t| t.elapsed() >= debounce) {
            pending_since = None;
            // A rejected document is logged by reload() itself.
            if let Ok(snapshot) = store.reload(&source) {
                info!(version = snapshot.version, "configuration hot-reloaded from disk");
            }
        }
    }
    debug!("config watcher stopped");
}
