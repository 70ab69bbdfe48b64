//! Geolookup - Dataset watcher
//!
//! Loads the dataset at startup, falls back to the embedded default when the
//! configured file is unusable, and optionally watches that file for changes.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start()──▶ Starting ──(watch)──▶ Running ──stop()──▶ Stopping ──▶ Stopped
//!                         │
//!                         └──(one-shot)──▶ Stopped
//! ```
//!
//! The watch loop runs on a Tokio task. `notify` delivers events for the
//! file's parent directory through a channel; the loop waits at most one poll
//! interval per iteration and races a cancellation token, so `stop()` is
//! observed promptly. Loads and cache refreshes run on the blocking pool.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::ResultCache;
use crate::error::WatcherError;
use crate::provider::{DatasetSource, LookupProvider};
use crate::refresher::CacheRefresher;
use crate::registry::{DatasetHandle, DatasetRegistry};

/// Upper bound on how long the watch loop waits for an event per iteration.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Snapshot of the watcher's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchState {
    pub path: Option<PathBuf>,
    pub enabled: bool,
    pub running: bool,
}

/// Construction parameters for [`DatasetWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub dataset_id: String,
    /// Explicit dataset file. `None` serves the embedded dataset only.
    pub source_path: Option<PathBuf>,
    pub embedded: DatasetSource,
    pub poll_interval: Duration,
}

// ─── Loader ─────────────────────────────────────────────────────────────────

/// Blocking load/install procedure shared by startup and reloads.
struct Loader<P: LookupProvider> {
    dataset_id: String,
    source_path: Option<PathBuf>,
    embedded: DatasetSource,
    provider: Arc<P>,
    registry: Arc<DatasetRegistry<P::Resource>>,
    refresher: CacheRefresher<P>,
}

impl<P: LookupProvider> Loader<P> {
    /// Load the configured file, falling back to the embedded dataset when
    /// nothing is registered yet. Returns `true` if the file was installed.
    fn load(&self) -> bool {
        if let Some(path) = &self.source_path {
            let source = DatasetSource::File(path.clone());
            info!("Loading {} dataset from {}", self.dataset_id, source);
            match self.provider.open(&source) {
                Ok(resource) => {
                    self.install(resource, &source);
                    return true;
                }
                Err(e) => error!(
                    "Failed to load {} dataset from {}: {}",
                    self.dataset_id, source, e
                ),
            }
        }
        self.install_embedded_if_absent();
        false
    }

    /// Install a freshly loaded resource and refresh the cache against it
    /// when it replaced a previous handle.
    fn install(&self, resource: P::Resource, source: &DatasetSource) {
        let handle = Arc::new(DatasetHandle::new(
            self.dataset_id.as_str(),
            resource,
            source.to_string(),
        ));
        let previous = self.registry.put(Arc::clone(&handle));
        if previous.is_some() {
            self.refresher.refresh(&handle);
        }
        info!("{} dataset loaded from {}", self.dataset_id, source);
    }

    /// The embedded dataset never replaces a handle that is already serving.
    fn install_embedded_if_absent(&self) {
        if self.registry.get(&self.dataset_id).is_some() {
            return;
        }
        match self.provider.open(&self.embedded) {
            Ok(resource) => {
                warn!("Fallback to {} embedded dataset", self.dataset_id);
                self.registry.put(DatasetHandle::new(
                    self.dataset_id.as_str(),
                    resource,
                    self.embedded.to_string(),
                ));
                info!("{} embedded dataset loaded", self.dataset_id);
            }
            Err(e) => error!(
                "Failed to load embedded {} dataset: {}",
                self.dataset_id, e
            ),
        }
    }
}

// ─── Watcher ────────────────────────────────────────────────────────────────

struct WatchTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct DatasetWatcher<P: LookupProvider> {
    loader: Arc<Loader<P>>,
    poll_interval: Duration,
    phase: Mutex<WatchPhase>,
    enabled: AtomicBool,
    task: Mutex<Option<WatchTask>>,
}

impl<P: LookupProvider> DatasetWatcher<P> {
    pub fn new(
        options: WatcherOptions,
        provider: Arc<P>,
        registry: Arc<DatasetRegistry<P::Resource>>,
        cache: Arc<ResultCache<P::Value>>,
    ) -> Self {
        let refresher = CacheRefresher::new(Arc::clone(&provider), cache);
        Self {
            loader: Arc::new(Loader {
                dataset_id: options.dataset_id,
                source_path: options.source_path,
                embedded: options.embedded,
                provider,
                registry,
                refresher,
            }),
            poll_interval: options.poll_interval,
            phase: Mutex::new(WatchPhase::Stopped),
            enabled: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Perform the initial load and, if `watch` is set and a file is
    /// configured, start watching it.
    ///
    /// Load failures are logged, not returned: the watcher falls back to the
    /// embedded dataset. Errors are only returned for a second `start` while
    /// watching and for a watch that cannot be set up.
    pub async fn start(&self, watch: bool) -> Result<(), WatcherError> {
        {
            let mut phase = self.phase.lock();
            if *phase != WatchPhase::Stopped {
                return Err(WatcherError::AlreadyStarted);
            }
            *phase = WatchPhase::Starting;
        }
        self.enabled.store(watch, Ordering::SeqCst);

        self.reload().await;

        let task = match (&self.loader.source_path, watch) {
            (Some(path), true) => match self.spawn_watch_loop(path) {
                Ok(task) => Some(task),
                Err(e) => {
                    *self.phase.lock() = WatchPhase::Stopped;
                    return Err(e);
                }
            },
            (None, true) => {
                warn!(
                    "Watching requested but no {} dataset file is configured",
                    self.loader.dataset_id
                );
                None
            }
            (_, false) => None,
        };

        let mut phase = self.phase.lock();
        match task {
            Some(task) if *phase == WatchPhase::Starting => {
                *self.task.lock() = Some(task);
                *phase = WatchPhase::Running;
            }
            // stop() ran while we were loading and left the phase at Stopping
            Some(task) => {
                task.token.cancel();
                *phase = WatchPhase::Stopped;
            }
            None => *phase = WatchPhase::Stopped,
        }
        Ok(())
    }

    /// Run the load procedure once, off the async runtime.
    pub async fn reload(&self) {
        let loader = Arc::clone(&self.loader);
        if let Err(e) = tokio::task::spawn_blocking(move || loader.load()).await {
            error!("Dataset load task failed: {}", e);
        }
    }

    /// Stop the watch loop and release the file watch.
    ///
    /// Returns once the loop has exited, which takes at most one poll
    /// interval. Stopping a stopped watcher does nothing. A watcher that is
    /// still starting is left in `Stopping`; `start` completes the shutdown
    /// once its load returns.
    pub async fn stop(&self) {
        // Same lock order as `start`: phase, then task
        let task = {
            let mut phase = self.phase.lock();
            let task = self.task.lock().take();
            if task.is_some() || *phase == WatchPhase::Starting {
                *phase = WatchPhase::Stopping;
            }
            task
        };
        let Some(task) = task else {
            return;
        };

        info!("Closing {} dataset watcher", self.loader.dataset_id);
        task.token.cancel();
        if let Err(e) = task.handle.await {
            error!("Dataset watch loop ended abnormally: {}", e);
        }
        *self.phase.lock() = WatchPhase::Stopped;
        info!("{} dataset watcher closed", self.loader.dataset_id);
    }

    pub fn phase(&self) -> WatchPhase {
        *self.phase.lock()
    }

    pub fn state(&self) -> WatchState {
        WatchState {
            path: self.loader.source_path.clone(),
            enabled: self.enabled.load(Ordering::SeqCst),
            running: self.phase() == WatchPhase::Running,
        }
    }

    fn spawn_watch_loop(&self, path: &Path) -> Result<WatchTask, WatcherError> {
        let file_name = path
            .file_name()
            .map(OsStr::to_os_string)
            .ok_or_else(|| WatcherError::InvalidPath(path.display().to_string()))?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let watch_err = |source| WatcherError::Watch {
            path: dir.display().to_string(),
            source,
        };
        let mut fs_watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The receiver is gone once the loop exits
            let _ = tx.send(res);
        })
        .map_err(watch_err)?;
        fs_watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(watch_err)?;

        let token = CancellationToken::new();
        let handle = tokio::spawn(watch_loop(
            Arc::clone(&self.loader),
            fs_watcher,
            rx,
            file_name,
            token.clone(),
            self.poll_interval,
        ));
        info!("Watching {} for changes", path.display());

        Ok(WatchTask { token, handle })
    }
}

impl<P: LookupProvider> Drop for DatasetWatcher<P> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.token.cancel();
        }
    }
}

/// Does `event` announce new content for the watched file?
fn touches(event: &Event, file_name: &OsStr) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event.paths.iter().any(|p| p.file_name() == Some(file_name))
}

async fn watch_loop<P: LookupProvider>(
    loader: Arc<Loader<P>>,
    // Owned here so the OS watch is released when the loop exits
    _fs_watcher: RecommendedWatcher,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    file_name: OsString,
    token: CancellationToken,
    poll_interval: Duration,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = tokio::time::timeout(poll_interval, events.recv()) => next,
        };

        let event = match next {
            Err(_) => continue,
            Ok(None) => {
                warn!("Dataset watch channel closed");
                break;
            }
            Ok(Some(Err(e))) => {
                error!("Dataset watch error: {}", e);
                continue;
            }
            Ok(Some(Ok(event))) => event,
        };
        if !touches(&event, &file_name) {
            continue;
        }
        debug!("Dataset file changed: {:?}", event.kind);

        // A single write usually produces a burst of events; reload once
        while events.try_recv().is_ok() {}

        let loader = Arc::clone(&loader);
        if let Err(e) = tokio::task::spawn_blocking(move || loader.load()).await {
            error!("Dataset reload task failed: {}", e);
        }
    }
    debug!("Dataset watch loop exited");
}
