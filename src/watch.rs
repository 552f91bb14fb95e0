//! Rebuild the program when its layer files change on disk.
//!
//! [`SourceWatcher::spawn`] watches the kernel root with `notify`, collapses
//! bursts of events into one rebuild after a quiet period, and calls
//! [`Kernel::rebuild`]. A layer that fails to compile leaves the last good
//! program live; the failure is logged and reported on the optional events
//! channel.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::WatchConfig;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, RebuildReport};
use crate::paths::KernelPaths;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle to a running watcher. Dropping it stops the watch.
pub struct SourceWatcher {
    watcher: Option<RecommendedWatcher>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SourceWatcher {
    /// Start watching the root of `kernel`.
    ///
    /// Every rebuild result, including `Unchanged` for edits that did not
    /// alter any layer text, is sent to `events` when given.
    pub fn spawn(
        kernel: &Arc<Kernel>,
        config: &WatchConfig,
        events: Option<mpsc::Sender<RebuildReport>>,
    ) -> KernelResult<Self> {
        let paths = kernel.paths().cloned().ok_or_else(|| KernelError::Watch {
            message: "kernel has no root directory to watch".into(),
        })?;

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(tx).map_err(watch_error)?;
        watcher
            .watch(&paths.root, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = Debouncer {
            kernel: Arc::downgrade(kernel),
            paths,
            debounce: config.debounce(),
            events,
            shutdown: Arc::clone(&shutdown),
        };
        let handle = thread::Builder::new()
            .name("akh-watch".into())
            .spawn(move || worker.run(rx))
            .map_err(|e| KernelError::Watch {
                message: format!("failed to spawn watch thread: {e}"),
            })?;

        tracing::info!(debounce_ms = config.debounce_ms, "watching layer files");
        Ok(Self {
            watcher: Some(watcher),
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stop watching and wait for the worker to exit.
    pub fn stop(mut self) {
        self.shutdown_now();
    }

    fn shutdown_now(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Dropping the watcher closes the event channel.
        self.watcher.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SourceWatcher {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

struct Debouncer {
    kernel: Weak<Kernel>,
    paths: KernelPaths,
    debounce: Duration,
    events: Option<mpsc::Sender<RebuildReport>>,
    shutdown: Arc<AtomicBool>,
}

impl Debouncer {
    fn run(self, rx: mpsc::Receiver<notify::Result<Event>>) {
        let mut pending: Option<Instant> = None;

        while !self.shutdown.load(Ordering::SeqCst) {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(event)) => {
                    if self.is_relevant(&event) {
                        pending = Some(Instant::now());
                    }
                }
                Ok(Err(e)) => tracing::warn!("watch error: {e}"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let due = pending.is_some_and(|at| at.elapsed() >= self.debounce);
            if due {
                pending = None;
                if !self.rebuild() {
                    break;
                }
            }
        }
        tracing::debug!("watch thread exiting");
    }

    fn is_relevant(&self, event: &Event) -> bool {
        !event.kind.is_access() && event.paths.iter().any(|p| self.is_layer(p))
    }

    fn is_layer(&self, path: &Path) -> bool {
        self.paths.is_layer_file(path)
    }

    /// Returns false once the kernel is gone.
    fn rebuild(&self) -> bool {
        let Some(kernel) = self.kernel.upgrade() else {
            return false;
        };
        match kernel.rebuild() {
            Ok(report) => {
                if let RebuildReport::Failed(diagnostic) = &report {
                    tracing::warn!(%diagnostic, "layer edit rejected");
                }
                if let Some(events) = &self.events {
                    let _ = events.send(report);
                }
            }
            Err(e) => tracing::error!("rebuild failed: {e}"),
        }
        true
    }
}

fn watch_error(e: notify::Error) -> KernelError {
    KernelError::Watch {
        message: e.to_string(),
    }
}
