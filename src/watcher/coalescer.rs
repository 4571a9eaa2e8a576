//! Per-path debounce, de-duplication and retry between raw filesystem
//! notifications and index mutations.
//!
//! Each path moves through `Idle -> Debouncing -> Processing`, and from there
//! back to `Idle` (settled or dropped) or into `Retrying`. Every new event for
//! a debouncing path restarts its timer, so a burst of saves collapses into a
//! single settle. Processing looks at the file as it is *at settle time*: an
//! existing regular file is re-read and upserted, a missing one is removed.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{FileEvent, FileEventKind, FileStat};
use crate::error::{Result, VaultError};
use crate::index::NoteIndex;
use crate::note::normalize_path;
use crate::scanner::read_note;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(10_000);

#[derive(Debug, Clone)]
pub struct CoalescerConfig {
    pub debounce: Duration,
    pub retry_backoff: Duration,
    /// Retries after the first failed attempt before the path is dropped
    pub max_retries: u32,
    /// How long an applied outcome suppresses identical notifications
    pub dedup_window: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_retries: DEFAULT_MAX_RETRIES,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

/// Where settled paths are applied. Called on a blocking thread.
pub trait SettleTarget: Send + Sync + 'static {
    /// Re-read `path` and insert or replace its record.
    fn apply_upsert(&self, path: &Path) -> Result<()>;
    /// Forget `path`; a path that was never indexed is not an error.
    fn apply_remove(&self, path: &Path);
}

/// Applies settled paths to a `NoteIndex`.
pub struct IndexTarget {
    index: Arc<NoteIndex>,
    max_file_size: u64,
}

impl IndexTarget {
    pub fn new(index: Arc<NoteIndex>, max_file_size: u64) -> Self {
        Self {
            index,
            max_file_size,
        }
    }
}

impl SettleTarget for IndexTarget {
    fn apply_upsert(&self, path: &Path) -> Result<()> {
        match read_note(path, self.max_file_size) {
            Ok(note) => {
                self.index.upsert(note);
                Ok(())
            }
            Err(VaultError::TooLarge { size, limit, .. }) => {
                // Same exclusion as the initial scan
                log::warn!(
                    "[coalescer] {:?} is {} bytes (limit {}), removing from index",
                    path,
                    size,
                    limit
                );
                self.index.remove_path(path);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn apply_remove(&self, path: &Path) {
        self.index.remove_path(path);
    }
}

/// What the last successful settle left behind for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Present(FileStat),
    Absent,
}

#[derive(Debug, Clone, Copy)]
struct AppliedMarker {
    outcome: Outcome,
    at: Instant,
}

impl AppliedMarker {
    /// True when `event` describes exactly the state that was already applied.
    fn covers(&self, event: &FileEvent, now: Instant, window: Duration) -> bool {
        if now.duration_since(self.at) >= window {
            return false;
        }
        match (self.outcome, event.kind) {
            (Outcome::Absent, FileEventKind::Unlink) => true,
            (Outcome::Present(stat), FileEventKind::Add | FileEventKind::Change) => {
                event.observed.map_or(true, |observed| observed == stat)
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
enum PathState {
    Debouncing {
        deadline: Instant,
        intent: FileEventKind,
    },
    Processing {
        successor: Option<FileEvent>,
    },
    Retrying {
        deadline: Instant,
        intent: FileEventKind,
        retries: u32,
    },
}

struct Settled {
    path: PathBuf,
    intent: FileEventKind,
    retries: u32,
    outcome: Result<Outcome>,
}

/// Look at the file now and apply whatever it is.
fn settle_path<T: SettleTarget>(target: &T, path: &Path) -> Result<Outcome> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => {
            let stat = FileStat::from_metadata(&metadata);
            target.apply_upsert(path)?;
            Ok(Outcome::Present(stat))
        }
        Ok(_) => {
            target.apply_remove(path);
            Ok(Outcome::Absent)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            target.apply_remove(path);
            Ok(Outcome::Absent)
        }
        Err(e) => Err(VaultError::io(path, e)),
    }
}

struct Worker<T: SettleTarget> {
    config: CoalescerConfig,
    target: Arc<T>,
    states: HashMap<PathBuf, PathState>,
    applied: HashMap<PathBuf, AppliedMarker>,
    done_tx: mpsc::UnboundedSender<Settled>,
}

impl<T: SettleTarget> Worker<T> {
    fn on_event(&mut self, event: FileEvent) {
        let now = Instant::now();
        let path = normalize_path(&event.path);
        let debounce_deadline = now + self.config.debounce;

        match self.states.get_mut(&path) {
            Some(PathState::Processing { successor }) => {
                *successor = Some(event);
            }
            Some(PathState::Debouncing { deadline, intent }) => {
                *deadline = debounce_deadline;
                *intent = event.kind;
            }
            Some(PathState::Retrying { .. }) => {
                log::debug!("[coalescer] New event supersedes retry for {:?}", path);
                self.states.insert(
                    path,
                    PathState::Debouncing {
                        deadline: debounce_deadline,
                        intent: event.kind,
                    },
                );
            }
            None => {
                if self.is_duplicate(&path, &event, now) {
                    log::debug!("[coalescer] Dropping duplicate {:?} for {:?}", event.kind, path);
                    return;
                }
                self.states.insert(
                    path,
                    PathState::Debouncing {
                        deadline: debounce_deadline,
                        intent: event.kind,
                    },
                );
            }
        }
    }

    fn is_duplicate(&self, path: &Path, event: &FileEvent, now: Instant) -> bool {
        self.applied
            .get(path)
            .map(|marker| marker.covers(event, now, self.config.dedup_window))
            .unwrap_or(false)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.states
            .values()
            .filter_map(|state| match state {
                PathState::Debouncing { deadline, .. } | PathState::Retrying { deadline, .. } => {
                    Some(*deadline)
                }
                PathState::Processing { .. } => None,
            })
            .min()
    }

    /// Start processing every path whose timer has expired.
    fn fire_due(&mut self) {
        let now = Instant::now();
        let window = self.config.dedup_window;
        self.applied.retain(|_, marker| now.duration_since(marker.at) < window);

        let due: Vec<(PathBuf, FileEventKind, u32)> = self
            .states
            .iter()
            .filter_map(|(path, state)| match state {
                PathState::Debouncing { deadline, intent } if *deadline <= now => {
                    Some((path.clone(), *intent, 0))
                }
                PathState::Retrying {
                    deadline,
                    intent,
                    retries,
                } if *deadline <= now => Some((path.clone(), *intent, *retries)),
                _ => None,
            })
            .collect();

        for (path, intent, retries) in due {
            self.states
                .insert(path.clone(), PathState::Processing { successor: None });
            self.spawn_processing(path, intent, retries);
        }
    }

    fn spawn_processing(&self, path: PathBuf, intent: FileEventKind, retries: u32) {
        let target = Arc::clone(&self.target);
        let done_tx = self.done_tx.clone();

        tokio::spawn(async move {
            let blocking_path = path.clone();
            let outcome = tokio::task::spawn_blocking(move || settle_path(&*target, &blocking_path))
                .await
                .unwrap_or_else(|e| Err(VaultError::Task(e.to_string())));
            // The worker may already be gone after shutdown
            let _ = done_tx.send(Settled {
                path,
                intent,
                retries,
                outcome,
            });
        });
    }

    fn on_settled(&mut self, settled: Settled) {
        let now = Instant::now();
        let Settled {
            path,
            intent,
            retries,
            outcome,
        } = settled;

        let successor = match self.states.remove(&path) {
            Some(PathState::Processing { successor }) => successor,
            _ => None,
        };

        match outcome {
            Ok(outcome) => {
                log::debug!("[coalescer] Settled {:?} ({:?}) as {:?}", path, intent, outcome);
                self.applied
                    .insert(path.clone(), AppliedMarker { outcome, at: now });
            }
            Err(e) if successor.is_none() && e.is_transient() && retries < self.config.max_retries => {
                log::warn!(
                    "[coalescer] Processing {:?} failed (retry {}/{}): {}",
                    path,
                    retries + 1,
                    self.config.max_retries,
                    e
                );
                self.states.insert(
                    path,
                    PathState::Retrying {
                        deadline: now + self.config.retry_backoff,
                        intent,
                        retries: retries + 1,
                    },
                );
                return;
            }
            Err(e) if successor.is_some() => {
                log::debug!("[coalescer] Processing {:?} failed, newer event pending: {}", path, e);
            }
            Err(e) => {
                log::error!(
                    "[coalescer] Dropping {:?} after {} attempt(s): {}",
                    path,
                    retries + 1,
                    e
                );
            }
        }

        // A successor starts a fresh debounce unless it repeats what was just applied
        if let Some(event) = successor {
            if self.is_duplicate(&path, &event, now) {
                log::debug!("[coalescer] Dropping duplicate {:?} for {:?}", event.kind, path);
                return;
            }
            self.states.insert(
                path,
                PathState::Debouncing {
                    deadline: now + self.config.debounce,
                    intent: event.kind,
                },
            );
        }
    }

    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<FileEvent>,
        mut done_rx: mpsc::UnboundedReceiver<Settled>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        log::debug!("[coalescer] Worker started");
        let mut events_open = true;

        loop {
            let next = self.next_deadline();
            tokio::select! {
                _ = &mut shutdown => break,
                maybe = events.recv(), if events_open => match maybe {
                    Some(event) => self.on_event(event),
                    None => events_open = false,
                },
                Some(settled) = done_rx.recv() => self.on_settled(settled),
                _ = wait_until(next) => self.fire_due(),
            }
        }

        log::debug!(
            "[coalescer] Worker stopped, discarding {} pending path(s)",
            self.states.len()
        );
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Handle to a running coalescer worker.
pub struct CoalescerHandle {
    events: mpsc::UnboundedSender<FileEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CoalescerHandle {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn<T: SettleTarget>(config: CoalescerConfig, target: Arc<T>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = Worker {
            config,
            target,
            states: HashMap::new(),
            applied: HashMap::new(),
            done_tx,
        };
        let task = tokio::spawn(worker.run(events_rx, done_rx, shutdown_rx));

        Self {
            events: events_tx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<FileEvent> {
        self.events.clone()
    }

    /// Queue one event. Returns false once the worker has stopped.
    pub fn send(&self, event: FileEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Stop the worker and wait for it. Pending timers are discarded.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("[coalescer] Worker ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CoalescerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
