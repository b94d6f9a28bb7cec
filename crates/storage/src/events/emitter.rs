use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::Watcher;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::reducer::reduce;
use super::{FileEvent, FileEventKind, RawFileEvent, RawKind};
use crate::{Error, PathExcluder, Result};

#[derive(Debug, Clone)]
pub struct EmitterOptions {
    /// How long raw events for one path are collected before dispatch; also
    /// the window in which rename halves may pair up.
    pub batch_timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for EmitterOptions {
    fn default() -> Self {
        Self {
            batch_timeout: Duration::from_secs(1),
            channel_capacity: 4096,
        }
    }
}

/// Watches a directory tree and emits debounced [`FileEvent`]s with paths
/// relative to the watched root. One subscriber at a time.
pub struct FileEventEmitter {
    suspended: Arc<Mutex<HashSet<PathBuf>>>,
    subscriber: Mutex<Option<mpsc::Receiver<FileEvent>>>,
    driver: tokio::task::JoinHandle<()>,
    _watcher: Option<notify::RecommendedWatcher>,
}

impl FileEventEmitter {
    /// Watches `root` recursively through the OS notification facility.
    pub fn watch(
        root: &Path,
        excluder: Arc<dyn PathExcluder>,
        options: EmitterOptions,
    ) -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        let watch_root = root.to_path_buf();
        let handler_root = watch_root.clone();
        let mut watcher = notify::RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for raw in map_notify_event(&handler_root, &*excluder, event) {
                        let _ = raw_tx.send(raw);
                    }
                }
                Err(err) => tracing::warn!(error = %err, "file watch error"),
            },
            notify::Config::default(),
        )
        .map_err(|source| Error::Watch {
            path: watch_root.clone(),
            source,
        })?;
        watcher
            .watch(&watch_root, notify::RecursiveMode::Recursive)
            .map_err(|source| Error::Watch {
                path: watch_root,
                source,
            })?;

        let mut emitter = Self::from_raw_source(raw_rx, options);
        emitter._watcher = Some(watcher);
        Ok(emitter)
    }

    /// An emitter fed from an injected raw-event stream instead of the OS.
    /// The deterministic entry point for tests and alternate backends.
    pub fn from_raw_source(
        raw_rx: mpsc::UnboundedReceiver<RawFileEvent>,
        options: EmitterOptions,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(options.channel_capacity);
        let suspended = Arc::new(Mutex::new(HashSet::new()));
        let driver = tokio::spawn(drive(
            raw_rx,
            event_tx,
            suspended.clone(),
            options.batch_timeout,
        ));
        Self {
            suspended,
            subscriber: Mutex::new(Some(event_rx)),
            driver,
            _watcher: None,
        }
    }

    /// Claims the single event subscription.
    pub fn subscribe(&self) -> Result<mpsc::Receiver<FileEvent>> {
        self.subscriber
            .lock()
            .expect("emitter poisoned")
            .take()
            .ok_or(Error::TooManyWatches)
    }

    /// One-shot suppression: the next emitted event for `path` is swallowed.
    /// Used by the event storage to hide its own writes.
    pub fn suspend(&self, path: &Path) {
        self.suspended
            .lock()
            .expect("emitter poisoned")
            .insert(path.to_path_buf());
    }
}

impl Drop for FileEventEmitter {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

struct Batch {
    events: Vec<RawFileEvent>,
    deadline: Instant,
}

struct PendingMove {
    path: PathBuf,
    kind: RawKind,
    deadline: Instant,
}

async fn drive(
    mut raw_rx: mpsc::UnboundedReceiver<RawFileEvent>,
    event_tx: mpsc::Sender<FileEvent>,
    suspended: Arc<Mutex<HashSet<PathBuf>>>,
    batch_timeout: Duration,
) {
    let mut batches: HashMap<PathBuf, Batch> = HashMap::new();
    let mut cookies: HashMap<usize, PendingMove> = HashMap::new();
    let mut open = true;

    while open || !batches.is_empty() || !cookies.is_empty() {
        let next_deadline = batches
            .values()
            .map(|b| b.deadline)
            .chain(cookies.values().map(|c| c.deadline))
            .min();

        tokio::select! {
            raw = raw_rx.recv(), if open => {
                match raw {
                    Some(event) => {
                        batches
                            .entry(event.path.clone())
                            .or_insert_with(|| Batch {
                                events: Vec::new(),
                                deadline: Instant::now() + batch_timeout,
                            })
                            .events
                            .push(event);
                    }
                    None => open = false,
                }
            }
            _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                if next_deadline.is_some() =>
            {
                let now = Instant::now();

                let due: Vec<PathBuf> = batches
                    .iter()
                    .filter(|(_, b)| b.deadline <= now)
                    .map(|(p, _)| p.clone())
                    .collect();
                for path in due {
                    let mut batch = batches.remove(&path).expect("batch vanished");
                    reduce(&mut batch.events);
                    for event in batch.events {
                        if let Some(out) =
                            route(&mut cookies, event, now + batch_timeout)
                        {
                            emit(&event_tx, &suspended, out).await;
                        }
                    }
                }

                let expired: Vec<usize> = cookies
                    .iter()
                    .filter(|(_, p)| p.deadline <= now)
                    .map(|(c, _)| *c)
                    .collect();
                for cookie in expired {
                    let pending = cookies.remove(&cookie).expect("cookie vanished");
                    emit(&event_tx, &suspended, degrade(pending.kind, pending.path)).await;
                }
            }
        }
    }
}

/// Sends a reduced raw event onward: writes and deletes map directly, rename
/// halves wait in the cookie map for their partner.
fn route(
    cookies: &mut HashMap<usize, PendingMove>,
    event: RawFileEvent,
    deadline: Instant,
) -> Option<FileEvent> {
    match event.kind {
        RawKind::CloseWrite => Some(FileEvent {
            path: event.path,
            kind: FileEventKind::Modify,
        }),
        RawKind::Delete => Some(FileEvent {
            path: event.path,
            kind: FileEventKind::Delete,
        }),
        RawKind::MovedFrom | RawKind::MovedTo => {
            let Some(cookie) = event.cookie else {
                return Some(degrade(event.kind, event.path));
            };
            match cookies.remove(&cookie) {
                Some(partner) => match (partner.kind, event.kind) {
                    (RawKind::MovedFrom, RawKind::MovedTo) => Some(FileEvent {
                        path: event.path,
                        kind: FileEventKind::Move {
                            old_path: partner.path,
                        },
                    }),
                    (RawKind::MovedTo, RawKind::MovedFrom) => Some(FileEvent {
                        path: partner.path,
                        kind: FileEventKind::Move {
                            old_path: event.path,
                        },
                    }),
                    // Two halves of the same direction cannot pair; degrade
                    // the old one and let the new one wait.
                    _ => {
                        let degraded = degrade(partner.kind, partner.path);
                        cookies.insert(
                            cookie,
                            PendingMove {
                                path: event.path,
                                kind: event.kind,
                                deadline,
                            },
                        );
                        Some(degraded)
                    }
                },
                None => {
                    cookies.insert(
                        cookie,
                        PendingMove {
                            path: event.path,
                            kind: event.kind,
                            deadline,
                        },
                    );
                    None
                }
            }
        }
    }
}

/// A rename half whose partner never arrived: a lone `MovedFrom` is a
/// delete, a lone `MovedTo` is a modify.
fn degrade(kind: RawKind, path: PathBuf) -> FileEvent {
    let kind = match kind {
        RawKind::MovedFrom => FileEventKind::Delete,
        _ => FileEventKind::Modify,
    };
    FileEvent { path, kind }
}

async fn emit(
    event_tx: &mpsc::Sender<FileEvent>,
    suspended: &Arc<Mutex<HashSet<PathBuf>>>,
    event: FileEvent,
) {
    if suspended
        .lock()
        .expect("emitter poisoned")
        .remove(&event.path)
    {
        tracing::trace!(path = %event.path.display(), "suppressed suspended event");
        return;
    }
    tracing::trace!(path = %event.path.display(), kind = ?event.kind, "file event");
    if event_tx.send(event).await.is_err() {
        tracing::debug!("event subscriber dropped");
    }
}

static SYNTHETIC_COOKIE: AtomicUsize = AtomicUsize::new(usize::MAX / 2);

fn map_notify_event(
    root: &Path,
    excluder: &dyn PathExcluder,
    event: notify::Event,
) -> Vec<RawFileEvent> {
    use notify::event::{AccessKind, AccessMode, CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};

    let cookie = event.tracker();
    let mapped: Vec<(RawKind, &PathBuf, Option<usize>)> = match &event.kind {
        EventKind::Create(CreateKind::Folder) => return Vec::new(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|p| (RawKind::CloseWrite, p, None))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .map(|p| (RawKind::MovedFrom, p, cookie))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .map(|p| (RawKind::MovedTo, p, cookie))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            // Both halves in one event; pair them through a synthetic cookie
            // when the backend supplies none.
            let cookie =
                cookie.or_else(|| Some(SYNTHETIC_COOKIE.fetch_add(1, Ordering::Relaxed)));
            vec![
                (RawKind::MovedFrom, &event.paths[0], cookie),
                (RawKind::MovedTo, &event.paths[1], cookie),
            ]
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|p| (RawKind::CloseWrite, p, None))
            .collect(),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => event
            .paths
            .iter()
            .map(|p| (RawKind::CloseWrite, p, None))
            .collect(),
        EventKind::Access(_) => return Vec::new(),
        EventKind::Remove(RemoveKind::Folder) => return Vec::new(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| (RawKind::Delete, p, None))
            .collect(),
        EventKind::Any | EventKind::Other => return Vec::new(),
    };

    let mut out = Vec::new();
    for (kind, abs, cookie) in mapped {
        let Ok(rel) = abs.strip_prefix(root) else {
            continue;
        };
        if rel.as_os_str().is_empty() || excluder.is_excluded(rel) {
            continue;
        }
        // Directory events are dropped; removed paths cannot be statted and
        // pass through as files.
        if abs.is_dir() {
            continue;
        }
        out.push(RawFileEvent {
            path: rel.to_path_buf(),
            kind,
            cookie,
        });
    }
    out
}
