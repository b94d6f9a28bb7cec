use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{FileEvent, FileEventKind, FileEventEmitter, ObjectEvent, ObjectEventKind};
use crate::finder::{content_type_of, scan_objects};
use crate::{Error, FileFinder, Filesystem, FsView, Result};

#[derive(Debug, Clone)]
pub struct EventStorageOptions {
    /// Run a full sync at startup and emit one `Sync` event per object.
    pub initial_sync: bool,
    pub channel_capacity: usize,
}

impl Default for EventStorageOptions {
    fn default() -> Self {
        Self {
            initial_sync: true,
            channel_capacity: 4096,
        }
    }
}

/// Translates file events into object events against the file finder, and
/// routes its own writes through the emitter's suspension so they do not
/// echo back.
pub struct EventStorage {
    finder: Arc<FileFinder>,
    view: FsView,
    emitter: Arc<FileEventEmitter>,
    task: tokio::task::JoinHandle<()>,
}

impl EventStorage {
    /// Subscribes to the emitter and starts the translation task. Returns
    /// the storage handle and the single object-event stream.
    pub async fn start(
        finder: Arc<FileFinder>,
        view: FsView,
        emitter: Arc<FileEventEmitter>,
        options: EventStorageOptions,
    ) -> Result<(Self, mpsc::Receiver<ObjectEvent>)> {
        let file_events = emitter.subscribe()?;
        let (tx, rx) = mpsc::channel(options.channel_capacity);

        if options.initial_sync {
            let outcome = finder.sync(&view).await?;
            let mut changed: Vec<_> = outcome.changed.into_iter().collect();
            changed.sort();
            for key in changed {
                let _ = tx
                    .send(ObjectEvent {
                        key,
                        kind: ObjectEventKind::Sync,
                    })
                    .await;
            }
            for key in outcome.duplicates {
                let _ = tx
                    .send(ObjectEvent {
                        key: key.clone(),
                        kind: ObjectEventKind::Error(
                            Error::DuplicateTracking(key).to_string(),
                        ),
                    })
                    .await;
            }
        }

        let task = tokio::spawn(run(finder.clone(), view.clone(), file_events, tx));
        Ok((
            Self {
                finder,
                view,
                emitter,
                task,
            },
            rx,
        ))
    }

    pub fn finder(&self) -> &Arc<FileFinder> {
        &self.finder
    }

    pub fn view(&self) -> &FsView {
        &self.view
    }

    /// Writes a file, keeping the mapping current and suppressing the echo
    /// of the resulting filesystem event.
    pub async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.emitter.suspend(path);
        let fs = self.finder.filesystem().clone();
        fs.write_file(&self.view, path, data).await?;

        if let Some(content_type) = content_type_of(path) {
            let checksum = fs.checksum(&self.view, path).await?;
            let keys = scan_objects(&**self.finder.namespacer(), &content_type, data)?;
            self.finder.set_mapping(&self.view, path, checksum, keys);
        }
        Ok(())
    }

    /// Removes a file and its mappings, suppressing the event echo.
    pub async fn remove(&self, path: &Path) -> Result<()> {
        self.emitter.suspend(path);
        let fs = self.finder.filesystem().clone();
        fs.remove(&self.view, path).await?;
        self.finder.delete_mapping(&self.view, path);
        Ok(())
    }
}

impl Drop for EventStorage {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    finder: Arc<FileFinder>,
    view: FsView,
    mut file_events: mpsc::Receiver<FileEvent>,
    tx: mpsc::Sender<ObjectEvent>,
) {
    while let Some(event) = file_events.recv().await {
        if let Err(err) = handle(&finder, &view, &tx, event).await {
            tracing::warn!(error = %err, "failed to apply file event");
        }
    }
}

async fn handle(
    finder: &FileFinder,
    view: &FsView,
    tx: &mpsc::Sender<ObjectEvent>,
    event: FileEvent,
) -> Result<()> {
    tracing::debug!(path = %event.path.display(), kind = ?event.kind, "object event source");
    match event.kind {
        FileEventKind::Delete => {
            for key in finder.delete_mapping(view, &event.path) {
                send(tx, key, ObjectEventKind::Delete).await;
            }
            Ok(())
        }
        FileEventKind::Move { old_path } => {
            finder.move_file(view, &old_path, &event.path);
            modified(finder, view, tx, &event.path).await
        }
        FileEventKind::Modify => modified(finder, view, tx, &event.path).await,
    }
}

async fn modified(
    finder: &FileFinder,
    view: &FsView,
    tx: &mpsc::Sender<ObjectEvent>,
    path: &Path,
) -> Result<()> {
    let Some(content_type) = content_type_of(path) else {
        return Ok(());
    };
    let fs = finder.filesystem().clone();

    let checksum = match fs.checksum(view, path).await {
        Ok(checksum) => checksum,
        // The file raced away between the event and now.
        Err(Error::NotFound(_)) => {
            for key in finder.delete_mapping(view, path) {
                send(tx, key, ObjectEventKind::Delete).await;
            }
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    if finder.cached_checksum(view, path).as_deref() == Some(checksum.as_str()) {
        return Ok(());
    }

    let bytes = fs.read_file(view, path).await?;
    let keys = scan_objects(&**finder.namespacer(), &content_type, &bytes)?;

    let previous = finder.objects_at(view, path);
    let diff = finder.set_mapping(view, path, checksum, keys.clone());

    for key in &diff.added {
        if !diff.duplicates.contains(key) {
            send(tx, key.clone(), ObjectEventKind::Create).await;
        }
    }
    for key in keys.intersection(&previous) {
        if !diff.duplicates.contains(key) {
            send(tx, key.clone(), ObjectEventKind::Update).await;
        }
    }
    for key in &diff.removed {
        send(tx, key.clone(), ObjectEventKind::Delete).await;
    }
    for key in diff.duplicates {
        send(
            tx,
            key.clone(),
            ObjectEventKind::Error(Error::DuplicateTracking(key).to_string()),
        )
        .await;
    }
    Ok(())
}

async fn send(tx: &mpsc::Sender<ObjectEvent>, key: models::ObjectKey, kind: ObjectEventKind) {
    if tx.send(ObjectEvent { key, kind }).await.is_err() {
        tracing::debug!("object event subscriber dropped");
    }
}
