use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use frames::{
    ContentType, FrameReader, FrameReaderOptions, FrameSink, FrameSource, FrameWriter,
    FrameWriterOptions, SanitizeOptions,
};
use models::{GroupKind, ObjectKey, ObjectMeta, PartialObject, VersionRef};
use serde::de::DeserializeOwned;
use storage::{content_type_of, scan_objects, FileFinder, FsView};

use crate::{Error, Result};

/// The storage a [`crate::Client`] runs against: identity-addressed frames
/// plus listing. The production implementation is [`FileBackend`]; tests
/// swap in an in-memory one.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Reads the single frame holding `key`, plus its content type.
    async fn read(&self, view: &FsView, key: &ObjectKey) -> Result<(Bytes, ContentType)>;

    async fn exists(&self, view: &FsView, key: &ObjectKey) -> Result<bool>;

    /// Creates or replaces the frame holding `key` with `data` (a JSON
    /// document; YAML files accept it as the subset it is).
    async fn write(&self, view: &FsView, key: &ObjectKey, data: &[u8]) -> Result<()>;

    async fn delete(&self, view: &FsView, key: &ObjectKey) -> Result<()>;

    fn list_keys(
        &self,
        view: &FsView,
        group_kind: &GroupKind,
        namespace: Option<&str>,
    ) -> Result<HashSet<ObjectKey>>;

    fn list_namespaces(&self, view: &FsView, group_kind: &GroupKind) -> Result<HashSet<String>>;

    /// Makes `head` a snapshot of `base` for subsequent lookups.
    fn register_version(&self, head: &VersionRef, base: Option<&VersionRef>);
}

/// Decodes one sanitized frame into `T` per content type.
pub(crate) fn decode_frame<T: DeserializeOwned>(
    content_type: &ContentType,
    bytes: &[u8],
) -> Result<T> {
    if *content_type == ContentType::JSON {
        serde_json::from_slice(bytes).map_err(|err| Error::Model(models::Error::Json(err)))
    } else {
        serde_yaml::from_slice(bytes).map_err(|err| Error::Frames(frames::Error::Yaml(err)))
    }
}

#[derive(Debug, Clone)]
pub struct FileBackendOptions {
    /// Content type for files created for new objects.
    pub default_content_type: ContentType,
    pub sanitize: SanitizeOptions,
}

impl Default for FileBackendOptions {
    fn default() -> Self {
        Self {
            default_content_type: ContentType::YAML,
            sanitize: SanitizeOptions::default(),
        }
    }
}

/// Stores each object as one frame in a file resolved through the
/// [`FileFinder`]. Files may hold several documents; writes rewrite the
/// file frame by frame, passing the replaced frame as the sanitizer's prior
/// so comments and style survive the update.
pub struct FileBackend {
    finder: Arc<FileFinder>,
    options: FileBackendOptions,
}

impl FileBackend {
    pub fn new(finder: Arc<FileFinder>, options: FileBackendOptions) -> Self {
        Self { finder, options }
    }

    pub fn finder(&self) -> &Arc<FileFinder> {
        &self.finder
    }

    /// Layout for new objects: `<namespace>/<kind>/<name>.<ext>`, with the
    /// namespace level omitted for cluster-scoped kinds.
    fn path_for_new(&self, key: &ObjectKey) -> PathBuf {
        let ext = if self.options.default_content_type == ContentType::JSON {
            "json"
        } else {
            "yaml"
        };
        let kind = key.group_kind.kind.to_lowercase();
        let file = format!("{}.{ext}", key.name);
        match &key.namespace {
            Some(ns) => PathBuf::from(ns).join(kind).join(file),
            None => PathBuf::from(kind).join(file),
        }
    }

    fn reader_options(&self) -> FrameReaderOptions {
        FrameReaderOptions {
            sanitize: self.options.sanitize.clone(),
            ..Default::default()
        }
    }

    /// All frames of a file, each paired with the identity it declares.
    fn split_frames(&self, content_type: &ContentType, bytes: &[u8]) -> Result<Vec<(Bytes, ObjectKey)>> {
        let reader = FrameReader::new(
            content_type.clone(),
            FrameSource::from_bytes(bytes.to_vec()),
            self.reader_options(),
        )?;
        let mut out = Vec::new();
        while let Some(frame) = reader.read_frame()? {
            let partial: PartialObject = decode_frame(content_type, &frame)?;
            out.push((frame, partial.key()));
        }
        Ok(out)
    }

    fn content_type(&self, path: &std::path::Path) -> ContentType {
        content_type_of(path).unwrap_or_else(|| self.options.default_content_type.clone())
    }

    /// Serializes frames back into file bytes via the framing writer.
    fn assemble(
        &self,
        content_type: &ContentType,
        parts: &[(Bytes, Option<&[u8]>)],
    ) -> Result<Vec<u8>> {
        let sink = VecSink::default();
        let writer = FrameWriter::new(
            content_type.clone(),
            FrameSink::new(sink.clone()),
            FrameWriterOptions {
                sanitize: self.options.sanitize.clone(),
                ..Default::default()
            },
        )?;
        for (frame, prior) in parts {
            writer.write_frame_with_prior(frame, *prior)?;
        }
        Ok(sink.take())
    }

    /// Reflects `bytes` at `path` into the finder's mapping.
    async fn remap(
        &self,
        view: &FsView,
        path: &std::path::Path,
        content_type: &ContentType,
        bytes: &[u8],
    ) -> Result<()> {
        let fs = self.finder.filesystem().clone();
        let checksum = fs.checksum(view, path).await?;
        let keys = scan_objects(&**self.finder.namespacer(), content_type, bytes)?;
        self.finder.set_mapping(view, path, checksum, keys);
        Ok(())
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn read(&self, view: &FsView, key: &ObjectKey) -> Result<(Bytes, ContentType)> {
        let Some(path) = self.finder.object_path(view, key)? else {
            return Err(Error::NotFound(key.clone()));
        };
        let fs = self.finder.filesystem().clone();
        let bytes = fs.read_file(view, &path).await?;
        let content_type = self.content_type(&path);

        for (frame, frame_key) in self.split_frames(&content_type, &bytes)? {
            if frame_key == *key {
                return Ok((frame, content_type));
            }
        }
        // The mapping was stale: the file no longer holds the object.
        Err(Error::NotFound(key.clone()))
    }

    async fn exists(&self, view: &FsView, key: &ObjectKey) -> Result<bool> {
        Ok(self.finder.object_path(view, key)?.is_some())
    }

    async fn write(&self, view: &FsView, key: &ObjectKey, data: &[u8]) -> Result<()> {
        let fs = self.finder.filesystem().clone();
        let path = match self.finder.object_path(view, key)? {
            Some(path) => path,
            None => self.path_for_new(key),
        };
        let content_type = self.content_type(&path);

        let existing = if fs.exists(view, &path).await? {
            let bytes = fs.read_file(view, &path).await?;
            self.split_frames(&content_type, &bytes)?
        } else {
            Vec::new()
        };

        let mut parts: Vec<(Bytes, Option<&[u8]>)> = Vec::new();
        let mut replaced = false;
        for (frame, frame_key) in &existing {
            if *frame_key == *key {
                parts.push((Bytes::copy_from_slice(data), Some(frame.as_ref())));
                replaced = true;
            } else {
                parts.push((frame.clone(), None));
            }
        }
        if !replaced {
            parts.push((Bytes::copy_from_slice(data), None));
        }

        let out = self.assemble(&content_type, &parts)?;
        fs.write_file(view, &path, &out).await?;
        self.remap(view, &path, &content_type, &out).await
    }

    async fn delete(&self, view: &FsView, key: &ObjectKey) -> Result<()> {
        let Some(path) = self.finder.object_path(view, key)? else {
            return Err(Error::NotFound(key.clone()));
        };
        let fs = self.finder.filesystem().clone();
        let content_type = self.content_type(&path);
        let bytes = fs.read_file(view, &path).await?;

        let remaining: Vec<(Bytes, Option<&[u8]>)> = self
            .split_frames(&content_type, &bytes)?
            .into_iter()
            .filter(|(_, frame_key)| frame_key != key)
            .map(|(frame, _)| (frame, None))
            .collect();

        if remaining.is_empty() {
            fs.remove(view, &path).await?;
            self.finder.delete_mapping(view, &path);
            return Ok(());
        }
        let out = self.assemble(&content_type, &remaining)?;
        fs.write_file(view, &path, &out).await?;
        self.remap(view, &path, &content_type, &out).await
    }

    fn list_keys(
        &self,
        view: &FsView,
        group_kind: &GroupKind,
        namespace: Option<&str>,
    ) -> Result<HashSet<ObjectKey>> {
        Ok(self.finder.list_keys(view, group_kind, namespace))
    }

    fn list_namespaces(&self, view: &FsView, group_kind: &GroupKind) -> Result<HashSet<String>> {
        Ok(self.finder.list_namespaces(view, group_kind))
    }

    fn register_version(&self, head: &VersionRef, base: Option<&VersionRef>) {
        self.finder.register_version_ref(head, base);
    }
}

/// A shared growable byte sink for the framing writer.
#[derive(Clone, Default)]
struct VecSink(Arc<Mutex<Vec<u8>>>);

impl VecSink {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.lock().expect("sink poisoned"))
    }
}

impl Write for VecSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("sink poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
