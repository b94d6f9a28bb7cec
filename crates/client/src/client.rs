use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use models::{validate_namespacing, GroupKind, Namespacer, Object, ObjectKey, ObjectMeta};
use storage::FsView;

use crate::backend::decode_frame;
use crate::patch::Patch;
use crate::{Backend, Error, ListOptions, Result};

/// How many objects are decoded concurrently during a list.
const LIST_CONCURRENCY: usize = 8;

/// Typed CRUD over a pluggable [`Backend`]. Reads may run concurrently; the
/// transactional layer serializes writes per branch.
#[derive(Clone)]
pub struct Client {
    backend: Arc<dyn Backend>,
    namespacer: Arc<dyn Namespacer>,
}

impl Client {
    pub fn new(backend: Arc<dyn Backend>, namespacer: Arc<dyn Namespacer>) -> Self {
        Self {
            backend,
            namespacer,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Decodes the object stored under `key` into `O`. Metadata-only types
    /// ([`models::PartialObject`]) decode the same way; they are only
    /// refused on write paths.
    pub async fn get<O: Object>(&self, view: &FsView, key: &ObjectKey) -> Result<O> {
        let (frame, content_type) = self.backend.read(view, key).await?;
        decode_frame(&content_type, &frame)
    }

    /// Lists objects of `group_kind`, applying filters. Key-level filters
    /// narrow the candidate set before objects are decoded concurrently.
    pub async fn list<O: Object>(
        &self,
        view: &FsView,
        group_kind: &GroupKind,
        options: &ListOptions,
    ) -> Result<Vec<O>> {
        options.validate()?;

        let mut keys: Vec<ObjectKey> = self
            .backend
            .list_keys(view, group_kind, options.namespace())?
            .into_iter()
            .filter(|key| options.matches_key(key))
            .collect();
        keys.sort();

        let objects: Vec<O> = stream::iter(keys)
            .map(|key| {
                let client = self.clone();
                let view = view.clone();
                async move { client.get::<O>(&view, &key).await }
            })
            .buffer_unordered(LIST_CONCURRENCY)
            .try_collect()
            .await?;

        let mut objects: Vec<O> = objects
            .into_iter()
            .filter(|obj| options.matches_object(obj))
            .collect();
        objects.sort_by_key(|obj| obj.key());
        Ok(objects)
    }

    /// Stores a new object; fails if the identity already exists.
    pub async fn create<O: Object>(&self, view: &FsView, object: &O) -> Result<()> {
        let key = self.writable_key::<O>(object)?;
        if self.backend.exists(view, &key).await? {
            return Err(Error::AlreadyExists(key));
        }
        let data = serde_json::to_vec(object).map_err(models::Error::Json)?;
        self.backend.write(view, &key, &data).await
    }

    /// Replaces an existing object; fails if the identity is unknown.
    pub async fn update<O: Object>(&self, view: &FsView, object: &O) -> Result<()> {
        let key = self.writable_key::<O>(object)?;
        if !self.backend.exists(view, &key).await? {
            return Err(Error::NotFound(key));
        }
        let data = serde_json::to_vec(object).map_err(models::Error::Json)?;
        self.backend.write(view, &key, &data).await
    }

    /// Loads the current object, applies `patch` to its document, persists
    /// the result and returns the patched object.
    pub async fn patch<O: Object>(
        &self,
        view: &FsView,
        key: &ObjectKey,
        patch: &Patch,
    ) -> Result<O> {
        if O::is_partial() {
            return Err(Error::PartialObject);
        }

        let (frame, content_type) = self.backend.read(view, key).await?;
        let mut document: serde_json::Value = decode_frame(&content_type, &frame)?;
        patch.apply(&mut document)?;

        let data = serde_json::to_vec(&document).map_err(models::Error::Json)?;
        self.backend.write(view, key, &data).await?;
        decode_frame(&content_type, &data)
    }

    pub async fn delete(&self, view: &FsView, key: &ObjectKey) -> Result<()> {
        self.backend.delete(view, key).await
    }

    /// Deletes every object of `group_kind` matching the filters.
    pub async fn delete_all_of(
        &self,
        view: &FsView,
        group_kind: &GroupKind,
        options: &ListOptions,
    ) -> Result<usize> {
        let objects: Vec<models::PartialObject> = self.list(view, group_kind, options).await?;
        let mut deleted = 0;
        for object in objects {
            self.backend.delete(view, &object.key()).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    fn writable_key<O: Object>(&self, object: &O) -> Result<ObjectKey> {
        if O::is_partial() {
            return Err(Error::PartialObject);
        }
        let key = object.key();
        validate_namespacing(&*self.namespacer, &key)?;
        Ok(key)
    }
}
