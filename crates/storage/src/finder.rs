use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use frames::{ContentType, FrameReader, FrameReaderOptions, FrameSource};
use models::{GroupKind, Namespacer, ObjectKey, ObjectMeta, PartialObject, VersionRef};

use crate::{walk, Error, Filesystem, FsView, PathExcluder, Result};

/// The outcome of one [`FileFinder::set_mapping`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MappingDiff {
    pub added: HashSet<ObjectKey>,
    pub removed: HashSet<ObjectKey>,
    pub duplicates: HashSet<ObjectKey>,
}

/// The outcome of one [`FileFinder::sync`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Keys of every file whose mapping or content changed.
    pub changed: HashSet<ObjectKey>,
    /// Keys found in more than one file.
    pub duplicates: HashSet<ObjectKey>,
}

/// The per-version bi-directional map between object identities and files.
///
/// Invariant: every key in `by_id` maps to a path whose `by_path` entry
/// contains the key, and a key held by two paths is in `duplicates` and is
/// never served to normal reads.
#[derive(Debug, Default, Clone)]
struct FileMapping {
    by_path: HashMap<PathBuf, HashSet<ObjectKey>>,
    by_id: HashMap<ObjectKey, PathBuf>,
    checksums: HashMap<PathBuf, String>,
    duplicates: HashSet<ObjectKey>,
}

impl FileMapping {
    fn set_mapping(&mut self, path: &Path, checksum: String, keys: HashSet<ObjectKey>) -> MappingDiff {
        let current = self.by_path.get(path).cloned().unwrap_or_default();
        let added: HashSet<_> = keys.difference(&current).cloned().collect();
        let removed: HashSet<_> = current.difference(&keys).cloned().collect();
        let mut duplicates = HashSet::new();

        self.by_path.insert(path.to_path_buf(), keys.clone());
        self.checksums.insert(path.to_path_buf(), checksum);

        for key in &removed {
            self.detach(key, path);
        }
        for key in &keys {
            match self.by_id.get(key) {
                Some(existing) if existing.as_path() != path => {
                    self.duplicates.insert(key.clone());
                    duplicates.insert(key.clone());
                }
                Some(_) => (),
                None => {
                    self.by_id.insert(key.clone(), path.to_path_buf());
                }
            }
        }

        MappingDiff {
            added,
            removed,
            duplicates,
        }
    }

    fn delete_mapping(&mut self, path: &Path) -> HashSet<ObjectKey> {
        let keys = self.by_path.remove(path).unwrap_or_default();
        self.checksums.remove(path);
        for key in &keys {
            self.detach(key, path);
        }
        keys
    }

    fn move_file(&mut self, old: &Path, new: &Path) {
        if let Some(keys) = self.by_path.remove(old) {
            self.by_path.insert(new.to_path_buf(), keys);
        }
        if let Some(sum) = self.checksums.remove(old) {
            self.checksums.insert(new.to_path_buf(), sum);
        }
        for path in self.by_id.values_mut() {
            if path.as_path() == old {
                *path = new.to_path_buf();
            }
        }
    }

    /// Drops `key`'s association with `path`, promoting a sole surviving
    /// mapping out of duplicate state.
    fn detach(&mut self, key: &ObjectKey, path: &Path) {
        if self.by_id.get(key).map(PathBuf::as_path) == Some(path) {
            self.by_id.remove(key);
        }
        let mut survivors: Vec<&PathBuf> = self
            .by_path
            .iter()
            .filter(|(p, keys)| p.as_path() != path && keys.contains(key))
            .map(|(p, _)| p)
            .collect();
        survivors.sort();

        match survivors.len() {
            0 => {
                self.duplicates.remove(key);
            }
            1 => {
                self.duplicates.remove(key);
                self.by_id.insert(key.clone(), survivors[0].clone());
            }
            _ => {
                if !self.by_id.contains_key(key) {
                    self.by_id.insert(key.clone(), survivors[0].clone());
                }
            }
        }
    }
}

/// Maintains, per [`VersionRef`], the mapping between object identities and
/// the files that hold them, resolved by parsing each file's leading
/// metadata.
pub struct FileFinder {
    fs: Arc<dyn Filesystem>,
    namespacer: Arc<dyn Namespacer>,
    excluder: Arc<dyn PathExcluder>,
    versions: RwLock<HashMap<VersionRef, Arc<RwLock<FileMapping>>>>,
}

impl FileFinder {
    pub fn new(
        fs: Arc<dyn Filesystem>,
        namespacer: Arc<dyn Namespacer>,
        excluder: Arc<dyn PathExcluder>,
    ) -> Self {
        Self {
            fs,
            namespacer,
            excluder,
            versions: RwLock::new(HashMap::new()),
        }
    }

    pub fn filesystem(&self) -> &Arc<dyn Filesystem> {
        &self.fs
    }

    pub fn namespacer(&self) -> &Arc<dyn Namespacer> {
        &self.namespacer
    }

    fn mapping_for(&self, version: &VersionRef) -> Arc<RwLock<FileMapping>> {
        if let Some(mapping) = self.versions.read().expect("finder poisoned").get(version) {
            return mapping.clone();
        }
        self.versions
            .write()
            .expect("finder poisoned")
            .entry(version.clone())
            .or_default()
            .clone()
    }

    /// The canonical file of `key`, or `None` when unknown. Keys in
    /// duplicate conflict are refused.
    pub fn object_path(&self, view: &FsView, key: &ObjectKey) -> Result<Option<PathBuf>> {
        let mapping = self.mapping_for(&view.version);
        let guard = mapping.read().expect("mapping poisoned");
        if guard.duplicates.contains(key) {
            return Err(Error::DuplicateTracking(key.clone()));
        }
        Ok(guard.by_id.get(key).cloned())
    }

    /// All object identities stored in `path`.
    pub fn objects_at(&self, view: &FsView, path: &Path) -> HashSet<ObjectKey> {
        let mapping = self.mapping_for(&view.version);
        let guard = mapping.read().expect("mapping poisoned");
        guard.by_path.get(path).cloned().unwrap_or_default()
    }

    pub fn cached_checksum(&self, view: &FsView, path: &Path) -> Option<String> {
        let mapping = self.mapping_for(&view.version);
        let guard = mapping.read().expect("mapping poisoned");
        guard.checksums.get(path).cloned()
    }

    /// Keys of `group_kind`, optionally restricted to one namespace. Keys in
    /// duplicate conflict are omitted.
    pub fn list_keys(
        &self,
        view: &FsView,
        group_kind: &GroupKind,
        namespace: Option<&str>,
    ) -> HashSet<ObjectKey> {
        let mapping = self.mapping_for(&view.version);
        let guard = mapping.read().expect("mapping poisoned");
        guard
            .by_id
            .keys()
            .filter(|key| &key.group_kind == group_kind)
            .filter(|key| namespace.is_none() || key.namespace.as_deref() == namespace)
            .filter(|key| !guard.duplicates.contains(key))
            .cloned()
            .collect()
    }

    /// All namespaces in which objects of `group_kind` exist.
    pub fn list_namespaces(&self, view: &FsView, group_kind: &GroupKind) -> HashSet<String> {
        let mapping = self.mapping_for(&view.version);
        let guard = mapping.read().expect("mapping poisoned");
        guard
            .by_id
            .keys()
            .filter(|key| &key.group_kind == group_kind)
            .filter_map(|key| key.namespace.clone())
            .collect()
    }

    /// Atomically replaces the key set of `path`, returning what was added
    /// and removed and which keys are now in duplicate conflict.
    pub fn set_mapping(
        &self,
        view: &FsView,
        path: &Path,
        checksum: String,
        keys: HashSet<ObjectKey>,
    ) -> MappingDiff {
        let mapping = self.mapping_for(&view.version);
        let mut guard = mapping.write().expect("mapping poisoned");
        guard.set_mapping(path, checksum, keys)
    }

    /// Removes every key stored in `path`, promoting surviving duplicates.
    pub fn delete_mapping(&self, view: &FsView, path: &Path) -> HashSet<ObjectKey> {
        let mapping = self.mapping_for(&view.version);
        let mut guard = mapping.write().expect("mapping poisoned");
        guard.delete_mapping(path)
    }

    /// Renames `old` to `new` in all maps; the checksum travels along.
    pub fn move_file(&self, view: &FsView, old: &Path, new: &Path) {
        let mapping = self.mapping_for(&view.version);
        let mut guard = mapping.write().expect("mapping poisoned");
        guard.move_file(old, new);
    }

    /// Makes `head` start from a snapshot of `base`'s mappings; subsequent
    /// writes to either diverge independently.
    pub fn register_version_ref(&self, head: &VersionRef, base: Option<&VersionRef>) {
        let snapshot = base
            .map(|base| {
                let mapping = self.mapping_for(base);
                let guard = mapping.read().expect("mapping poisoned");
                guard.clone()
            })
            .unwrap_or_default();
        self.versions
            .write()
            .expect("finder poisoned")
            .insert(head.clone(), Arc::new(RwLock::new(snapshot)));
    }

    /// Forgets the mappings of `version`, typically after a transaction.
    pub fn drop_version_ref(&self, version: &VersionRef) {
        self.versions
            .write()
            .expect("finder poisoned")
            .remove(version);
    }

    /// Walks the filesystem at the view's version and rebuilds the mapping:
    /// files are identified by extension, object identities extracted by
    /// decoding frames, and unchanged checksums short-circuit re-parsing.
    #[tracing::instrument(level = "debug", skip(self, view))]
    pub async fn sync(&self, view: &FsView) -> Result<SyncOutcome> {
        let files = walk(&*self.fs, view, &*self.excluder).await?;
        let documents: Vec<PathBuf> = files
            .into_iter()
            .filter(|path| content_type_of(path).is_some())
            .collect();

        let mapping = self.mapping_for(&view.version);
        let cached: HashMap<PathBuf, String> = {
            let guard = mapping.read().expect("mapping poisoned");
            guard.checksums.clone()
        };

        let mut updates: Vec<(PathBuf, String, HashSet<ObjectKey>)> = Vec::new();
        for path in &documents {
            let checksum = self.fs.checksum(view, path).await?;
            if cached.get(path) == Some(&checksum) {
                continue;
            }
            let bytes = self.fs.read_file(view, path).await?;
            let content_type = content_type_of(path).expect("filtered above");
            match scan_objects(&*self.namespacer, &content_type, &bytes) {
                Ok(keys) => updates.push((path.clone(), checksum, keys)),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable file");
                }
            }
        }

        let mut outcome = SyncOutcome::default();
        let mut guard = mapping.write().expect("mapping poisoned");

        let present: HashSet<&PathBuf> = documents.iter().collect();
        let vanished: Vec<PathBuf> = guard
            .by_path
            .keys()
            .filter(|path| !present.contains(path))
            .cloned()
            .collect();
        for path in vanished {
            outcome.changed.extend(guard.delete_mapping(&path));
        }

        for (path, checksum, keys) in updates {
            // A re-parsed file reports all of its keys as changed, carried
            // ones included: the content behind them is new.
            let previous = guard.by_path.get(path.as_path()).cloned().unwrap_or_default();
            let _ = guard.set_mapping(&path, checksum, keys.clone());
            outcome.changed.extend(previous);
            outcome.changed.extend(keys);
        }
        outcome.duplicates = guard.duplicates.clone();
        drop(guard);

        tracing::debug!(
            changed = outcome.changed.len(),
            duplicates = outcome.duplicates.len(),
            "sync complete",
        );
        Ok(outcome)
    }
}

/// The content type a file's extension implies, or `None` for files the
/// finder does not track.
pub fn content_type_of(path: &Path) -> Option<ContentType> {
    match path.extension()?.to_str()? {
        "yaml" | "yml" => Some(ContentType::YAML),
        "json" => Some(ContentType::JSON),
        _ => None,
    }
}

/// Extracts the object identities of every document in `bytes`. Kinds the
/// namespacer knows are validated against the namespacing rule; unknown
/// kinds are tracked as-is.
pub fn scan_objects(
    namespacer: &dyn Namespacer,
    content_type: &ContentType,
    bytes: &[u8],
) -> Result<HashSet<ObjectKey>> {
    let reader = FrameReader::new(
        content_type.clone(),
        FrameSource::from_bytes(bytes.to_vec()),
        FrameReaderOptions::default(),
    )?;

    let mut keys = HashSet::new();
    while let Some(frame) = reader.read_frame()? {
        let partial: PartialObject = if *content_type == ContentType::JSON {
            serde_json::from_slice(&frame).map_err(models::Error::Json)?
        } else {
            serde_yaml::from_slice(&frame).map_err(frames::Error::Yaml)?
        };
        let key = partial.key();
        if namespacer.is_namespaced(&key.group_kind).is_some() {
            models::validate_namespacing(namespacer, &key)?;
        }
        keys.insert(key);
    }
    Ok(keys)
}
