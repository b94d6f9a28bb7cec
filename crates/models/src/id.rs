use serde::{Deserialize, Serialize};

/// The API group and kind of an object, without any version. This is the
/// granularity at which storage decisions (file layout, namespacing) are made.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }

    /// Splits an `apiVersion` value like `apps/v1` or `v1` into its group
    /// and version halves. The core (empty) group has no slash.
    pub fn from_api_version(api_version: &str, kind: &str) -> (Self, String) {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        (GroupKind::new(group, kind), version.to_string())
    }
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// Identity of one object as found in a file: group, kind, the version it was
/// written at, its namespace (absent for cluster-scoped kinds) and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub group_kind: GroupKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectId {
    /// Projects the unversioned key under which the file finder tracks this
    /// object.
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            group_kind: self.group_kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.group_kind, ns, self.name),
            None => write!(f, "{}/{}", self.group_kind, self.name),
        }
    }
}

/// The unversioned form of [`ObjectId`], used as the file-finder key.
/// Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub group_kind: GroupKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(
        group_kind: GroupKind,
        namespace: Option<impl Into<String>>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group_kind,
            namespace: namespace.map(Into::into),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(group_kind: GroupKind, name: impl Into<String>) -> Self {
        Self {
            group_kind,
            namespace: None,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.group_kind, ns, self.name),
            None => write!(f, "{}/{}", self.group_kind, self.name),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn api_version_splits_into_group_and_version() {
        let (gk, version) = GroupKind::from_api_version("apps/v1", "Deployment");
        assert_eq!(gk, GroupKind::new("apps", "Deployment"));
        assert_eq!(version, "v1");

        let (gk, version) = GroupKind::from_api_version("v1", "ConfigMap");
        assert_eq!(gk, GroupKind::new("", "ConfigMap"));
        assert_eq!(version, "v1");
    }

    #[test]
    fn display_forms() {
        assert_eq!(GroupKind::new("", "ConfigMap").to_string(), "ConfigMap");
        assert_eq!(
            GroupKind::new("apps", "Deployment").to_string(),
            "Deployment.apps"
        );

        let key = ObjectKey::new(GroupKind::new("apps", "Deployment"), Some("prod"), "web");
        assert_eq!(key.to_string(), "Deployment.apps/prod/web");

        let key = ObjectKey::cluster_scoped(GroupKind::new("", "Namespace"), "prod");
        assert_eq!(key.to_string(), "Namespace/prod");
    }
}
