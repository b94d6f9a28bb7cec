use std::collections::HashSet;

use crate::{GroupKind, ObjectKey};

/// Oracle deciding whether a kind's objects live in namespaces. Injected by
/// the embedding process; the core has no built-in kind registry.
pub trait Namespacer: Send + Sync {
    /// `None` means the kind is unknown to this namespacer.
    fn is_namespaced(&self, gk: &GroupKind) -> Option<bool>;
}

/// Rejects a namespaced object without a namespace, and a cluster-scoped
/// object with one.
pub fn validate_namespacing(
    namespacer: &dyn Namespacer,
    key: &ObjectKey,
) -> Result<(), crate::Error> {
    let namespaced = namespacer
        .is_namespaced(&key.group_kind)
        .ok_or_else(|| crate::Error::UnknownKind(key.group_kind.clone()))?;

    let has_namespace = key.namespace.as_deref().is_some_and(|ns| !ns.is_empty());
    if namespaced != has_namespace {
        return Err(crate::Error::InvalidNamespacing {
            kind: key.group_kind.clone(),
            namespace: key.namespace.clone(),
        });
    }
    Ok(())
}

/// A namespacer over two fixed sets of kinds. Anything not listed is unknown.
#[derive(Debug, Default, Clone)]
pub struct FixedNamespacer {
    namespaced: HashSet<GroupKind>,
    cluster_scoped: HashSet<GroupKind>,
}

impl FixedNamespacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespaced(mut self, gk: GroupKind) -> Self {
        self.namespaced.insert(gk);
        self
    }

    pub fn with_cluster_scoped(mut self, gk: GroupKind) -> Self {
        self.cluster_scoped.insert(gk);
        self
    }
}

impl Namespacer for FixedNamespacer {
    fn is_namespaced(&self, gk: &GroupKind) -> Option<bool> {
        if self.namespaced.contains(gk) {
            Some(true)
        } else if self.cluster_scoped.contains(gk) {
            Some(false)
        } else {
            None
        }
    }
}
