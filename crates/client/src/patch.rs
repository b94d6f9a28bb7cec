use serde::Serialize;

use crate::{Error, Result};

/// A typed patch. Strategic-merge patches are applied with merge-patch
/// semantics here: real strategic merge needs per-type patch metadata, which
/// is a type-scheme concern outside the core.
#[derive(Debug, Clone)]
pub enum Patch {
    StrategicMerge(serde_json::Value),
    Merge(serde_json::Value),
    Json(json_patch::Patch),
    /// A discriminator this client does not understand; surfaced as
    /// [`Error::UnsupportedPatchType`] at apply time.
    Other { kind: String },
}

impl Patch {
    /// A merge patch replacing the object with `desired` field by field.
    pub fn merge_from(desired: &impl Serialize) -> Result<Self> {
        let value = serde_json::to_value(desired).map_err(models::Error::Json)?;
        Ok(Patch::Merge(value))
    }

    /// An RFC 6902 patch from its JSON representation.
    pub fn json(operations: serde_json::Value) -> Result<Self> {
        let patch = serde_json::from_value(operations).map_err(models::Error::Json)?;
        Ok(Patch::Json(patch))
    }

    pub(crate) fn apply(&self, document: &mut serde_json::Value) -> Result<()> {
        match self {
            Patch::StrategicMerge(data) | Patch::Merge(data) => {
                json_patch::merge(document, data);
                Ok(())
            }
            Patch::Json(patch) => {
                json_patch::patch(document, patch)?;
                Ok(())
            }
            Patch::Other { kind } => Err(Error::UnsupportedPatchType(kind.clone())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_overwrites_and_removes() {
        let mut doc = json!({"a": 1, "b": {"c": 2, "d": 3}});
        let patch = Patch::Merge(json!({"a": 10, "b": {"c": null}}));
        patch.apply(&mut doc).unwrap();
        assert_eq!(doc, json!({"a": 10, "b": {"d": 3}}));
    }

    #[test]
    fn json_patch_operations_apply_in_order() {
        let mut doc = json!({"spec": {"replicas": 3}});
        let patch = Patch::json(json!([
            {"op": "replace", "path": "/spec/replicas", "value": 5},
            {"op": "add", "path": "/spec/paused", "value": true},
        ]))
        .unwrap();
        patch.apply(&mut doc).unwrap();
        assert_eq!(doc, json!({"spec": {"replicas": 5, "paused": true}}));
    }

    #[test]
    fn unknown_discriminators_are_refused() {
        let mut doc = json!({});
        let err = Patch::Other {
            kind: "application/apply-patch+yaml".into(),
        }
        .apply(&mut doc)
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedPatchType(_)));
    }
}
