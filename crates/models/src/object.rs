use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{GroupKind, ObjectId, ObjectKey};

/// Read access to the identifying metadata every stored object carries.
pub trait ObjectMeta {
    fn api_version(&self) -> &str;
    fn kind(&self) -> &str;
    fn name(&self) -> &str;
    fn namespace(&self) -> Option<&str>;
    fn uid(&self) -> Option<&str>;
    fn labels(&self) -> BTreeMap<String, String>;

    fn group_kind(&self) -> GroupKind {
        GroupKind::from_api_version(self.api_version(), self.kind()).0
    }

    fn id(&self) -> ObjectId {
        let (group_kind, version) = GroupKind::from_api_version(self.api_version(), self.kind());
        ObjectId {
            group_kind,
            version: Some(version),
            namespace: self.namespace().map(str::to_string),
            name: self.name().to_string(),
        }
    }

    fn key(&self) -> ObjectKey {
        self.id().key()
    }
}

/// A storable object. Implementations must encode/decode losslessly through
/// serde, with the exception of [`PartialObject`] which decodes metadata only
/// and is therefore refused by all write paths.
pub trait Object: ObjectMeta + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// True for metadata-only decodes which must never be written back.
    fn is_partial() -> bool {
        false
    }
}

fn str_field<'v>(value: &'v serde_json::Value, field: &str) -> Option<&'v str> {
    value.get(field).and_then(|v| v.as_str())
}

/// A schemaless object: any JSON (or YAML-as-JSON) document carrying
/// `apiVersion`, `kind` and `metadata.name`. The remainder of the document is
/// opaque to the core and round-trips untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Unstructured {
    value: serde_json::Value,
}

impl Unstructured {
    /// Validates that the required identifying fields are present.
    pub fn from_value(value: serde_json::Value) -> Result<Self, crate::Error> {
        if str_field(&value, "apiVersion").is_none() {
            return Err(crate::Error::MissingObjectField("apiVersion"));
        }
        if str_field(&value, "kind").is_none() {
            return Err(crate::Error::MissingObjectField("kind"));
        }
        if value
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .is_none()
        {
            return Err(crate::Error::MissingObjectField("metadata.name"));
        }
        Ok(Self { value })
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn into_value(self) -> serde_json::Value {
        self.value
    }

    fn metadata(&self) -> Option<&serde_json::Value> {
        self.value.get("metadata")
    }
}

impl ObjectMeta for Unstructured {
    fn api_version(&self) -> &str {
        str_field(&self.value, "apiVersion").unwrap_or_default()
    }

    fn kind(&self) -> &str {
        str_field(&self.value, "kind").unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.metadata()
            .and_then(|m| str_field(m, "name"))
            .unwrap_or_default()
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata()
            .and_then(|m| str_field(m, "namespace"))
            .filter(|ns| !ns.is_empty())
    }

    fn uid(&self) -> Option<&str> {
        self.metadata().and_then(|m| str_field(m, "uid"))
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.metadata()
            .and_then(|m| m.get("labels"))
            .and_then(|l| l.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Serialize for Unstructured {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Unstructured {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let value = serde_json::Value::deserialize(deserializer)?;
        Unstructured::from_value(value).map_err(D::Error::custom)
    }
}

impl Object for Unstructured {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PartialMetadata {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uid: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

/// Decodes only the identifying metadata of an object, discarding the rest.
/// Suitable for listing and identity extraction; write paths refuse it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialObject {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    metadata: PartialMetadata,
}

impl ObjectMeta for PartialObject {
    fn api_version(&self) -> &str {
        &self.api_version
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
    }

    fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.metadata.labels.clone()
    }
}

impl Object for PartialObject {
    fn is_partial() -> bool {
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn unstructured_requires_identity_fields() {
        let ok = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod"},
            "spec": {"replicas": 3},
        });
        let obj = Unstructured::from_value(ok).unwrap();
        assert_eq!(obj.kind(), "Deployment");
        assert_eq!(obj.namespace(), Some("prod"));
        assert_eq!(
            obj.key(),
            ObjectKey::new(GroupKind::new("apps", "Deployment"), Some("prod"), "web")
        );

        let missing = json!({"apiVersion": "v1", "metadata": {"name": "x"}});
        assert!(matches!(
            Unstructured::from_value(missing),
            Err(crate::Error::MissingObjectField("kind"))
        ));
    }

    #[test]
    fn partial_object_drops_unknown_fields() {
        let doc = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "settings",
                "uid": "c2a76fbb",
                "labels": {"app": "web"},
            },
            "data": {"k": "v"},
        });
        let partial: PartialObject = serde_json::from_value(doc).unwrap();
        assert_eq!(partial.name(), "settings");
        assert_eq!(partial.uid(), Some("c2a76fbb"));
        assert_eq!(partial.labels().get("app").map(String::as_str), Some("web"));
        assert!(PartialObject::is_partial());

        // Re-encoding must not resurrect the dropped payload.
        let round = serde_json::to_value(&partial).unwrap();
        assert!(round.get("data").is_none());
    }

    #[test]
    fn empty_namespace_reads_as_cluster_scoped() {
        let doc = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "prod", "namespace": ""},
        });
        let obj = Unstructured::from_value(doc).unwrap();
        assert_eq!(obj.namespace(), None);
    }
}
