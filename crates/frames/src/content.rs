use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// A media type tag, such as `application/json`. Also usable as an `Accept`
/// media range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentType(Cow<'static, str>);

impl ContentType {
    pub const JSON: ContentType = ContentType(Cow::Borrowed("application/json"));
    pub const YAML: ContentType = ContentType(Cow::Borrowed("application/yaml"));

    pub fn new(s: impl Into<String>) -> Self {
        ContentType(Cow::Owned(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ContentType {
    fn from(s: &'static str) -> Self {
        ContentType(Cow::Borrowed(s))
    }
}

/// Ordered, case-insensitive header name to value-list mapping carried by
/// every stream, modelled after HTTP/MIME headers. Cloning is deep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    entries: Vec<(String, Vec<String>)>,
}

pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const ACCEPT: &str = "Accept";
pub const X_CONTENT_LOCATION: &str = "X-Content-Location";

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first value recorded for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, vs)| vs.first())
            .map(String::as_str)
    }

    /// All values recorded for `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .flat_map(|(_, vs)| vs.iter())
            .map(String::as_str)
    }

    /// Replaces all values of `key` with a single value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(&key));
        self.entries.push((key, vec![value.into()]));
    }

    /// Appends a value to `key`, preserving earlier values.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some((_, vs)) => vs.push(value.into()),
            None => self.entries.push((key, vec![value.into()])),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    pub fn content_type(&self) -> Option<ContentType> {
        self.get(CONTENT_TYPE).map(ContentType::new)
    }

    pub fn set_content_type(&mut self, ct: &ContentType) {
        self.set(CONTENT_TYPE, ct.as_str());
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get(CONTENT_LENGTH).and_then(|v| v.parse().ok())
    }

    pub fn set_content_length(&mut self, len: u64) {
        self.set(CONTENT_LENGTH, len.to_string());
    }

    /// An `X-Content-Location` hint, typically a file path or URL.
    pub fn content_location(&self) -> Option<&str> {
        self.get(X_CONTENT_LOCATION)
    }

    pub fn set_content_location(&mut self, location: impl Into<String>) {
        self.set(X_CONTENT_LOCATION, location.into());
    }

    /// Accept values in priority order, one entry per recorded header value.
    pub fn accept(&self) -> Vec<String> {
        self.get_all(ACCEPT).map(str::to_string).collect()
    }

    pub fn add_accept(&mut self, value: impl Into<String>) {
        self.add(ACCEPT, value);
    }
}
