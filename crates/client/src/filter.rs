use models::{ObjectKey, ObjectMeta};

use crate::{Error, Result};

/// How a filter value is compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    Equals(String),
    Prefix(String),
}

impl Match {
    fn matches(&self, candidate: &str) -> bool {
        match self {
            Match::Equals(want) => candidate == want,
            Match::Prefix(prefix) => candidate.starts_with(prefix),
        }
    }

    fn validate(&self, what: &'static str) -> Result<()> {
        let value = match self {
            Match::Equals(v) | Match::Prefix(v) => v,
        };
        if value.is_empty() {
            return Err(Error::InvalidFilterParams(what));
        }
        Ok(())
    }
}

/// A single list filter. Name and namespace apply before objects are
/// decoded; label and uid filters need the decoded metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Name(Match),
    Namespace(Match),
    Label { key: String, value: Match },
    Uid(Match),
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub filters: Vec<Filter>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn validate(&self) -> Result<()> {
        for filter in &self.filters {
            match filter {
                Filter::Name(m) => m.validate("name filter requires a value")?,
                Filter::Namespace(m) => m.validate("namespace filter requires a value")?,
                Filter::Label { key, value } => {
                    if key.is_empty() {
                        return Err(Error::InvalidFilterParams("label filter requires a key"));
                    }
                    value.validate("label filter requires a value")?;
                }
                Filter::Uid(m) => m.validate("uid filter requires a value")?,
            }
        }
        Ok(())
    }

    /// The single namespace this filter restricts to, when it does so by
    /// equality.
    pub fn namespace(&self) -> Option<&str> {
        self.filters.iter().find_map(|f| match f {
            Filter::Namespace(Match::Equals(ns)) => Some(ns.as_str()),
            _ => None,
        })
    }

    /// Filters decidable from the key alone.
    pub fn matches_key(&self, key: &ObjectKey) -> bool {
        self.filters.iter().all(|filter| match filter {
            Filter::Name(m) => m.matches(&key.name),
            Filter::Namespace(m) => key.namespace.as_deref().is_some_and(|ns| m.matches(ns)),
            _ => true,
        })
    }

    /// Filters needing the decoded object.
    pub fn matches_object(&self, object: &impl ObjectMeta) -> bool {
        self.filters.iter().all(|filter| match filter {
            Filter::Label { key, value } => object
                .labels()
                .get(key)
                .is_some_and(|candidate| value.matches(candidate)),
            Filter::Uid(m) => object.uid().is_some_and(|uid| m.matches(uid)),
            _ => true,
        })
    }
}
