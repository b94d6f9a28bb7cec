use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// What to record when a transaction commits. The title is mandatory; the
/// timestamp defaults to "now" at the backend when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub author_name: String,
    pub author_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<SystemTime>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CommitRequest {
    pub fn new(
        author_name: impl Into<String>,
        author_email: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            author_name: author_name.into(),
            author_email: author_email.into(),
            when: None,
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.title.is_empty() {
            return Err(crate::Error::MissingRequestField("title"));
        }
        if self.author_name.is_empty() {
            return Err(crate::Error::MissingRequestField("author_name"));
        }
        if self.author_email.is_empty() {
            return Err(crate::Error::MissingRequestField("author_email"));
        }
        Ok(())
    }

    /// The full commit message: title, then a blank line and the description.
    pub fn message(&self) -> String {
        match &self.description {
            Some(description) => format!("{}\n\n{}", self.title, description),
            None => self.title.clone(),
        }
    }
}

/// A commit request that additionally asks a pull-request provider to open a
/// review against `target_branch`. The provider itself is pluggable and lives
/// outside the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestRequest {
    #[serde(flatten)]
    pub commit: CommitRequest,
    pub target_branch: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn title_is_required() {
        let request = CommitRequest::new("dev", "dev@example.com", "");
        assert!(matches!(
            request.validate(),
            Err(crate::Error::MissingRequestField("title"))
        ));

        let request = CommitRequest::new("dev", "dev@example.com", "update web replicas");
        assert!(request.validate().is_ok());
        assert_eq!(request.message(), "update web replicas");

        let request = request.with_description("bump from 3 to 5");
        assert_eq!(request.message(), "update web replicas\n\nbump from 3 to 5");
    }
}
