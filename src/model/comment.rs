use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which tracker a comment (or record) originally came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginSystem {
    Jira,
    GitHub,
}

impl fmt::Display for OriginSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginSystem::Jira => write!(f, "Jira"),
            OriginSystem::GitHub => write!(f, "GitHub"),
        }
    }
}

/// A comment normalized from either system's raw shape. Built fresh each
/// run; the only persisted trace is the dedup marker embedded in the
/// mirrored copy on the opposite system.
#[derive(Debug, Clone)]
pub struct Comment {
    pub id: String,
    pub author: CommentAuthor,
    /// Markdown for GitHub comments, ADF already rendered to markdown for
    /// Jira comments.
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub origin: OriginSystem,
    pub origin_comment_id: String,
}

#[derive(Debug, Clone)]
pub struct CommentAuthor {
    pub name: String,
    pub profile_url: String,
}
