use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical shape of a record in the source tracker (Jira-style).
///
/// Adapters in `clients/` build these from raw API payloads; reconciliation
/// code only ever sees this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Unique key, e.g. "PROJ-42".
    pub key: String,
    pub summary: String,
    /// Raw ADF document, converted to markdown only at the boundary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<serde_json::Value>,
    pub status: String,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub links: Vec<SourceLink>,
    pub url: String,
}

/// A typed link from one source record to another, already collapsed to the
/// three kinds reconciliation cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLink {
    pub kind: LinkKind,
    pub target_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_status: Option<String>,
    /// Whether the linked record is still open in the source system.
    pub target_open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// This record is the parent; the target is a subtask of it.
    ParentOf,
    /// This record is a subtask; the target is its parent.
    ChildOf,
    /// Any non-structural link type.
    Related,
}

/// Canonical shape of a record in the destination tracker (GitHub-style).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestRecord {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub open: bool,
    #[serde(default)]
    pub labels: Vec<String>,
    pub url: String,
}

/// Payload for creating or updating a destination record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DestRecordPayload {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// Relationships derived from a source record's links. Recomputed every run,
/// never stored.
#[derive(Debug, Clone, Default)]
pub struct Relationships {
    pub parent: Option<SourceLink>,
    pub children: Vec<SourceLink>,
    pub related: Vec<SourceLink>,
}

/// Hierarchy level of a source record. A pure function of the record's
/// status name via the configured level table, independent of its links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyLevel {
    Epic,
    Story,
    Task,
    Unclassified,
}

impl HierarchyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HierarchyLevel::Epic => "epic",
            HierarchyLevel::Story => "story",
            HierarchyLevel::Task => "task",
            HierarchyLevel::Unclassified => "unclassified",
        }
    }
}

/// A workflow transition currently legal for a source record.
#[derive(Debug, Clone, Deserialize)]
pub struct Transition {
    pub id: String,
    pub name: String,
    /// Status the record lands in after this transition.
    pub to_status: String,
}
