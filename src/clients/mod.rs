pub mod github;
pub mod jira;
pub mod retry;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SyncError;
use crate::model::comment::Comment;
use crate::model::record::{
    DestRecord, DestRecordPayload, LinkKind, SourceRecord, Transition,
};

/// Client for the source tracker (Jira-style). Implementations adapt raw
/// API payloads into the canonical model shapes; reconciliation never sees
/// a raw payload.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch the candidate record set for this run.
    async fn search(&self) -> Result<Vec<SourceRecord>, SyncError>;
    /// Fetch one record; `Ok(None)` when it no longer exists.
    async fn get_record(&self, key: &str) -> Result<Option<SourceRecord>, SyncError>;
    async fn get_comments(&self, key: &str) -> Result<Vec<Comment>, SyncError>;
    async fn add_comment(&self, key: &str, adf_body: &Value) -> Result<(), SyncError>;
    /// Workflow transitions currently legal for the record.
    async fn list_transitions(&self, key: &str) -> Result<Vec<Transition>, SyncError>;
    async fn transition(&self, key: &str, transition_id: &str) -> Result<(), SyncError>;
    async fn create_link(
        &self,
        from_key: &str,
        to_key: &str,
        kind: LinkKind,
    ) -> Result<(), SyncError>;
    async fn create_record(
        &self,
        summary: &str,
        description: &Value,
    ) -> Result<String, SyncError>;
    /// Base URL for human-facing record links.
    fn browse_base(&self) -> &str;
}

/// Client for the destination tracker (GitHub-style).
#[async_trait]
pub trait DestClient: Send + Sync {
    /// All records managed by the bridge, open and closed.
    async fn list_linked_records(&self) -> Result<Vec<DestRecord>, SyncError>;
    async fn create_record(&self, payload: &DestRecordPayload) -> Result<DestRecord, SyncError>;
    async fn update_record(
        &self,
        number: u64,
        payload: &DestRecordPayload,
    ) -> Result<(), SyncError>;
    async fn get_comments(&self, number: u64) -> Result<Vec<Comment>, SyncError>;
    async fn add_comment(&self, number: u64, markdown: &str) -> Result<(), SyncError>;
    async fn get_parent_link(&self, number: u64) -> Result<Option<u64>, SyncError>;
    async fn ensure_child_in_parent_task_list(
        &self,
        parent: u64,
        child: u64,
    ) -> Result<(), SyncError>;
}

#[cfg(test)]
pub mod tests;
