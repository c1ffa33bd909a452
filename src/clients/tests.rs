use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;

use super::{DestClient, SourceClient};
use crate::error::SyncError;
use crate::model::comment::{Comment, CommentAuthor, OriginSystem};
use crate::model::record::{
    DestRecord, DestRecordPayload, LinkKind, SourceRecord, Transition,
};
use crate::util::adf::extract_text_from_adf;

/// In-memory source tracker that records every write for assertions.
pub struct MockSource {
    pub records: Mutex<Vec<SourceRecord>>,
    pub comments: Mutex<HashMap<String, Vec<Comment>>>,
    pub transitions: Mutex<HashMap<String, Vec<Transition>>>,
    pub applied_transitions: Mutex<Vec<(String, String)>>,
    pub added_comments: Mutex<Vec<(String, Value)>>,
    pub created_links: Mutex<Vec<(String, String, LinkKind)>>,
    next_comment_id: AtomicU64,
}

impl MockSource {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            comments: Mutex::new(HashMap::new()),
            transitions: Mutex::new(HashMap::new()),
            applied_transitions: Mutex::new(Vec::new()),
            added_comments: Mutex::new(Vec::new()),
            created_links: Mutex::new(Vec::new()),
            next_comment_id: AtomicU64::new(50000),
        }
    }

    pub fn with_transitions(self, key: &str, transitions: Vec<Transition>) -> Self {
        self.transitions
            .lock()
            .unwrap()
            .insert(key.to_string(), transitions);
        self
    }

    pub fn push_comment(&self, key: &str, comment: Comment) {
        self.comments
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(comment);
    }

    pub fn remove_record(&self, key: &str) {
        self.records.lock().unwrap().retain(|r| r.key != key);
    }

    pub fn set_status(&self, key: &str, status: &str) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|r| r.key == key) {
            record.status = status.to_string();
        }
    }
}

#[async_trait]
impl SourceClient for MockSource {
    async fn search(&self) -> Result<Vec<SourceRecord>, SyncError> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn get_record(&self, key: &str) -> Result<Option<SourceRecord>, SyncError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.key == key)
            .cloned())
    }

    async fn get_comments(&self, key: &str) -> Result<Vec<Comment>, SyncError> {
        Ok(self
            .comments
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_comment(&self, key: &str, adf_body: &Value) -> Result<(), SyncError> {
        self.added_comments
            .lock()
            .unwrap()
            .push((key.to_string(), adf_body.clone()));
        let id = self.next_comment_id.fetch_add(1, Ordering::SeqCst).to_string();
        // Store the mirror the way a later run would read it back.
        let comment = Comment {
            id: id.clone(),
            author: CommentAuthor {
                name: "bridge-bot".into(),
                profile_url: String::new(),
            },
            body: extract_text_from_adf(adf_body).unwrap_or_default(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            origin: OriginSystem::Jira,
            origin_comment_id: id,
        };
        self.push_comment(key, comment);
        Ok(())
    }

    async fn list_transitions(&self, key: &str) -> Result<Vec<Transition>, SyncError> {
        Ok(self
            .transitions
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn transition(&self, key: &str, transition_id: &str) -> Result<(), SyncError> {
        let target = self
            .transitions
            .lock()
            .unwrap()
            .get(key)
            .and_then(|ts| ts.iter().find(|t| t.id == transition_id).cloned());
        if let Some(t) = target {
            self.set_status(key, &t.to_status);
        }
        self.applied_transitions
            .lock()
            .unwrap()
            .push((key.to_string(), transition_id.to_string()));
        Ok(())
    }

    async fn create_link(
        &self,
        from_key: &str,
        to_key: &str,
        kind: LinkKind,
    ) -> Result<(), SyncError> {
        self.created_links
            .lock()
            .unwrap()
            .push((from_key.to_string(), to_key.to_string(), kind));
        Ok(())
    }

    async fn create_record(
        &self,
        summary: &str,
        _description: &Value,
    ) -> Result<String, SyncError> {
        let key = format!("PROJ-{}", 900 + self.records.lock().unwrap().len());
        self.records.lock().unwrap().push(SourceRecord {
            key: key.clone(),
            summary: summary.to_string(),
            description: None,
            status: "Ready".into(),
            updated: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            labels: vec![],
            links: vec![],
            url: format!("https://acme.atlassian.net/browse/{key}"),
        });
        Ok(key)
    }

    fn browse_base(&self) -> &str {
        "https://acme.atlassian.net"
    }
}

/// In-memory destination tracker. Writes mutate the stored records so a
/// second orchestrator run observes the result of the first.
pub struct MockDest {
    pub records: Mutex<Vec<DestRecord>>,
    pub comments: Mutex<HashMap<u64, Vec<Comment>>>,
    pub creates: Mutex<Vec<DestRecordPayload>>,
    pub updates: Mutex<Vec<(u64, DestRecordPayload)>>,
    pub added_comments: Mutex<Vec<(u64, String)>>,
    pub sub_issue_links: Mutex<Vec<(u64, u64)>>,
    /// When set, the next update_record call fails with a 500.
    pub fail_next_update: std::sync::atomic::AtomicBool,
    next_number: AtomicU64,
    next_comment_id: AtomicU64,
}

impl MockDest {
    pub fn new(records: Vec<DestRecord>) -> Self {
        let next = records.iter().map(|r| r.number).max().unwrap_or(0) + 1;
        Self {
            records: Mutex::new(records),
            comments: Mutex::new(HashMap::new()),
            creates: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            added_comments: Mutex::new(Vec::new()),
            sub_issue_links: Mutex::new(Vec::new()),
            fail_next_update: std::sync::atomic::AtomicBool::new(false),
            next_number: AtomicU64::new(next),
            next_comment_id: AtomicU64::new(900),
        }
    }

    pub fn write_count(&self) -> usize {
        self.creates.lock().unwrap().len()
            + self.updates.lock().unwrap().len()
            + self.added_comments.lock().unwrap().len()
    }

    pub fn push_comment(&self, number: u64, comment: Comment) {
        self.comments
            .lock()
            .unwrap()
            .entry(number)
            .or_default()
            .push(comment);
    }

    pub fn set_open(&self, number: u64, open: bool) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|r| r.number == number) {
            record.open = open;
        }
    }

    pub fn add_label(&self, number: u64, label: &str) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|r| r.number == number) {
            record.labels.push(label.to_string());
        }
    }

    pub fn record(&self, number: u64) -> Option<DestRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.number == number)
            .cloned()
    }
}

#[async_trait]
impl DestClient for MockDest {
    async fn list_linked_records(&self) -> Result<Vec<DestRecord>, SyncError> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn create_record(&self, payload: &DestRecordPayload) -> Result<DestRecord, SyncError> {
        self.creates.lock().unwrap().push(payload.clone());
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        let record = DestRecord {
            number,
            title: payload.title.clone(),
            body: payload.body.clone(),
            open: payload.open.unwrap_or(true),
            labels: payload.labels.clone(),
            url: format!("https://github.com/acme/product/issues/{number}"),
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn update_record(
        &self,
        number: u64,
        payload: &DestRecordPayload,
    ) -> Result<(), SyncError> {
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Api {
                status: 500,
                message: "injected failure".into(),
            });
        }
        self.updates.lock().unwrap().push((number, payload.clone()));
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.number == number)
            .ok_or_else(|| SyncError::NotFound(format!("issue #{number}")))?;
        record.title = payload.title.clone();
        record.body = payload.body.clone();
        if let Some(open) = payload.open {
            record.open = open;
        }
        if !payload.labels.is_empty() {
            record.labels = payload.labels.clone();
        }
        Ok(())
    }

    async fn get_comments(&self, number: u64) -> Result<Vec<Comment>, SyncError> {
        Ok(self
            .comments
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_comment(&self, number: u64, markdown: &str) -> Result<(), SyncError> {
        self.added_comments
            .lock()
            .unwrap()
            .push((number, markdown.to_string()));
        let id = self.next_comment_id.fetch_add(1, Ordering::SeqCst).to_string();
        let comment = Comment {
            id: id.clone(),
            author: CommentAuthor {
                name: "bridge-bot".into(),
                profile_url: String::new(),
            },
            body: markdown.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            origin: OriginSystem::GitHub,
            origin_comment_id: id,
        };
        self.push_comment(number, comment);
        Ok(())
    }

    async fn get_parent_link(&self, number: u64) -> Result<Option<u64>, SyncError> {
        Ok(self
            .sub_issue_links
            .lock()
            .unwrap()
            .iter()
            .find(|(_, child)| *child == number)
            .map(|(parent, _)| *parent))
    }

    async fn ensure_child_in_parent_task_list(
        &self,
        parent: u64,
        child: u64,
    ) -> Result<(), SyncError> {
        let mut links = self.sub_issue_links.lock().unwrap();
        if !links.contains(&(parent, child)) {
            links.push((parent, child));
        }
        Ok(())
    }
}

fn sample_record(key: &str) -> SourceRecord {
    SourceRecord {
        key: key.into(),
        summary: format!("Record {key}"),
        description: None,
        status: "Ready".into(),
        updated: Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap(),
        labels: vec![],
        links: vec![],
        url: format!("https://acme.atlassian.net/browse/{key}"),
    }
}

#[tokio::test]
async fn mock_dest_updates_are_visible_to_later_reads() {
    let dest = MockDest::new(vec![]);
    let created = dest
        .create_record(&DestRecordPayload {
            title: "t".into(),
            body: "b".into(),
            open: Some(true),
            labels: vec![],
        })
        .await
        .unwrap();

    dest.update_record(
        created.number,
        &DestRecordPayload {
            title: "t2".into(),
            body: "b2".into(),
            open: Some(false),
            labels: vec![],
        },
    )
    .await
    .unwrap();

    let listed = dest.list_linked_records().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].title, "t2");
    assert!(!listed[0].open);
}

#[tokio::test]
async fn mock_dest_injected_failure_fires_once() {
    let dest = MockDest::new(vec![]);
    let created = dest
        .create_record(&DestRecordPayload {
            title: "t".into(),
            body: "b".into(),
            open: None,
            labels: vec![],
        })
        .await
        .unwrap();

    dest.fail_next_update.store(true, Ordering::SeqCst);
    let payload = DestRecordPayload {
        title: "t".into(),
        body: "b".into(),
        open: None,
        labels: vec![],
    };
    assert!(dest.update_record(created.number, &payload).await.is_err());
    assert!(dest.update_record(created.number, &payload).await.is_ok());
}

#[tokio::test]
async fn mock_dest_reports_parent_after_linking() {
    let dest = MockDest::new(vec![]);
    assert_eq!(dest.get_parent_link(2).await.unwrap(), None);

    dest.ensure_child_in_parent_task_list(1, 2).await.unwrap();
    // Linking twice stays a single link.
    dest.ensure_child_in_parent_task_list(1, 2).await.unwrap();
    assert_eq!(dest.get_parent_link(2).await.unwrap(), Some(1));
    assert_eq!(dest.sub_issue_links.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn mock_source_records_created_issues_and_links() {
    let source = MockSource::new(vec![]);
    let key = source
        .create_record("Escalated from the destination", &serde_json::json!({ "type": "doc" }))
        .await
        .unwrap();
    assert!(source.get_record(&key).await.unwrap().is_some());

    source.create_link(&key, "PROJ-1", LinkKind::Related).await.unwrap();
    assert_eq!(
        source.created_links.lock().unwrap().as_slice(),
        &[(key.clone(), "PROJ-1".to_string(), LinkKind::Related)]
    );
}

#[tokio::test]
async fn mock_source_transition_moves_status() {
    let source = MockSource::new(vec![sample_record("A-1")]).with_transitions(
        "A-1",
        vec![Transition {
            id: "31".into(),
            name: "Finish".into(),
            to_status: "Done".into(),
        }],
    );
    source.transition("A-1", "31").await.unwrap();
    let record = source.get_record("A-1").await.unwrap().unwrap();
    assert_eq!(record.status, "Done");
}
