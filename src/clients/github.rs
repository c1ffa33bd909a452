use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{retry::with_retry, DestClient};
use crate::config::GitHubConfig;
use crate::error::SyncError;
use crate::model::comment::{Comment, CommentAuthor, OriginSystem};
use crate::model::record::{DestRecord, DestRecordPayload};

const API_BASE: &str = "https://api.github.com";

pub struct GitHubClient {
    owner: String,
    repo: String,
    token: String,
    sync_label: String,
    client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig, sync_label: String) -> Self {
        Self {
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            token: config.token.clone(),
            sync_label,
            client: reqwest::Client::new(),
        }
    }

    fn issues_url(&self, tail: &str) -> String {
        format!(
            "{API_BASE}/repos/{}/{}/issues{tail}",
            self.owner, self.repo
        )
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<T, SyncError> {
        let mut req = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "trackbridge");
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(SyncError::from)?;
        let status = resp.status();
        if !status.is_success() {
            if status.as_u16() == 429 || status.as_u16() == 403 {
                // GitHub signals rate limits on 403 with a zeroed remaining
                // quota; treat an explicit Retry-After as rate limiting.
                if let Some(secs) = resp
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                {
                    return Err(SyncError::RateLimited {
                        retry_after_secs: Some(secs),
                    });
                }
            }
            let message = resp.text().await.unwrap_or_default();
            return Err(SyncError::from_status(status.as_u16(), message));
        }
        resp.json()
            .await
            .map_err(|e| SyncError::Unknown(format!("failed to parse GitHub response: {e}")))
    }
}

#[derive(Deserialize)]
struct GhIssue {
    id: u64,
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    labels: Vec<GhLabel>,
    html_url: String,
    parent: Option<GhParent>,
    pull_request: Option<Value>,
}

#[derive(Deserialize)]
struct GhParent {
    number: u64,
}

#[derive(Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Deserialize)]
struct GhComment {
    id: u64,
    user: Option<GhUser>,
    body: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct GhUser {
    login: String,
    html_url: String,
}

fn adapt_issue(issue: GhIssue) -> DestRecord {
    DestRecord {
        number: issue.number,
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        open: issue.state == "open",
        labels: issue.labels.into_iter().map(|l| l.name).collect(),
        url: issue.html_url,
    }
}

fn adapt_comment(raw: GhComment) -> Comment {
    let (name, profile_url) = match &raw.user {
        Some(user) => (user.login.clone(), user.html_url.clone()),
        None => ("ghost".into(), String::new()),
    };
    Comment {
        id: raw.id.to_string(),
        author: CommentAuthor { name, profile_url },
        body: raw.body.unwrap_or_default(),
        created_at: raw.created_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        origin: OriginSystem::GitHub,
        origin_comment_id: raw.id.to_string(),
    }
}

fn payload_json(payload: &DestRecordPayload) -> Value {
    let mut body = json!({
        "title": payload.title,
        "body": payload.body,
    });
    if let Some(open) = payload.open {
        body["state"] = json!(if open { "open" } else { "closed" });
    }
    if !payload.labels.is_empty() {
        body["labels"] = json!(payload.labels);
    }
    body
}

#[async_trait]
impl DestClient for GitHubClient {
    async fn list_linked_records(&self) -> Result<Vec<DestRecord>, SyncError> {
        let mut records = Vec::new();
        // Issue listings cap at 100 per page; follow pages until short.
        for page in 1..=10u32 {
            let url = self.issues_url(&format!(
                "?labels={}&state=all&per_page=100&page={page}",
                urlencoding::encode(&self.sync_label)
            ));
            let issues: Vec<GhIssue> = with_retry("github list issues", || {
                self.request(reqwest::Method::GET, &url, None)
            })
            .await?;
            let count = issues.len();
            records.extend(
                issues
                    .into_iter()
                    .filter(|i| i.pull_request.is_none())
                    .map(adapt_issue),
            );
            if count < 100 {
                break;
            }
        }
        Ok(records)
    }

    async fn create_record(&self, payload: &DestRecordPayload) -> Result<DestRecord, SyncError> {
        let url = self.issues_url("");
        let body = payload_json(payload);
        let issue: GhIssue = with_retry("github create issue", || {
            self.request(reqwest::Method::POST, &url, Some(&body))
        })
        .await?;
        Ok(adapt_issue(issue))
    }

    async fn update_record(
        &self,
        number: u64,
        payload: &DestRecordPayload,
    ) -> Result<(), SyncError> {
        let url = self.issues_url(&format!("/{number}"));
        let body = payload_json(payload);
        let _: Value = with_retry("github update issue", || {
            self.request(reqwest::Method::PATCH, &url, Some(&body))
        })
        .await?;
        Ok(())
    }

    async fn get_comments(&self, number: u64) -> Result<Vec<Comment>, SyncError> {
        let url = self.issues_url(&format!("/{number}/comments?per_page=100"));
        let comments: Vec<GhComment> = with_retry("github comments", || {
            self.request(reqwest::Method::GET, &url, None)
        })
        .await?;
        Ok(comments.into_iter().map(adapt_comment).collect())
    }

    async fn add_comment(&self, number: u64, markdown: &str) -> Result<(), SyncError> {
        let url = self.issues_url(&format!("/{number}/comments"));
        let body = json!({ "body": markdown });
        let _: Value = with_retry("github add comment", || {
            self.request(reqwest::Method::POST, &url, Some(&body))
        })
        .await?;
        Ok(())
    }

    async fn get_parent_link(&self, number: u64) -> Result<Option<u64>, SyncError> {
        let url = self.issues_url(&format!("/{number}"));
        let issue: GhIssue = with_retry("github get issue", || {
            self.request(reqwest::Method::GET, &url, None)
        })
        .await?;
        Ok(issue.parent.map(|p| p.number))
    }

    async fn ensure_child_in_parent_task_list(
        &self,
        parent: u64,
        child: u64,
    ) -> Result<(), SyncError> {
        // The sub-issue API wants the child's global id, not its number.
        let child_url = self.issues_url(&format!("/{child}"));
        let child_issue: GhIssue = with_retry("github get child issue", || {
            self.request(reqwest::Method::GET, &child_url, None)
        })
        .await?;

        let url = self.issues_url(&format!("/{parent}/sub_issues"));
        let body = json!({ "sub_issue_id": child_issue.id });
        match with_retry("github add sub-issue", || {
            self.request::<Value>(reqwest::Method::POST, &url, Some(&body))
        })
        .await
        {
            Ok(_) => Ok(()),
            // Already linked reads back as a validation conflict; that is
            // the "ensure" part.
            Err(SyncError::Api { status: 422, .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }
}
