use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{retry::with_retry, SourceClient};
use crate::config::JiraConfig;
use crate::error::SyncError;
use crate::model::comment::{Comment, CommentAuthor, OriginSystem};
use crate::model::record::{LinkKind, SourceLink, SourceRecord, Transition};
use crate::util::adf::adf_to_markdown;

const SEARCH_FIELDS: &str = "summary,description,status,updated,labels,parent,subtasks,issuelinks";

pub struct JiraClient {
    base_url: String,
    auth_header: String,
    jql: String,
    project_key: String,
    client: reqwest::Client,
}

impl JiraClient {
    pub fn new(config: &JiraConfig) -> Self {
        let creds = format!("{}:{}", config.email, config.api_token);
        let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
        Self {
            base_url: format!("https://{}.atlassian.net", config.domain),
            auth_header: format!("Basic {encoded}"),
            jql: config.jql.clone(),
            project_key: config.project_key.clone(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SyncError> {
        let resp = self
            .client
            .get(url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(SyncError::from)?;
        decode(resp).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, SyncError> {
        let resp = self
            .client
            .post(url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(SyncError::from)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_from_response(resp).await);
        }
        // Several Jira write endpoints return an empty body on success.
        Ok(resp.json().await.unwrap_or(Value::Null))
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, SyncError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(error_from_response(resp).await);
    }
    resp.json()
        .await
        .map_err(|e| SyncError::Unknown(format!("failed to parse Jira response: {e}")))
}

async fn error_from_response(resp: reqwest::Response) -> SyncError {
    let status = resp.status().as_u16();
    if status == 429 {
        let retry_after_secs = resp
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return SyncError::RateLimited { retry_after_secs };
    }
    let message = resp.text().await.unwrap_or_default();
    SyncError::from_status(status, message)
}

#[derive(Deserialize)]
struct SearchResponse {
    issues: Vec<JiraIssue>,
}

#[derive(Deserialize)]
struct JiraIssue {
    key: String,
    fields: IssueFields,
}

#[derive(Deserialize)]
struct IssueFields {
    summary: Option<String>,
    description: Option<Value>,
    status: Option<StatusField>,
    updated: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    parent: Option<LinkedIssue>,
    #[serde(default)]
    subtasks: Vec<LinkedIssue>,
    #[serde(default)]
    issuelinks: Vec<IssueLinkRaw>,
}

#[derive(Deserialize)]
struct StatusField {
    name: String,
    #[serde(rename = "statusCategory")]
    status_category: Option<StatusCategory>,
}

#[derive(Deserialize)]
struct StatusCategory {
    key: String,
}

#[derive(Deserialize)]
struct LinkedIssue {
    key: String,
    fields: Option<StubFields>,
}

#[derive(Deserialize)]
struct StubFields {
    status: Option<StatusField>,
}

#[derive(Deserialize)]
struct IssueLinkRaw {
    #[serde(rename = "type")]
    link_type: LinkTypeRaw,
    #[serde(rename = "inwardIssue")]
    inward_issue: Option<LinkedIssue>,
    #[serde(rename = "outwardIssue")]
    outward_issue: Option<LinkedIssue>,
}

#[derive(Deserialize)]
struct LinkTypeRaw {
    name: String,
}

#[derive(Deserialize)]
struct CommentsResponse {
    comments: Vec<JiraComment>,
}

#[derive(Deserialize)]
struct JiraComment {
    id: String,
    author: Option<JiraAuthor>,
    body: Option<Value>,
    created: Option<String>,
}

#[derive(Deserialize)]
struct JiraAuthor {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(rename = "accountId")]
    account_id: Option<String>,
}

#[derive(Deserialize)]
struct TransitionsResponse {
    transitions: Vec<TransitionRaw>,
}

#[derive(Deserialize)]
struct TransitionRaw {
    id: String,
    name: String,
    to: Option<ToStatus>,
}

#[derive(Deserialize)]
struct ToStatus {
    name: String,
}

fn parse_jira_time(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| {
        DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.3f%z")
            .or_else(|_| DateTime::parse_from_rfc3339(s))
            .ok()
    })
    .map(|dt| dt.with_timezone(&Utc))
    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn stub_open(issue: &LinkedIssue) -> (Option<String>, bool) {
    let status = issue.fields.as_ref().and_then(|f| f.status.as_ref());
    let open = status
        .and_then(|s| s.status_category.as_ref())
        .map(|c| c.key != "done")
        .unwrap_or(true);
    (status.map(|s| s.name.clone()), open)
}

fn link_from_stub(kind: LinkKind, issue: &LinkedIssue) -> SourceLink {
    let (target_status, target_open) = stub_open(issue);
    SourceLink {
        kind,
        target_key: issue.key.clone(),
        target_status,
        target_open,
    }
}

/// Adapt a raw Jira issue into the canonical source-record shape. The
/// `parent` field and `subtasks` array are the only hierarchical sources;
/// every generic issue link lands in `Related` regardless of direction.
fn adapt_issue(issue: JiraIssue, base_url: &str) -> SourceRecord {
    let mut links = Vec::new();
    if let Some(parent) = &issue.fields.parent {
        links.push(link_from_stub(LinkKind::ChildOf, parent));
    }
    for subtask in &issue.fields.subtasks {
        links.push(link_from_stub(LinkKind::ParentOf, subtask));
    }
    for raw in &issue.fields.issuelinks {
        let hierarchical = raw.link_type.name.eq_ignore_ascii_case("subtask");
        if let Some(outward) = &raw.outward_issue {
            let kind = if hierarchical {
                LinkKind::ParentOf
            } else {
                LinkKind::Related
            };
            links.push(link_from_stub(kind, outward));
        }
        if let Some(inward) = &raw.inward_issue {
            let kind = if hierarchical {
                LinkKind::ChildOf
            } else {
                LinkKind::Related
            };
            links.push(link_from_stub(kind, inward));
        }
    }

    let url = format!("{base_url}/browse/{}", issue.key);
    SourceRecord {
        key: issue.key,
        summary: issue.fields.summary.unwrap_or_default(),
        description: issue.fields.description,
        status: issue.fields.status.map(|s| s.name).unwrap_or_default(),
        updated: parse_jira_time(issue.fields.updated.as_deref()),
        labels: issue.fields.labels,
        links,
        url,
    }
}

fn adapt_comment(raw: JiraComment, base_url: &str) -> Comment {
    let (name, profile_url) = match &raw.author {
        Some(author) => (
            author.display_name.clone().unwrap_or_else(|| "Unknown".into()),
            author
                .account_id
                .as_ref()
                .map(|id| format!("{base_url}/jira/people/{id}"))
                .unwrap_or_default(),
        ),
        None => ("Unknown".into(), String::new()),
    };
    let body = raw
        .body
        .as_ref()
        .map(adf_to_markdown)
        .unwrap_or_default();
    Comment {
        id: raw.id.clone(),
        author: CommentAuthor { name, profile_url },
        body,
        created_at: parse_jira_time(raw.created.as_deref()),
        origin: OriginSystem::Jira,
        origin_comment_id: raw.id,
    }
}

/// Subtask links are directional in the issue-link API: the outward side is
/// the parent.
fn link_payload(from_key: &str, to_key: &str, kind: LinkKind) -> Value {
    let (type_name, inward, outward) = match kind {
        LinkKind::ParentOf => ("Subtask", to_key, from_key),
        LinkKind::ChildOf => ("Subtask", from_key, to_key),
        LinkKind::Related => ("Relates", from_key, to_key),
    };
    json!({
        "type": { "name": type_name },
        "inwardIssue": { "key": inward },
        "outwardIssue": { "key": outward }
    })
}

fn create_issue_payload(project_key: &str, summary: &str, description: &Value) -> Value {
    json!({
        "fields": {
            "project": { "key": project_key },
            "issuetype": { "name": "Task" },
            "summary": summary,
            "description": description
        }
    })
}

#[async_trait]
impl SourceClient for JiraClient {
    async fn search(&self) -> Result<Vec<SourceRecord>, SyncError> {
        let url = format!(
            "{}/rest/api/3/search?jql={}&maxResults=100&fields={SEARCH_FIELDS}",
            self.base_url,
            urlencoding::encode(&self.jql)
        );
        let search: SearchResponse = with_retry("jira search", || self.get_json(&url)).await?;
        Ok(search
            .issues
            .into_iter()
            .map(|i| adapt_issue(i, &self.base_url))
            .collect())
    }

    async fn get_record(&self, key: &str) -> Result<Option<SourceRecord>, SyncError> {
        let url = format!(
            "{}/rest/api/3/issue/{key}?fields={SEARCH_FIELDS}",
            self.base_url
        );
        match with_retry("jira get issue", || self.get_json::<JiraIssue>(&url)).await {
            Ok(issue) => Ok(Some(adapt_issue(issue, &self.base_url))),
            Err(SyncError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn get_comments(&self, key: &str) -> Result<Vec<Comment>, SyncError> {
        let url = format!("{}/rest/api/3/issue/{key}/comment", self.base_url);
        let resp: CommentsResponse = with_retry("jira comments", || self.get_json(&url)).await?;
        Ok(resp
            .comments
            .into_iter()
            .map(|c| adapt_comment(c, &self.base_url))
            .collect())
    }

    async fn add_comment(&self, key: &str, adf_body: &Value) -> Result<(), SyncError> {
        let url = format!("{}/rest/api/3/issue/{key}/comment", self.base_url);
        let body = json!({ "body": adf_body });
        with_retry("jira add comment", || self.post_json(&url, &body)).await?;
        Ok(())
    }

    async fn list_transitions(&self, key: &str) -> Result<Vec<Transition>, SyncError> {
        let url = format!("{}/rest/api/3/issue/{key}/transitions", self.base_url);
        let resp: TransitionsResponse =
            with_retry("jira transitions", || self.get_json(&url)).await?;
        Ok(resp
            .transitions
            .into_iter()
            .map(|t| Transition {
                to_status: t.to.map(|s| s.name).unwrap_or_else(|| t.name.clone()),
                id: t.id,
                name: t.name,
            })
            .collect())
    }

    async fn transition(&self, key: &str, transition_id: &str) -> Result<(), SyncError> {
        let url = format!("{}/rest/api/3/issue/{key}/transitions", self.base_url);
        let body = json!({ "transition": { "id": transition_id } });
        with_retry("jira transition", || self.post_json(&url, &body)).await?;
        Ok(())
    }

    async fn create_link(
        &self,
        from_key: &str,
        to_key: &str,
        kind: LinkKind,
    ) -> Result<(), SyncError> {
        let url = format!("{}/rest/api/3/issueLink", self.base_url);
        let body = link_payload(from_key, to_key, kind);
        with_retry("jira create link", || self.post_json(&url, &body)).await?;
        Ok(())
    }

    async fn create_record(
        &self,
        summary: &str,
        description: &Value,
    ) -> Result<String, SyncError> {
        let url = format!("{}/rest/api/3/issue", self.base_url);
        let body = create_issue_payload(&self.project_key, summary, description);
        let created = with_retry("jira create issue", || self.post_json(&url, &body)).await?;
        created
            .get("key")
            .and_then(|k| k.as_str())
            .map(String::from)
            .ok_or_else(|| SyncError::Unknown("create issue response had no key".into()))
    }

    fn browse_base(&self) -> &str {
        &self.base_url
    }
}
