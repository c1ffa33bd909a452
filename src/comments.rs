use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::comment::{Comment, OriginSystem};

const MARKER_START: &str = "<!-- trackbridge:comment";
const MARKER_END: &str = "-->";

/// Dedup marker embedded in every mirrored comment. Matching happens on
/// `origin_comment_id`; the content hash is recorded for diagnostics only,
/// so edits to an already-mirrored original never re-fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentMarker {
    pub origin_system: OriginSystem,
    pub origin_comment_id: String,
    pub content_hash: String,
    pub synced_at: DateTime<Utc>,
}

pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parse the dedup marker out of a comment body, if one is present.
/// Malformed JSON reads as no marker.
pub fn read_marker(body: &str) -> Option<CommentMarker> {
    let start = body.rfind(MARKER_START)?;
    let payload_start = start + MARKER_START.len();
    let rel_end = body[payload_start..].find(MARKER_END)?;
    let payload = body[payload_start..payload_start + rel_end].trim();
    serde_json::from_str(payload).ok()
}

/// Render a comment for the opposite system, with attribution line and the
/// hidden dedup marker appended.
pub fn format_mirror(comment: &Comment, synced_at: DateTime<Utc>) -> String {
    let marker = CommentMarker {
        origin_system: comment.origin,
        origin_comment_id: comment.origin_comment_id.clone(),
        content_hash: content_hash(&comment.body),
        synced_at,
    };
    let json = serde_json::to_string(&marker).unwrap_or_default();
    format!(
        "**[{author}]({url})** commented in {origin}:\n\n{body}\n\n{MARKER_START} {json} {MARKER_END}",
        author = comment.author.name,
        url = comment.author.profile_url,
        origin = comment.origin,
        body = comment.body,
    )
}

/// Decide whether `comment` still needs to be mirrored to the other side.
///
/// False when the comment body itself carries a marker (it is a mirror;
/// re-mirroring it would feed the loop), and false when any comment already
/// on the other side carries a marker naming its origin id.
pub fn should_sync(comment: &Comment, opposite_side: &[Comment]) -> bool {
    if read_marker(&comment.body).is_some() {
        return false;
    }
    !opposite_side.iter().any(|existing| {
        read_marker(&existing.body)
            .map(|m| {
                m.origin_system == comment.origin
                    && m.origin_comment_id == comment.origin_comment_id
            })
            .unwrap_or(false)
    })
}
