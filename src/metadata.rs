use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::record::HierarchyLevel;

const BLOCK_START: &str = "<!-- trackbridge:metadata";
const BLOCK_END: &str = "-->";

/// Sync state embedded in a destination record's body. The only persisted
/// state in the whole system; replaced wholesale on every write, never
/// merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub source_key: String,
    pub source_updated_at: DateTime<Utc>,
    pub last_sync_time: DateTime<Utc>,
    pub content_hash: String,
    pub hierarchy_level: HierarchyLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_source_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_dest_number: Option<u64>,
    #[serde(default)]
    pub child_source_keys: Vec<String>,
    pub origin_link: String,
}

/// Locate the metadata block in a body. Returns the byte span covering the
/// whole block including delimiters, and the JSON payload inside it. The
/// last occurrence wins so an accidental earlier copy in user text is
/// tolerated.
fn find_block(body: &str) -> Option<(usize, usize, &str)> {
    let start = body.rfind(BLOCK_START)?;
    let payload_start = start + BLOCK_START.len();
    let rel_end = body[payload_start..].find(BLOCK_END)?;
    let end = payload_start + rel_end + BLOCK_END.len();
    Some((start, end, body[payload_start..payload_start + rel_end].trim()))
}

/// Parse the metadata block out of a destination body. Malformed JSON reads
/// as `None`; a corrupted blob must not break sync, it heals on the next
/// successful write.
pub fn read(body: &str) -> Option<SyncMetadata> {
    let (_, _, payload) = find_block(body)?;
    serde_json::from_str(payload).ok()
}

/// Embed `meta` in `body`, replacing an existing block in place or appending
/// a new one. Exactly one block survives any number of writes.
pub fn write(body: &str, meta: &SyncMetadata) -> String {
    let json = serde_json::to_string(meta).unwrap_or_default();
    let block = format!("{BLOCK_START}\n{json}\n{BLOCK_END}");
    match find_block(body) {
        Some((start, end, _)) => {
            let mut out = String::with_capacity(body.len() + block.len());
            out.push_str(&body[..start]);
            out.push_str(&block);
            out.push_str(&body[end..]);
            out
        }
        None => {
            if body.is_empty() {
                block
            } else {
                format!("{}\n\n{block}", body.trim_end())
            }
        }
    }
}

/// Remove the metadata block entirely. Used when the linked source record no
/// longer exists.
pub fn strip(body: &str) -> String {
    match find_block(body) {
        Some((start, end, _)) => {
            let mut out = String::with_capacity(body.len());
            out.push_str(body[..start].trim_end());
            let rest = body[end..].trim_start();
            if !rest.is_empty() {
                out.push_str("\n\n");
                out.push_str(rest);
            }
            out
        }
        None => body.to_string(),
    }
}

/// Read/replace/remove contract over sync metadata keyed by destination
/// record number. The production path keeps metadata embedded in record
/// bodies; tests use the in-memory map.
pub trait MetadataStore {
    fn read(&self, number: u64) -> Option<SyncMetadata>;
    fn replace(&mut self, number: u64, meta: &SyncMetadata);
    fn remove(&mut self, number: u64) -> bool;
}

/// Store backed by the destination record bodies fetched this run. Mutations
/// mark the record dirty; the orchestrator flushes dirty bodies back through
/// the destination client.
#[derive(Debug, Default)]
pub struct BodyStore {
    bodies: HashMap<u64, String>,
    dirty: BTreeSet<u64>,
}

impl BodyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, number: u64, body: String) {
        self.bodies.insert(number, body);
    }

    pub fn body(&self, number: u64) -> Option<&str> {
        self.bodies.get(&number).map(String::as_str)
    }

    /// Numbers whose bodies changed since load, in ascending order.
    pub fn take_dirty(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }
}

impl MetadataStore for BodyStore {
    fn read(&self, number: u64) -> Option<SyncMetadata> {
        self.bodies.get(&number).and_then(|b| read(b))
    }

    fn replace(&mut self, number: u64, meta: &SyncMetadata) {
        let body = self.bodies.entry(number).or_default();
        *body = write(body, meta);
        self.dirty.insert(number);
    }

    fn remove(&mut self, number: u64) -> bool {
        let Some(body) = self.bodies.get_mut(&number) else {
            return false;
        };
        if find_block(body).is_none() {
            return false;
        }
        *body = strip(body);
        self.dirty.insert(number);
        true
    }
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: HashMap<u64, SyncMetadata>,
}

impl MetadataStore for InMemoryStore {
    fn read(&self, number: u64) -> Option<SyncMetadata> {
        self.entries.get(&number).cloned()
    }

    fn replace(&mut self, number: u64, meta: &SyncMetadata) {
        self.entries.insert(number, meta.clone());
    }

    fn remove(&mut self, number: u64) -> bool {
        self.entries.remove(&number).is_some()
    }
}
