use std::collections::HashMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::metadata::SyncMetadata;
use crate::model::record::{DestRecord, Relationships, SourceRecord};

/// Fixed projection of the fields that participate in change detection.
/// Serialized in declared field order, so the hash can never depend on how
/// an upstream API happened to order its JSON keys. Children contribute
/// identity only; their open/closed state is checked separately in
/// `needs_write` so closing a subtask refreshes the parent's task list
/// without perturbing the hash.
#[derive(Serialize)]
struct Projection<'a> {
    key: &'a str,
    updated: String,
    title: &'a str,
    status: &'a str,
    parent_key: Option<&'a str>,
    hierarchy_level: &'a str,
    child_keys: Vec<&'a str>,
}

pub fn fingerprint(
    record: &SourceRecord,
    relationships: &Relationships,
    level: crate::model::record::HierarchyLevel,
) -> String {
    let projection = Projection {
        key: &record.key,
        updated: record.updated.to_rfc3339(),
        title: &record.summary,
        status: &record.status,
        parent_key: relationships.parent.as_ref().map(|p| p.target_key.as_str()),
        hierarchy_level: level.as_str(),
        child_keys: relationships
            .children
            .iter()
            .map(|c| c.target_key.as_str())
            .collect(),
    };
    let canonical = serde_json::to_string(&projection).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Decide whether the destination record needs a write. True when no
/// metadata exists yet, the stored hash differs, or any rendered subtask
/// checkbox no longer matches the child mirror's open/closed state.
pub fn needs_write(
    existing: Option<&SyncMetadata>,
    new_hash: &str,
    relationships: &Relationships,
    dest_body: Option<&str>,
    index: &HashMap<String, u64>,
    dest_records: &HashMap<u64, DestRecord>,
) -> bool {
    let Some(meta) = existing else {
        return true;
    };
    if meta.content_hash != new_hash {
        return true;
    }
    match dest_body {
        Some(body) => checkboxes_stale(relationships, body, index, dest_records),
        None => false,
    }
}

/// Scan the rendered task list for checkbox lines referencing each child and
/// compare checked state against what rendering would produce today: a
/// mirrored child's checkbox follows its destination record, and an
/// unmirrored child always renders unchecked, so only mirrored children can
/// go stale.
fn checkboxes_stale(
    relationships: &Relationships,
    body: &str,
    index: &HashMap<String, u64>,
    dest_records: &HashMap<u64, DestRecord>,
) -> bool {
    for child in &relationships.children {
        let Some(dest) = index
            .get(&child.target_key)
            .and_then(|n| dest_records.get(n))
        else {
            continue;
        };
        let expected_checked = !dest.open;
        // Exact bracketed token, so PROJ-1 never reads PROJ-12's line.
        let needle = format!("[{}](", child.target_key);
        for line in body.lines() {
            let trimmed = line.trim_start();
            let Some(rest) = trimmed.strip_prefix("- [") else {
                continue;
            };
            let Some(mark) = rest.chars().next() else {
                continue;
            };
            let checked = mark == 'x' || mark == 'X';
            if rest.contains(&needle) && checked != expected_checked {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::{HierarchyLevel, LinkKind, SourceLink};
    use chrono::{TimeZone, Utc};

    fn record(key: &str, title: &str, status: &str) -> SourceRecord {
        SourceRecord {
            key: key.into(),
            summary: title.into(),
            description: None,
            status: status.into(),
            updated: Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap(),
            labels: vec![],
            links: vec![],
            url: format!("https://example.atlassian.net/browse/{key}"),
        }
    }

    fn child_link(key: &str, open: bool) -> SourceLink {
        SourceLink {
            kind: LinkKind::ParentOf,
            target_key: key.into(),
            target_status: None,
            target_open: open,
        }
    }

    fn dest(number: u64, open: bool) -> DestRecord {
        DestRecord {
            number,
            title: String::new(),
            body: String::new(),
            open,
            labels: vec![],
            url: format!("https://github.com/o/r/issues/{number}"),
        }
    }

    fn mirror(
        key: &str,
        number: u64,
        open: bool,
    ) -> (HashMap<String, u64>, HashMap<u64, DestRecord>) {
        let mut index = HashMap::new();
        index.insert(key.to_string(), number);
        let mut dests = HashMap::new();
        dests.insert(number, dest(number, open));
        (index, dests)
    }

    fn meta_with_hash(hash: &str) -> SyncMetadata {
        SyncMetadata {
            source_key: "A-1".into(),
            source_updated_at: Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap(),
            last_sync_time: Utc.with_ymd_and_hms(2026, 2, 1, 9, 5, 0).unwrap(),
            content_hash: hash.into(),
            hierarchy_level: HierarchyLevel::Task,
            parent_source_key: None,
            parent_dest_number: None,
            child_source_keys: vec![],
            origin_link: String::new(),
        }
    }

    #[test]
    fn identical_records_hash_identically() {
        let rels = Relationships::default();
        let a = fingerprint(&record("A-1", "Title", "Ready"), &rels, HierarchyLevel::Task);
        let b = fingerprint(&record("A-1", "Title", "Ready"), &rels, HierarchyLevel::Task);
        assert_eq!(a, b);
    }

    #[test]
    fn title_change_changes_hash() {
        let rels = Relationships::default();
        let a = fingerprint(&record("A-1", "Title", "Ready"), &rels, HierarchyLevel::Task);
        let b = fingerprint(&record("A-1", "Other", "Ready"), &rels, HierarchyLevel::Task);
        assert_ne!(a, b);
    }

    #[test]
    fn child_identity_affects_hash_but_state_does_not() {
        let rec = record("A-1", "Title", "Ready");
        let open = Relationships {
            children: vec![child_link("A-2", true)],
            ..Default::default()
        };
        let closed = Relationships {
            children: vec![child_link("A-2", false)],
            ..Default::default()
        };
        let extra = Relationships {
            children: vec![child_link("A-2", true), child_link("A-3", true)],
            ..Default::default()
        };
        assert_eq!(
            fingerprint(&rec, &open, HierarchyLevel::Task),
            fingerprint(&rec, &closed, HierarchyLevel::Task)
        );
        assert_ne!(
            fingerprint(&rec, &open, HierarchyLevel::Task),
            fingerprint(&rec, &extra, HierarchyLevel::Task)
        );
    }

    #[test]
    fn needs_write_without_metadata() {
        assert!(needs_write(
            None,
            "h",
            &Relationships::default(),
            None,
            &HashMap::new(),
            &HashMap::new()
        ));
    }

    #[test]
    fn no_write_when_hash_matches() {
        let meta = meta_with_hash("h");
        assert!(!needs_write(
            Some(&meta),
            "h",
            &Relationships::default(),
            Some("body"),
            &HashMap::new(),
            &HashMap::new()
        ));
    }

    #[test]
    fn write_on_hash_mismatch() {
        let meta = meta_with_hash("old");
        assert!(needs_write(
            Some(&meta),
            "new",
            &Relationships::default(),
            None,
            &HashMap::new(),
            &HashMap::new()
        ));
    }

    #[test]
    fn stale_checkbox_forces_write_despite_matching_hash() {
        let meta = meta_with_hash("h");
        let rels = Relationships {
            children: vec![child_link("A-2", false)],
            ..Default::default()
        };
        let (index, dests) = mirror("A-2", 2, false);
        // Mirror closed but still rendered unchecked.
        let body = "Intro\n\n### Subtasks\n- [ ] [A-2](https://x/A-2)\n";
        assert!(needs_write(Some(&meta), "h", &rels, Some(body), &index, &dests));

        let fresh = "Intro\n\n### Subtasks\n- [x] [A-2](https://x/A-2)\n";
        assert!(!needs_write(Some(&meta), "h", &rels, Some(fresh), &index, &dests));
    }

    #[test]
    fn unmirrored_child_is_never_stale() {
        let meta = meta_with_hash("h");
        // Closed in the source but never mirrored: rendering always draws it
        // unchecked, so an unchecked line is already current.
        let rels = Relationships {
            children: vec![child_link("A-2", false)],
            ..Default::default()
        };
        let body = "### Subtasks\n- [ ] [A-2](https://x/A-2)\n";
        assert!(!needs_write(
            Some(&meta),
            "h",
            &rels,
            Some(body),
            &HashMap::new(),
            &HashMap::new()
        ));
    }

    #[test]
    fn checkbox_follows_destination_mirror_not_source() {
        let meta = meta_with_hash("h");
        let rels = Relationships {
            children: vec![child_link("A-2", false)],
            ..Default::default()
        };
        // Source says closed but the mirror is still open: rendering would
        // draw it unchecked, so the unchecked line is not stale.
        let (index, dests) = mirror("A-2", 2, true);
        let body = "### Subtasks\n- [ ] [A-2](https://x/A-2) ([#2](https://d/2))\n";
        assert!(!needs_write(Some(&meta), "h", &rels, Some(body), &index, &dests));
    }

    #[test]
    fn child_key_prefix_does_not_match_longer_key() {
        let meta = meta_with_hash("h");
        let rels = Relationships {
            children: vec![child_link("PROJ-1", true)],
            ..Default::default()
        };
        let body = "### Subtasks\n\
                    - [x] [PROJ-12](https://x/PROJ-12)\n\
                    - [ ] [PROJ-1](https://x/PROJ-1)\n";

        // PROJ-12's checked line must not be read as PROJ-1's checkbox.
        let (index, dests) = mirror("PROJ-1", 2, true);
        assert!(!needs_write(Some(&meta), "h", &rels, Some(body), &index, &dests));

        // Real staleness on PROJ-1's own line is still seen.
        let (index, dests) = mirror("PROJ-1", 2, false);
        assert!(needs_write(Some(&meta), "h", &rels, Some(body), &index, &dests));
    }
}
