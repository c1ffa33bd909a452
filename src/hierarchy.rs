use std::collections::HashMap;

use crate::model::record::{
    DestRecord, HierarchyLevel, LinkKind, Relationships, SourceRecord,
};

/// Split a source record's typed links into parent / children / related.
/// Only the structural subtask link type is hierarchical; an outward
/// subtask link makes this record the parent, an inward one names its
/// parent. A record keeps at most one parent; extras degrade to related.
pub fn extract_relationships(record: &SourceRecord) -> Relationships {
    let mut rels = Relationships::default();
    for link in &record.links {
        match link.kind {
            LinkKind::ParentOf => rels.children.push(link.clone()),
            LinkKind::ChildOf => {
                if rels.parent.is_none() {
                    rels.parent = Some(link.clone());
                } else {
                    rels.related.push(link.clone());
                }
            }
            LinkKind::Related => rels.related.push(link.clone()),
        }
    }
    rels
}

/// Hierarchy level for a source status name. Statuses absent from the
/// configured table are unclassified.
pub fn level_for(status: &str, levels: &HashMap<String, HierarchyLevel>) -> HierarchyLevel {
    levels
        .get(status)
        .copied()
        .unwrap_or(HierarchyLevel::Unclassified)
}

fn source_url(base: &str, key: &str) -> String {
    format!("{base}/browse/{key}")
}

/// Render the Parent / Subtasks / Related cross-reference sections for a
/// destination body. Section order is fixed; subtask lines follow the
/// source's child ordering. Children already mirrored get a checkbox that
/// tracks their destination record's open/closed state plus a link into the
/// destination system; unmirrored children render unchecked with a
/// source-system link only.
pub fn render_cross_references(
    relationships: &Relationships,
    index: &HashMap<String, u64>,
    dest_records: &HashMap<u64, DestRecord>,
    source_base: &str,
) -> String {
    let mut out = String::new();

    if let Some(parent) = &relationships.parent {
        out.push_str("### Parent\n");
        let key = &parent.target_key;
        out.push_str(&format!("[{key}]({})", source_url(source_base, key)));
        if let Some(dest) = index.get(key).and_then(|n| dest_records.get(n)) {
            out.push_str(&format!(" ([#{}]({}))", dest.number, dest.url));
        }
        out.push('\n');
    }

    if !relationships.children.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("### Subtasks\n");
        for child in &relationships.children {
            let key = &child.target_key;
            match index.get(key).and_then(|n| dest_records.get(n)) {
                Some(dest) => {
                    let mark = if dest.open { ' ' } else { 'x' };
                    out.push_str(&format!(
                        "- [{mark}] [{key}]({}) ([#{}]({}))\n",
                        source_url(source_base, key),
                        dest.number,
                        dest.url
                    ));
                }
                None => {
                    out.push_str(&format!(
                        "- [ ] [{key}]({})\n",
                        source_url(source_base, key)
                    ));
                }
            }
        }
    }

    if !relationships.related.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("### Related\n");
        for rel in &relationships.related {
            let key = &rel.target_key;
            out.push_str(&format!("- [{key}]({})\n", source_url(source_base, key)));
        }
    }

    out
}
