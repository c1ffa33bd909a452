use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::clients::{DestClient, SourceClient};
use crate::comments::{format_mirror, should_sync};
use crate::config::AppConfig;
use crate::error::SyncError;
use crate::fingerprint;
use crate::hierarchy;
use crate::metadata::{self, BodyStore, MetadataStore, SyncMetadata};
use crate::model::record::{DestRecord, DestRecordPayload, Relationships, SourceRecord};
use crate::status::{find_transition, DestState, StatusMapping, StatusPlan};
use crate::util::adf::{adf_to_markdown, text_to_adf};

/// Explicit run context threaded through the passes: no global logger, so
/// tests can assert on captured diagnostics.
pub struct SyncContext {
    pub run_id: String,
    pub dry_run: bool,
    pub warnings: Vec<String>,
    pub failures: Vec<RecordFailure>,
}

#[derive(Debug, Clone)]
pub struct RecordFailure {
    pub identity: String,
    pub message: String,
}

impl SyncContext {
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
            dry_run,
            warnings: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn warn(&mut self, message: String) {
        warn!(run_id = %self.run_id, "{message}");
        self.warnings.push(message);
    }

    fn fail(&mut self, identity: &str, err: &SyncError) {
        error!(run_id = %self.run_id, identity, error = %err, "record failed");
        self.failures.push(RecordFailure {
            identity: identity.to_string(),
            message: err.to_string(),
        });
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped_unchanged: usize,
    pub skipped_filtered: usize,
    pub errored: usize,
    pub transitions_applied: usize,
    pub comments_synced: usize,
    pub stale_cleaned: usize,
}

enum Outcome {
    Created(u64),
    Updated(u64),
    Unchanged,
}

pub struct Orchestrator<'a> {
    source: &'a dyn SourceClient,
    dest: &'a dyn DestClient,
    config: &'a AppConfig,
    mapping: StatusMapping,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        source: &'a dyn SourceClient,
        dest: &'a dyn DestClient,
        config: &'a AppConfig,
    ) -> Self {
        Self {
            source,
            dest,
            config,
            mapping: StatusMapping::from_rules(&config.status_rules),
        }
    }

    /// One full run: pre-flight validation, source -> destination pass,
    /// destination -> source status pass, comment pass. Per-record failures
    /// are recorded and skipped; only validation, authentication, or a
    /// failure to fetch either candidate set aborts the run.
    pub async fn run(&self, ctx: &mut SyncContext) -> Result<SyncSummary> {
        self.config.validate()?;
        info!(run_id = %ctx.run_id, dry_run = ctx.dry_run, "starting sync run");

        let source_records = self
            .source
            .search()
            .await
            .context("fetching source candidate set")?;
        let dest_records = self
            .dest
            .list_linked_records()
            .await
            .context("fetching destination candidate set")?;

        let mut dest_by_number: HashMap<u64, DestRecord> = dest_records
            .iter()
            .map(|d| (d.number, d.clone()))
            .collect();
        let mut index: HashMap<String, u64> = dest_records
            .iter()
            .filter_map(|d| metadata::read(&d.body).map(|m| (m.source_key, d.number)))
            .collect();
        // child key -> parent key, for the nesting-ceiling check
        let parent_of: HashMap<String, String> = source_records
            .iter()
            .filter_map(|r| {
                hierarchy::extract_relationships(r)
                    .parent
                    .map(|p| (r.key.clone(), p.target_key))
            })
            .collect();

        let mut summary = SyncSummary::default();

        for record in &source_records {
            if let Some(filter) = &self.config.sync.label_filter {
                if !record.labels.contains(filter) {
                    summary.skipped_filtered += 1;
                    continue;
                }
            }
            match self
                .sync_source_record(record, &mut index, &mut dest_by_number, &parent_of, ctx)
                .await
            {
                Ok(Outcome::Created(_)) => summary.created += 1,
                Ok(Outcome::Updated(_)) => summary.updated += 1,
                Ok(Outcome::Unchanged) => summary.skipped_unchanged += 1,
                Err(err) => {
                    summary.errored += 1;
                    ctx.fail(&record.key, &err);
                }
            }
        }

        self.status_pass(&mut dest_by_number, &source_records, ctx, &mut summary)
            .await;
        self.comment_pass(&index, ctx, &mut summary).await;

        info!(
            run_id = %ctx.run_id,
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped_unchanged,
            errored = summary.errored,
            "sync run finished"
        );
        Ok(summary)
    }

    async fn sync_source_record(
        &self,
        record: &SourceRecord,
        index: &mut HashMap<String, u64>,
        dest_by_number: &mut HashMap<u64, DestRecord>,
        parent_of: &HashMap<String, String>,
        ctx: &mut SyncContext,
    ) -> Result<Outcome, SyncError> {
        let rels = if self.config.hierarchy.enabled {
            hierarchy::extract_relationships(record)
        } else {
            Relationships::default()
        };
        let level = hierarchy::level_for(&record.status, &self.config.hierarchy.levels);
        let hash = fingerprint::fingerprint(record, &rels, level);

        let existing = index
            .get(&record.key)
            .and_then(|n| dest_by_number.get(n))
            .cloned();
        let existing_meta = existing.as_ref().and_then(|d| metadata::read(&d.body));

        if !fingerprint::needs_write(
            existing_meta.as_ref(),
            &hash,
            &rels,
            existing.as_ref().map(|d| d.body.as_str()),
            index,
            dest_by_number,
        ) {
            return Ok(Outcome::Unchanged);
        }

        let meta = SyncMetadata {
            source_key: record.key.clone(),
            source_updated_at: record.updated,
            last_sync_time: Utc::now(),
            content_hash: hash,
            hierarchy_level: level,
            parent_source_key: rels.parent.as_ref().map(|p| p.target_key.clone()),
            parent_dest_number: rels
                .parent
                .as_ref()
                .and_then(|p| index.get(&p.target_key))
                .copied(),
            child_source_keys: rels.children.iter().map(|c| c.target_key.clone()).collect(),
            origin_link: record.url.clone(),
        };
        let body = self.compose_body(record, &rels, index, dest_by_number, &meta);

        let mut labels = vec![self.config.sync.sync_label.clone()];
        labels.extend(record.labels.iter().cloned());
        let open = self
            .mapping
            .forward_state(&record.status)
            .map(|s| s == DestState::Open);
        let payload = DestRecordPayload {
            title: record.summary.clone(),
            body,
            open,
            labels,
        };

        match existing {
            Some(dest) => {
                if !ctx.dry_run {
                    self.dest.update_record(dest.number, &payload).await?;
                }
                let mut updated = dest.clone();
                updated.title = payload.title;
                updated.body = payload.body;
                if let Some(open) = payload.open {
                    updated.open = open;
                }
                if !payload.labels.is_empty() {
                    updated.labels = payload.labels;
                }
                dest_by_number.insert(dest.number, updated);
                self.link_parent(record, &rels, index, parent_of, dest.number, ctx)
                    .await?;
                Ok(Outcome::Updated(dest.number))
            }
            None => {
                if ctx.dry_run {
                    info!(key = %record.key, "dry-run: would create destination record");
                    return Ok(Outcome::Created(0));
                }
                let created = self.dest.create_record(&payload).await?;
                index.insert(record.key.clone(), created.number);
                dest_by_number.insert(created.number, created.clone());
                self.link_parent(record, &rels, index, parent_of, created.number, ctx)
                    .await?;
                Ok(Outcome::Created(created.number))
            }
        }
    }

    fn compose_body(
        &self,
        record: &SourceRecord,
        rels: &Relationships,
        index: &HashMap<String, u64>,
        dest_by_number: &HashMap<u64, DestRecord>,
        meta: &SyncMetadata,
    ) -> String {
        let mut sections: Vec<String> = Vec::new();
        if let Some(desc) = &record.description {
            let markdown = adf_to_markdown(desc);
            if !markdown.is_empty() {
                sections.push(markdown);
            }
        }
        let refs = hierarchy::render_cross_references(
            rels,
            index,
            dest_by_number,
            self.source.browse_base(),
        );
        if !refs.is_empty() {
            sections.push(refs.trim_end().to_string());
        }
        sections.push(format!("_Synced from [{}]({})_", record.key, record.url));
        metadata::write(&sections.join("\n\n"), meta)
    }

    async fn link_parent(
        &self,
        record: &SourceRecord,
        rels: &Relationships,
        index: &HashMap<String, u64>,
        parent_of: &HashMap<String, String>,
        child_number: u64,
        ctx: &mut SyncContext,
    ) -> Result<(), SyncError> {
        if !self.config.hierarchy.enabled || child_number == 0 {
            return Ok(());
        }
        let Some(parent) = &rels.parent else {
            return Ok(());
        };
        // Parent not mirrored yet: the link gets established on a later run
        // once the parent has its own destination record.
        let Some(&parent_number) = index.get(&parent.target_key) else {
            return Ok(());
        };
        let depth = chain_depth(parent_of, &record.key);
        if depth > self.config.hierarchy.max_depth {
            ctx.warn(format!(
                "{} sits {depth} levels deep, past the destination nesting ceiling ({}); leaving it unlinked at top level",
                record.key, self.config.hierarchy.max_depth
            ));
            return Ok(());
        }
        if !ctx.dry_run {
            self.dest
                .ensure_child_in_parent_task_list(parent_number, child_number)
                .await?;
        }
        Ok(())
    }

    async fn status_pass(
        &self,
        dest_by_number: &mut HashMap<u64, DestRecord>,
        source_records: &[SourceRecord],
        ctx: &mut SyncContext,
        summary: &mut SyncSummary,
    ) {
        let source_by_key: HashMap<&str, &SourceRecord> =
            source_records.iter().map(|r| (r.key.as_str(), r)).collect();

        let mut store = BodyStore::new();
        let mut numbers: Vec<u64> = dest_by_number.keys().copied().collect();
        numbers.sort_unstable();
        for &n in &numbers {
            if let Some(d) = dest_by_number.get(&n) {
                store.load(n, d.body.clone());
            }
        }

        for number in numbers {
            let Some(dest) = dest_by_number.get(&number).cloned() else {
                continue;
            };
            let Some(meta) = store.read(number) else {
                continue;
            };
            if let Err(err) = self
                .reconcile_status(&dest, &meta, &source_by_key, &mut store, ctx, summary)
                .await
            {
                summary.errored += 1;
                ctx.fail(&format!("#{number} ({})", meta.source_key), &err);
            }
        }

        // Flush stale-metadata cleanups. This runs even in dry-run mode: it
        // repairs broken state rather than creating new state.
        for number in store.take_dirty() {
            let Some(dest) = dest_by_number.get(&number) else {
                continue;
            };
            let payload = DestRecordPayload {
                title: dest.title.clone(),
                body: store.body(number).unwrap_or_default().to_string(),
                open: None,
                labels: vec![],
            };
            match self.dest.update_record(number, &payload).await {
                Ok(()) => {
                    summary.stale_cleaned += 1;
                    if let Some(d) = dest_by_number.get_mut(&number) {
                        d.body = payload.body;
                    }
                }
                Err(err) => {
                    summary.errored += 1;
                    ctx.fail(&format!("#{number}"), &err);
                }
            }
        }
    }

    async fn reconcile_status(
        &self,
        dest: &DestRecord,
        meta: &SyncMetadata,
        source_by_key: &HashMap<&str, &SourceRecord>,
        store: &mut BodyStore,
        ctx: &mut SyncContext,
        summary: &mut SyncSummary,
    ) -> Result<(), SyncError> {
        let source = match source_by_key.get(meta.source_key.as_str()) {
            Some(r) => Some((*r).clone()),
            None => self.source.get_record(&meta.source_key).await?,
        };

        let Some(source) = source else {
            // The linked source record is gone. Not an error: drop the
            // metadata so the destination record stops pretending.
            if store.remove(dest.number) {
                ctx.warn(format!(
                    "#{}: source record {} no longer exists; removing sync metadata",
                    dest.number, meta.source_key
                ));
            }
            return Ok(());
        };

        match self.mapping.plan(dest, &source) {
            StatusPlan::NoOp => {}
            StatusPlan::Ambiguous(candidates) => {
                ctx.warn(format!(
                    "#{}: destination state maps to several source statuses ({}); skipping rather than guessing",
                    dest.number,
                    candidates.join(", ")
                ));
            }
            StatusPlan::Transition(target) => {
                let transitions = self.source.list_transitions(&source.key).await?;
                match find_transition(&transitions, &target) {
                    None => ctx.warn(format!(
                        "{}: no legal workflow transition to '{target}' from '{}'",
                        source.key, source.status
                    )),
                    Some(transition) => {
                        if !ctx.dry_run {
                            self.source.transition(&source.key, &transition.id).await?;
                        }
                        summary.transitions_applied += 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn comment_pass(
        &self,
        index: &HashMap<String, u64>,
        ctx: &mut SyncContext,
        summary: &mut SyncSummary,
    ) {
        let mut pairs: Vec<(&String, &u64)> = index.iter().collect();
        pairs.sort_by_key(|(_, n)| **n);

        for (key, &number) in pairs {
            if let Err(err) = self.sync_comments(key, number, ctx, summary).await {
                summary.errored += 1;
                ctx.fail(&format!("{key} <-> #{number}"), &err);
            }
        }
    }

    async fn sync_comments(
        &self,
        key: &str,
        number: u64,
        ctx: &mut SyncContext,
        summary: &mut SyncSummary,
    ) -> Result<(), SyncError> {
        let source_comments = self.source.get_comments(key).await?;
        let dest_comments = self.dest.get_comments(number).await?;

        for comment in &source_comments {
            if should_sync(comment, &dest_comments) {
                if !ctx.dry_run {
                    self.dest
                        .add_comment(number, &format_mirror(comment, Utc::now()))
                        .await?;
                }
                summary.comments_synced += 1;
            }
        }
        for comment in &dest_comments {
            if should_sync(comment, &source_comments) {
                if !ctx.dry_run {
                    let text = format_mirror(comment, Utc::now());
                    self.source.add_comment(key, &text_to_adf(&text)).await?;
                }
                summary.comments_synced += 1;
            }
        }
        Ok(())
    }
}

/// Levels between `key` and the top of its parent chain, with a guard
/// against cyclic link data.
fn chain_depth(parent_of: &HashMap<String, String>, key: &str) -> u32 {
    let mut depth = 0;
    let mut current = key;
    let mut seen: HashSet<&str> = HashSet::new();
    while let Some(parent) = parent_of.get(current) {
        if !seen.insert(parent.as_str()) || depth > 32 {
            break;
        }
        depth += 1;
        current = parent;
    }
    depth
}
