use std::collections::HashMap;

use serde::Deserialize;

use crate::model::record::{DestRecord, SourceRecord, Transition};

/// Observed state on the destination side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestState {
    Open,
    Closed,
}

/// One configured mapping: source status -> destination state, optionally
/// narrowed by a destination label.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRule {
    pub source_status: String,
    pub dest_state: DestState,
    #[serde(default)]
    pub dest_label: Option<String>,
}

/// Inverse of the configured rules: destination state (and optional label)
/// -> candidate source statuses. Built as its own step so ambiguity
/// detection is testable independently of transition application.
#[derive(Debug, Default)]
pub struct StatusMapping {
    buckets: HashMap<(DestState, Option<String>), Vec<String>>,
    forward: HashMap<String, DestState>,
}

/// Outcome of planning a destination -> source status reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusPlan {
    /// Apply a workflow transition toward this source status.
    Transition(String),
    /// Several source statuses collapse onto the observed destination
    /// state; never guess, skip and report the candidates.
    Ambiguous(Vec<String>),
    NoOp,
}

impl StatusMapping {
    pub fn from_rules(rules: &[StatusRule]) -> Self {
        let mut buckets: HashMap<(DestState, Option<String>), Vec<String>> = HashMap::new();
        let mut forward = HashMap::new();
        for rule in rules {
            buckets
                .entry((rule.dest_state, rule.dest_label.clone()))
                .or_default()
                .push(rule.source_status.clone());
            forward.insert(rule.source_status.to_ascii_lowercase(), rule.dest_state);
        }
        Self { buckets, forward }
    }

    /// Forward direction: which destination state a source status maps to.
    /// Many-to-one by construction, so never ambiguous.
    pub fn forward_state(&self, source_status: &str) -> Option<DestState> {
        self.forward
            .get(&source_status.to_ascii_lowercase())
            .copied()
    }

    /// Candidate source statuses for a destination record's observed state.
    /// Label-narrowed buckets take precedence over the unlabeled bucket
    /// when the record carries a matching label.
    pub fn candidates(&self, dest: &DestRecord) -> Vec<String> {
        let state = if dest.open {
            DestState::Open
        } else {
            DestState::Closed
        };
        let mut labeled: Vec<String> = Vec::new();
        for label in &dest.labels {
            if let Some(bucket) = self.buckets.get(&(state, Some(label.clone()))) {
                labeled.extend(bucket.iter().cloned());
            }
        }
        if !labeled.is_empty() {
            return labeled;
        }
        self.buckets
            .get(&(state, None))
            .cloned()
            .unwrap_or_default()
    }

    /// Plan the reconciliation for one linked pair. Fires only when the
    /// inverse mapping is unambiguous and the source is not already there.
    pub fn plan(&self, dest: &DestRecord, source: &SourceRecord) -> StatusPlan {
        let mut candidates = self.candidates(dest);
        match candidates.len() {
            0 => StatusPlan::NoOp,
            1 => {
                let target = candidates.pop().unwrap_or_default();
                if target.eq_ignore_ascii_case(&source.status) {
                    StatusPlan::NoOp
                } else {
                    StatusPlan::Transition(target)
                }
            }
            _ => StatusPlan::Ambiguous(candidates),
        }
    }
}

/// Locate the workflow transition that lands on `target_status` among the
/// transitions currently legal for the record. Source systems move records
/// along an explicit workflow graph, so a raw status overwrite is never an
/// option.
pub fn find_transition<'a>(
    transitions: &'a [Transition],
    target_status: &str,
) -> Option<&'a Transition> {
    transitions
        .iter()
        .find(|t| t.to_status.eq_ignore_ascii_case(target_status))
}
