use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analytics::{DrugTarget, EnrichmentResult, Interaction};
use crate::domain::{DifferentialRecord, GroupPair, SortSpec};
use crate::projector::{SignificanceGate, sort_by};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    PrimaryRunning,
    PrimaryFailed,
    PrimarySucceeded,
    DoneNoSecondary,
    SecondaryRunning,
    SecondaryDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryKind {
    Enrichment,
    Interaction,
    DrugTarget,
}

/// The transient state behind one analysis view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisSessionState {
    /// The comparison that produced `records`.
    pub pair: Option<GroupPair>,
    /// The comparison of the latest primary query, successful or not.
    pub requested_pair: Option<GroupPair>,
    pub records: Vec<DifferentialRecord>,
    pub sort: Option<SortSpec>,
    pub enrichment: Option<EnrichmentResult>,
    pub interactions: Option<Vec<Interaction>>,
    pub drug_targets: Option<Vec<DrugTarget>>,
    pub primary_busy: bool,
    pub secondary_busy: bool,
    pub generation: u64,
    pub phase: Phase,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisSessionState {
    /// Invalidates everything tied to the previous run and returns the new
    /// generation. Must happen before the primary request goes out.
    pub(crate) fn begin_primary(&mut self, pair: GroupPair) -> u64 {
        self.generation += 1;
        self.requested_pair = Some(pair);
        self.clear_secondary();
        self.secondary_busy = false;
        self.primary_busy = true;
        self.last_error = None;
        self.phase = Phase::PrimaryRunning;
        self.generation
    }

    pub(crate) fn finish_primary(&mut self, records: Vec<DifferentialRecord>) {
        self.pair = self.requested_pair.clone();
        self.records = records;
        self.primary_busy = false;
        self.completed_at = Some(Utc::now());
        self.phase = Phase::PrimarySucceeded;
    }

    /// Leaves the previous records and their pair in place so a failed re-run
    /// keeps the view.
    pub(crate) fn fail_primary(&mut self, message: String) {
        self.primary_busy = false;
        self.last_error = Some(message);
        self.phase = Phase::PrimaryFailed;
    }

    pub(crate) fn clear_secondary(&mut self) {
        self.enrichment = None;
        self.interactions = None;
        self.drug_targets = None;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn has_secondary(&self, kind: SecondaryKind) -> bool {
        match kind {
            SecondaryKind::Enrichment => self.enrichment.is_some(),
            SecondaryKind::Interaction => self.interactions.is_some(),
            SecondaryKind::DrugTarget => self.drug_targets.is_some(),
        }
    }

    /// Significant records in the current sort order, as the table shows them.
    pub fn significant_view(&self, gate: &SignificanceGate) -> Vec<DifferentialRecord> {
        sort_by(&gate.filter(&self.records), self.sort.as_ref())
    }
}
