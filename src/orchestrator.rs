use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analytics::AnalyticsClient;
use crate::domain::{DifferentialRecord, GroupPair, SortKey, SortSpec};
use crate::error::KiraError;
use crate::export::{ExportReport, ExportSink, differential_columns, encode_table, export_file_name};
use crate::projector::{SignificanceGate, toggle_sort};
use crate::session::{AnalysisSessionState, Phase, SecondaryKind};

#[derive(Debug)]
pub enum PrimaryOutcome {
    /// The primary query failed; the previous records are still in place.
    Failed { error: KiraError },
    /// A newer primary query started before this one answered.
    Superseded,
    NoSecondary,
    CascadeStarted(CascadeHandle),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum SlotOutcome {
    Applied,
    Failed(String),
    Stale,
}

#[derive(Debug, Clone, Serialize)]
pub struct CascadeReport {
    pub generation: u64,
    pub genes: Vec<String>,
    /// False when a newer primary query superseded this cascade.
    pub applied: bool,
    pub enrichment: SlotOutcome,
    pub interaction: SlotOutcome,
    pub drug_target: SlotOutcome,
}

#[derive(Debug)]
pub struct CascadeHandle {
    generation: u64,
    genes: Vec<String>,
    task: JoinHandle<CascadeReport>,
}

impl CascadeHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    /// Waits until all three secondary queries have settled.
    pub async fn settled(self) -> Result<CascadeReport, KiraError> {
        self.task
            .await
            .map_err(|err| KiraError::Runtime(err.to_string()))
    }
}

/// Owns the session state of one analysis view and drives the primary query
/// plus its secondary cascade.
pub struct CascadeOrchestrator<C: AnalyticsClient> {
    client: Arc<C>,
    gate: SignificanceGate,
    state: Arc<Mutex<AnalysisSessionState>>,
}

impl<C: AnalyticsClient + 'static> CascadeOrchestrator<C> {
    pub fn new(client: C, gate: SignificanceGate) -> Self {
        Self::with_shared_client(Arc::new(client), gate)
    }

    pub fn with_shared_client(client: Arc<C>, gate: SignificanceGate) -> Self {
        Self {
            client,
            gate,
            state: Arc::new(Mutex::new(AnalysisSessionState::default())),
        }
    }

    pub fn gate(&self) -> &SignificanceGate {
        &self.gate
    }

    pub fn state(&self) -> AnalysisSessionState {
        lock_state(&self.state).clone()
    }

    pub async fn run_primary_analysis(&self, pair: GroupPair) -> PrimaryOutcome {
        let generation = lock_state(&self.state).begin_primary(pair.clone());
        if pair.is_self_comparison() {
            debug!(%pair, "comparing a group with itself");
        }
        info!(%pair, generation, "running differential expression");

        let result = self.client.differential_expression(&pair).await;

        {
            let mut state = lock_state(&self.state);
            if !state.is_current(generation) {
                debug!(generation, "dropping superseded primary response");
                return PrimaryOutcome::Superseded;
            }
            match result {
                Ok(records) => {
                    info!(generation, records = records.len(), "differential expression done");
                    state.finish_primary(records);
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!(generation, error = %message, "differential expression failed");
                    state.fail_primary(message);
                    return PrimaryOutcome::Failed { error: err };
                }
            }
        }

        self.evaluate_cascade(generation)
    }

    /// Runs the significance gate once over the array stored for
    /// `generation` and fans out the secondary queries when it is non-empty.
    fn evaluate_cascade(&self, generation: u64) -> PrimaryOutcome {
        let genes = {
            let mut state = lock_state(&self.state);
            if !state.is_current(generation) {
                return PrimaryOutcome::Superseded;
            }
            let genes = self.gate.feature_set(&state.records);
            if genes.is_empty() {
                state.phase = Phase::DoneNoSecondary;
            } else {
                state.secondary_busy = true;
                state.phase = Phase::SecondaryRunning;
            }
            genes
        };

        if genes.is_empty() {
            debug!(generation, "no significant features; skipping cascade");
            return PrimaryOutcome::NoSecondary;
        }

        info!(generation, genes = genes.len(), "starting secondary cascade");
        PrimaryOutcome::CascadeStarted(self.spawn_cascade(generation, genes))
    }

    fn spawn_cascade(&self, generation: u64, genes: Vec<String>) -> CascadeHandle {
        let client = Arc::clone(&self.client);
        let state = Arc::clone(&self.state);
        let task_genes = genes.clone();
        let task = tokio::spawn(run_cascade(client, state, generation, task_genes));
        CascadeHandle {
            generation,
            genes,
            task,
        }
    }

    pub fn set_sort(&self, spec: Option<SortSpec>) {
        lock_state(&self.state).sort = spec;
    }

    pub fn toggle_sort(&self, key: SortKey) -> SortSpec {
        let mut state = lock_state(&self.state);
        let next = toggle_sort(state.sort.as_ref(), key);
        state.sort = Some(next);
        next
    }

    pub fn significant_view(&self) -> Vec<DifferentialRecord> {
        lock_state(&self.state).significant_view(&self.gate)
    }

    /// Encodes the significant records in their current order and hands the
    /// text to `sink`, named after the pair those records came from.
    pub fn export_significant(&self, sink: &dyn ExportSink) -> Result<ExportReport, KiraError> {
        let (pair, rows) = {
            let state = lock_state(&self.state);
            let pair = state.pair.clone().ok_or(KiraError::NothingToExport)?;
            (pair, state.significant_view(&self.gate))
        };
        let contents = encode_table(&rows, &differential_columns())?;
        let file_name = export_file_name(&pair);
        let location = sink.save(&file_name, &contents)?;
        info!(%location, rows = rows.len(), "exported significant features");
        Ok(ExportReport {
            file_name,
            location,
            rows: rows.len(),
            bytes: contents.len(),
        })
    }
}

async fn run_cascade<C: AnalyticsClient>(
    client: Arc<C>,
    state: Arc<Mutex<AnalysisSessionState>>,
    generation: u64,
    genes: Vec<String>,
) -> CascadeReport {
    let enrichment = async {
        let result = client.enrichment(&genes).await;
        apply_secondary(&state, generation, SecondaryKind::Enrichment, result, |s, v| {
            s.enrichment = Some(v)
        })
    };
    let interaction = async {
        let result = client.interactions(&genes).await;
        apply_secondary(&state, generation, SecondaryKind::Interaction, result, |s, v| {
            s.interactions = Some(v)
        })
    };
    let drug_target = async {
        let result = client.drug_targets(&genes).await;
        apply_secondary(&state, generation, SecondaryKind::DrugTarget, result, |s, v| {
            s.drug_targets = Some(v)
        })
    };

    let (enrichment, interaction, drug_target) = tokio::join!(enrichment, interaction, drug_target);

    let applied = {
        let mut guard = lock_state(&state);
        if guard.is_current(generation) {
            guard.secondary_busy = false;
            guard.phase = Phase::SecondaryDone;
            true
        } else {
            false
        }
    };
    info!(generation, applied, "secondary cascade settled");

    CascadeReport {
        generation,
        genes,
        applied,
        enrichment,
        interaction,
        drug_target,
    }
}

fn apply_secondary<T>(
    state: &Mutex<AnalysisSessionState>,
    generation: u64,
    kind: SecondaryKind,
    result: Result<T, KiraError>,
    store: impl FnOnce(&mut AnalysisSessionState, T),
) -> SlotOutcome {
    let mut guard = lock_state(state);
    if !guard.is_current(generation) {
        debug!(?kind, generation, "discarding stale secondary response");
        return SlotOutcome::Stale;
    }
    match result {
        Ok(value) => {
            store(&mut guard, value);
            SlotOutcome::Applied
        }
        Err(err) => {
            warn!(?kind, generation, error = %err, "secondary analysis failed");
            SlotOutcome::Failed(err.to_string())
        }
    }
}

fn lock_state(state: &Mutex<AnalysisSessionState>) -> MutexGuard<'_, AnalysisSessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
