use std::io::{self, Write};

use serde::Serialize;

use crate::analytics::{CorrelationMatrix, DrugTarget, GO_BIOLOGICAL_PROCESS, Interaction, KEGG_HUMAN};
use crate::domain::{DifferentialRecord, GroupPair, SortSpec};
use crate::export::ExportReport;
use crate::orchestrator::CascadeReport;
use crate::overview::{BiomarkerOverview, MetagenomicsOverview, OrdinationPoint, Panel};
use crate::projector::{
    EnrichmentBar, Regulation, Series, SignificanceGate, WideTable, enrichment_bars,
    volcano_points,
};
use crate::session::{AnalysisSessionState, Phase};

/// Interaction tables only show the first rows.
pub const INTERACTION_ROWS: usize = 50;

#[derive(Debug, Clone, Default, Serialize)]
pub struct VolcanoSummary {
    pub up: usize,
    pub down: usize,
    pub not_significant: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentPanel {
    pub go_biological_process: Vec<EnrichmentBar>,
    pub kegg: Vec<EnrichmentBar>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeaView {
    pub pair: Option<GroupPair>,
    pub requested_pair: Option<GroupPair>,
    pub phase: Phase,
    pub generation: u64,
    pub error: Option<String>,
    pub total_records: usize,
    pub significant_count: usize,
    pub sort: Option<SortSpec>,
    pub top: Vec<DifferentialRecord>,
    pub volcano: VolcanoSummary,
    pub secondary_busy: bool,
    pub enrichment: Option<EnrichmentPanel>,
    pub interactions: Option<Vec<Interaction>>,
    pub drug_targets: Option<Vec<DrugTarget>>,
    pub cascade: Option<CascadeReport>,
    pub export: Option<ExportReport>,
}

impl DeaView {
    pub fn build(
        state: &AnalysisSessionState,
        gate: &SignificanceGate,
        top: usize,
        cascade: Option<CascadeReport>,
        export: Option<ExportReport>,
    ) -> Self {
        let significant = state.significant_view(gate);
        let mut volcano = VolcanoSummary::default();
        for point in volcano_points(&state.records, gate) {
            match point.regulation {
                Regulation::Up => volcano.up += 1,
                Regulation::Down => volcano.down += 1,
                Regulation::NotSignificant => volcano.not_significant += 1,
            }
        }
        Self {
            pair: state.pair.clone(),
            requested_pair: state.requested_pair.clone(),
            phase: state.phase,
            generation: state.generation,
            error: state.last_error.clone(),
            total_records: state.records.len(),
            significant_count: significant.len(),
            sort: state.sort,
            top: significant.into_iter().take(top).collect(),
            volcano,
            secondary_busy: state.secondary_busy,
            enrichment: state.enrichment.as_ref().map(|result| EnrichmentPanel {
                go_biological_process: enrichment_bars(result.library(GO_BIOLOGICAL_PROCESS)),
                kegg: enrichment_bars(result.library(KEGG_HUMAN)),
            }),
            interactions: state
                .interactions
                .as_ref()
                .map(|edges| edges.iter().take(INTERACTION_ROWS).cloned().collect()),
            drug_targets: state.drug_targets.clone(),
            cascade,
            export,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetagenomicsView {
    pub composition: Option<WideTable>,
    pub composition_error: Option<String>,
    pub alpha_diversity: Vec<Series<String, f64>>,
    pub beta_diversity: Vec<Series<String, OrdinationPoint>>,
}

impl MetagenomicsView {
    pub fn build(overview: &MetagenomicsOverview) -> Self {
        let (composition, composition_error) = match overview.composition_traces() {
            Ok(table) => (Some(table), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Self {
            composition,
            composition_error,
            alpha_diversity: overview.alpha_diversity_series(),
            beta_diversity: overview.beta_diversity_series(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BiomarkerView<'a> {
    pub correlation: &'a Panel<CorrelationMatrix>,
    pub pls: Vec<Series<String, OrdinationPoint>>,
}

impl<'a> BiomarkerView<'a> {
    pub fn build(overview: &'a BiomarkerOverview) -> Self {
        Self {
            correlation: &overview.correlation,
            pls: overview.pls_series(),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
