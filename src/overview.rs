use serde::Serialize;
use tracing::warn;

use crate::analytics::{
    AnalyticsClient, CompositionRow, CorrelationMatrix, DiversitySample, PlsScore,
};
use crate::error::KiraError;
use crate::projector::{Series, WideTable, group_series, pivot_wide};

/// Either the loaded value or the message of the failure that replaced it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Panel<T> {
    Loaded(T),
    Unavailable(String),
}

impl<T> Panel<T> {
    fn from_result(name: &str, result: Result<T, KiraError>) -> Self {
        match result {
            Ok(value) => Panel::Loaded(value),
            Err(err) => {
                warn!(panel = name, error = %err, "overview panel unavailable");
                Panel::Unavailable(err.to_string())
            }
        }
    }

    pub fn loaded(&self) -> Option<&T> {
        match self {
            Panel::Loaded(value) => Some(value),
            Panel::Unavailable(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrdinationPoint {
    pub sample: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetagenomicsOverview {
    pub composition: Panel<Vec<CompositionRow>>,
    pub diversity: Panel<Vec<DiversitySample>>,
}

impl MetagenomicsOverview {
    pub async fn load<C: AnalyticsClient + ?Sized>(client: &C) -> Self {
        let (composition, diversity) = tokio::join!(client.composition(), client.diversity());
        Self {
            composition: Panel::from_result("composition", composition),
            diversity: Panel::from_result("diversity", diversity),
        }
    }

    /// One stacked-bar series per genus across samples.
    pub fn composition_traces(&self) -> Result<WideTable, KiraError> {
        match self.composition.loaded() {
            Some(rows) => pivot_wide(rows, "Sample"),
            None => Ok(WideTable::default()),
        }
    }

    /// Shannon index per severity group, for box plots.
    pub fn alpha_diversity_series(&self) -> Vec<Series<String, f64>> {
        let samples = self.diversity.loaded().map(Vec::as_slice).unwrap_or(&[]);
        group_series(samples, |s| s.group.clone(), |s| s.shannon)
    }

    /// PCoA coordinates per severity group. Empty when the service returned
    /// no ordination for the first sample.
    pub fn beta_diversity_series(&self) -> Vec<Series<String, OrdinationPoint>> {
        let samples = self.diversity.loaded().map(Vec::as_slice).unwrap_or(&[]);
        if samples.first().and_then(|s| s.pc1).is_none() {
            return Vec::new();
        }
        let placed: Vec<&DiversitySample> = samples
            .iter()
            .filter(|s| s.pc1.is_some() && s.pc2.is_some())
            .collect();
        group_series(
            &placed,
            |s| s.group.clone(),
            |s| OrdinationPoint {
                sample: s.sample.clone(),
                x: s.pc1.unwrap_or_default(),
                y: s.pc2.unwrap_or_default(),
            },
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BiomarkerOverview {
    pub correlation: Panel<CorrelationMatrix>,
    pub integration: Panel<Vec<PlsScore>>,
}

impl BiomarkerOverview {
    pub async fn load<C: AnalyticsClient + ?Sized>(client: &C) -> Self {
        let (correlation, integration) = tokio::join!(client.correlation(), client.integration());
        Self {
            correlation: Panel::from_result("correlation", correlation),
            integration: Panel::from_result("integration", integration),
        }
    }

    /// First latent component of each block (transcriptome on x, microbiome
    /// on y) grouped by severity. Samples without metadata share one group.
    pub fn pls_series(&self) -> Vec<Series<String, OrdinationPoint>> {
        let scores = self.integration.loaded().map(Vec::as_slice).unwrap_or(&[]);
        group_series(
            scores,
            |s| s.group.clone().unwrap_or_else(|| "Unknown".to_string()),
            |s| OrdinationPoint {
                sample: s.sample.clone(),
                x: s.comp1_x,
                y: s.comp1_y,
            },
        )
    }
}
