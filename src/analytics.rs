use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::domain::{DifferentialRecord, GroupId, GroupPair, validate_records};
use crate::error::KiraError;

pub const GO_BIOLOGICAL_PROCESS: &str = "GO_Biological_Process_2023";
pub const KEGG_HUMAN: &str = "KEGG_2021_Human";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub samples: u64,
    pub genes: u64,
    pub taxa: u64,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Summary {
    pub fn group_ids(&self) -> Result<Vec<GroupId>, KiraError> {
        self.groups.iter().map(|group| group.parse()).collect()
    }

    /// The first two study groups, which the dashboard preselects.
    pub fn default_pair(&self) -> Option<GroupPair> {
        match self.groups.as_slice() {
            [first, second, ..] => GroupPair::parse(first, second).ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentTerm {
    pub term: String,
    pub p_value: f64,
    #[serde(default)]
    pub adj_p_value: Option<f64>,
    #[serde(default)]
    pub genes: Vec<String>,
}

/// Enrichment terms per gene-set library, e.g. GO biological process or KEGG.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrichmentResult {
    pub libraries: BTreeMap<String, Vec<EnrichmentTerm>>,
}

impl EnrichmentResult {
    pub fn library(&self, name: &str) -> &[EnrichmentTerm] {
        self.libraries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.values().all(Vec::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(rename = "preferredName_A")]
    pub protein_a: String,
    #[serde(rename = "preferredName_B")]
    pub protein_b: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugTarget {
    pub gene: String,
    pub drug: String,
    #[serde(rename = "interaction_type", default)]
    pub interaction_types: Vec<String>,
    /// DGIdb leaves the score empty for some curated interactions.
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiversitySample {
    #[serde(rename = "Sample")]
    pub sample: String,
    pub shannon: f64,
    pub simpson: f64,
    #[serde(rename = "PC1", default)]
    pub pc1: Option<f64>,
    #[serde(rename = "PC2", default)]
    pub pc2: Option<f64>,
    #[serde(rename = "Disease severity")]
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlsScore {
    #[serde(rename = "Sample")]
    pub sample: String,
    pub comp1_x: f64,
    #[serde(default)]
    pub comp2_x: Option<f64>,
    pub comp1_y: f64,
    #[serde(default)]
    pub comp2_y: Option<f64>,
    #[serde(rename = "Disease severity", default)]
    pub group: Option<String>,
}

/// Gene x taxon Spearman correlations; `z[row][col]` pairs `y[row]` with `x[col]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub z: Vec<Vec<f64>>,
    pub x: Vec<String>,
    pub y: Vec<String>,
}

impl CorrelationMatrix {
    pub fn validate(&self) -> Result<(), String> {
        if self.z.len() != self.y.len() {
            return Err(format!(
                "{} rows for {} genes",
                self.z.len(),
                self.y.len()
            ));
        }
        for (index, row) in self.z.iter().enumerate() {
            if row.len() != self.x.len() {
                return Err(format!(
                    "row {index} has {} cells for {} taxa",
                    row.len(),
                    self.x.len()
                ));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }
}

pub type CompositionRow = Map<String, Value>;

#[async_trait]
pub trait AnalyticsClient: Send + Sync {
    async fn summary(&self) -> Result<Summary, KiraError>;
    async fn differential_expression(
        &self,
        pair: &GroupPair,
    ) -> Result<Vec<DifferentialRecord>, KiraError>;
    async fn enrichment(&self, genes: &[String]) -> Result<EnrichmentResult, KiraError>;
    async fn interactions(&self, genes: &[String]) -> Result<Vec<Interaction>, KiraError>;
    async fn drug_targets(&self, genes: &[String]) -> Result<Vec<DrugTarget>, KiraError>;
    async fn diversity(&self) -> Result<Vec<DiversitySample>, KiraError>;
    async fn composition(&self) -> Result<Vec<CompositionRow>, KiraError>;
    async fn correlation(&self) -> Result<CorrelationMatrix, KiraError>;
    async fn integration(&self) -> Result<Vec<PlsScore>, KiraError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        self.base_delay * (attempt as u32 + 1)
    }
}

#[derive(Serialize)]
struct GeneList<'a> {
    genes: &'a [String],
}

#[derive(Clone)]
pub struct HttpAnalyticsClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpAnalyticsClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-od/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::ApiHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|err| KiraError::ApiHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            retry: config.retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, KiraError>
    where
        F: FnMut() -> RequestBuilder + Send,
    {
        let mut attempt = 0usize;
        loop {
            match make_req().send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.retry.max_retries && is_retryable_status(status) {
                        let delay = self.retry.delay_for_attempt(attempt);
                        debug!(status, attempt, ?delay, "retrying analytics request");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.retry.max_retries && is_retryable_error(&err) {
                        let delay = self.retry.delay_for_attempt(attempt);
                        debug!(%err, attempt, ?delay, "retrying analytics request");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::ApiHttp(err.to_string()));
                }
            }
        }
    }

    async fn read_body(response: Response) -> Result<String, KiraError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .map(|body| error_detail(&body))
                .unwrap_or_else(|_| "analytics request failed".to_string());
            return Err(KiraError::ApiStatus { status, message });
        }
        response
            .text()
            .await
            .map_err(|err| KiraError::ApiHttp(err.to_string()))
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<String, KiraError> {
        let url = self.url(path);
        let response = self
            .send_with_retries(|| self.client.get(&url).query(query))
            .await?;
        Self::read_body(response).await
    }

    async fn post_genes(&self, path: &str, genes: &[String]) -> Result<String, KiraError> {
        let url = self.url(path);
        let body = GeneList { genes };
        let response = self
            .send_with_retries(|| self.client.post(&url).json(&body))
            .await?;
        Self::read_body(response).await
    }
}

#[async_trait]
impl AnalyticsClient for HttpAnalyticsClient {
    async fn summary(&self) -> Result<Summary, KiraError> {
        let body = self.get("summary", &[]).await?;
        decode_summary(&body)
    }

    async fn differential_expression(
        &self,
        pair: &GroupPair,
    ) -> Result<Vec<DifferentialRecord>, KiraError> {
        let query = [
            ("group1", pair.group1.as_str()),
            ("group2", pair.group2.as_str()),
        ];
        let body = self.get("transcriptomics/dea", &query).await?;
        decode_differential(&body)
    }

    async fn enrichment(&self, genes: &[String]) -> Result<EnrichmentResult, KiraError> {
        let body = self.post_genes("transcriptomics/enrichment", genes).await?;
        decode_enrichment(&body)
    }

    async fn interactions(&self, genes: &[String]) -> Result<Vec<Interaction>, KiraError> {
        let body = self.post_genes("transcriptomics/ppi", genes).await?;
        decode_interactions(&body)
    }

    async fn drug_targets(&self, genes: &[String]) -> Result<Vec<DrugTarget>, KiraError> {
        let body = self.post_genes("transcriptomics/drugs", genes).await?;
        decode_drug_targets(&body)
    }

    async fn diversity(&self) -> Result<Vec<DiversitySample>, KiraError> {
        let body = self.get("metagenomics/diversity", &[]).await?;
        decode_diversity(&body)
    }

    async fn composition(&self) -> Result<Vec<CompositionRow>, KiraError> {
        let body = self.get("metagenomics/composition", &[]).await?;
        decode("composition", &body)
    }

    async fn correlation(&self) -> Result<CorrelationMatrix, KiraError> {
        let body = self.get("biomarkers/correlation", &[]).await?;
        decode_correlation(&body)
    }

    async fn integration(&self) -> Result<Vec<PlsScore>, KiraError> {
        let body = self.get("biomarkers/integration", &[]).await?;
        decode_integration(&body)
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T, KiraError> {
    serde_json::from_str(body).map_err(|err| KiraError::payload(endpoint, err.to_string()))
}

pub fn decode_summary(body: &str) -> Result<Summary, KiraError> {
    let summary: Summary = decode("summary", body)?;
    summary
        .group_ids()
        .map_err(|err| KiraError::payload("summary", err.to_string()))?;
    Ok(summary)
}

pub fn decode_differential(body: &str) -> Result<Vec<DifferentialRecord>, KiraError> {
    let records: Vec<DifferentialRecord> = decode("differential expression", body)?;
    validate_records(&records)
        .map_err(|message| KiraError::payload("differential expression", message))?;
    Ok(records)
}

pub fn decode_enrichment(body: &str) -> Result<EnrichmentResult, KiraError> {
    let result: EnrichmentResult = decode("enrichment", body)?;
    for (library, terms) in &result.libraries {
        if let Some(term) = terms.iter().find(|term| !is_p_value(term.p_value)) {
            return Err(KiraError::payload(
                "enrichment",
                format!("{library}: term {:?} has p_value {}", term.term, term.p_value),
            ));
        }
    }
    Ok(result)
}

pub fn decode_interactions(body: &str) -> Result<Vec<Interaction>, KiraError> {
    let interactions: Vec<Interaction> = decode("interaction", body)?;
    if let Some(bad) = interactions.iter().find(|edge| !edge.score.is_finite()) {
        return Err(KiraError::payload(
            "interaction",
            format!("{}-{} has a non-finite score", bad.protein_a, bad.protein_b),
        ));
    }
    Ok(interactions)
}

pub fn decode_drug_targets(body: &str) -> Result<Vec<DrugTarget>, KiraError> {
    let targets: Vec<DrugTarget> = decode("drug target", body)?;
    if let Some(bad) = targets
        .iter()
        .find(|target| target.gene.trim().is_empty() || target.drug.trim().is_empty())
    {
        return Err(KiraError::payload(
            "drug target",
            format!("blank gene or drug in {bad:?}"),
        ));
    }
    Ok(targets)
}

pub fn decode_diversity(body: &str) -> Result<Vec<DiversitySample>, KiraError> {
    decode("diversity", body)
}

pub fn decode_correlation(body: &str) -> Result<CorrelationMatrix, KiraError> {
    let matrix: CorrelationMatrix = decode("correlation", body)?;
    matrix
        .validate()
        .map_err(|message| KiraError::payload("correlation", message))?;
    Ok(matrix)
}

pub fn decode_integration(body: &str) -> Result<Vec<PlsScore>, KiraError> {
    decode("integration", body)
}

fn is_p_value(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

/// FastAPI reports failures as `{"detail": ...}`; fall back to the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("detail").cloned())
        .map(|detail| match detail {
            Value::String(text) => text,
            other => other.to_string(),
        })
        .unwrap_or_else(|| body.to_string())
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
