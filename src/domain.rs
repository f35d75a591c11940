use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if normalized.is_empty() {
            return Err(KiraError::InvalidGroup(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Two study groups to compare. A group may be compared with itself; the
/// service decides what a degenerate comparison returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPair {
    pub group1: GroupId,
    pub group2: GroupId,
}

impl GroupPair {
    pub fn new(group1: GroupId, group2: GroupId) -> Self {
        Self { group1, group2 }
    }

    pub fn parse(group1: &str, group2: &str) -> Result<Self, KiraError> {
        Ok(Self::new(group1.parse()?, group2.parse()?))
    }

    pub fn is_self_comparison(&self) -> bool {
        self.group1 == self.group2
    }
}

impl fmt::Display for GroupPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs {}", self.group1, self.group2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferentialRecord {
    pub gene: String,
    #[serde(rename = "logFC")]
    pub log_fc: f64,
    pub p_value: f64,
    #[serde(default)]
    pub adj_p_value: Option<f64>,
}

impl DifferentialRecord {
    pub fn new(gene: &str, log_fc: f64, p_value: f64, adj_p_value: Option<f64>) -> Self {
        Self {
            gene: gene.to_string(),
            log_fc,
            p_value,
            adj_p_value,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.gene.trim().is_empty() {
            return Err("blank gene identifier".to_string());
        }
        if !self.log_fc.is_finite() {
            return Err(format!("{}: logFC is not finite", self.gene));
        }
        if !is_probability(self.p_value) {
            return Err(format!("{}: p_value {} outside (0, 1]", self.gene, self.p_value));
        }
        if let Some(adj) = self.adj_p_value {
            if !is_probability(adj) {
                return Err(format!("{}: adj_p_value {adj} outside (0, 1]", self.gene));
            }
        }
        Ok(())
    }
}

fn is_probability(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

/// Checks a full primary response: every record must be valid and gene ids
/// must be unique within the set.
pub fn validate_records(records: &[DifferentialRecord]) -> Result<(), String> {
    let mut seen = HashSet::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        record
            .validate()
            .map_err(|message| format!("record {index}: {message}"))?;
        if !seen.insert(record.gene.as_str()) {
            return Err(format!("record {index}: duplicate gene {}", record.gene));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum SortKey {
    #[serde(rename = "gene")]
    #[value(name = "gene")]
    Gene,
    #[serde(rename = "logFC")]
    #[value(name = "logFC")]
    LogFc,
    #[serde(rename = "p_value")]
    #[value(name = "p_value")]
    PValue,
    #[serde(rename = "adj_p_value")]
    #[value(name = "adj_p_value")]
    AdjPValue,
}

impl SortKey {
    pub fn column(&self) -> &'static str {
        match self {
            SortKey::Gene => "gene",
            SortKey::LogFc => "logFC",
            SortKey::PValue => "p_value",
            SortKey::AdjPValue => "adj_p_value",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column())
    }
}

impl FromStr for SortKey {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "gene" => Ok(SortKey::Gene),
            "logFC" => Ok(SortKey::LogFc),
            "p_value" => Ok(SortKey::PValue),
            "adj_p_value" => Ok(SortKey::AdjPValue),
            _ => Err(KiraError::InvalidSortKey(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn ascending(key: SortKey) -> Self {
        Self {
            key,
            direction: SortDirection::Asc,
        }
    }

    pub fn descending(key: SortKey) -> Self {
        Self {
            key,
            direction: SortDirection::Desc,
        }
    }
}
