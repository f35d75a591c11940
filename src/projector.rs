//! Pure reshaping of analysis results into table- and chart-ready values.
//!
//! Nothing here performs I/O or mutates its input; every function returns a
//! freshly derived value.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::analytics::EnrichmentTerm;
use crate::domain::{DifferentialRecord, SortDirection, SortKey, SortSpec};
use crate::error::KiraError;

/// Thresholds deciding which features are significant, and how many of them
/// are forwarded to the secondary analyses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignificanceGate {
    /// Strict upper bound on the raw p-value.
    pub max_p_value: f64,
    /// Strict lower bound on |logFC|.
    pub min_abs_log_fc: f64,
    pub cascade_cap: usize,
}

impl Default for SignificanceGate {
    fn default() -> Self {
        Self {
            max_p_value: 0.01,
            min_abs_log_fc: 2.0,
            cascade_cap: 100,
        }
    }
}

impl SignificanceGate {
    pub fn passes(&self, record: &DifferentialRecord) -> bool {
        record.p_value < self.max_p_value && record.log_fc.abs() > self.min_abs_log_fc
    }

    pub fn filter(&self, records: &[DifferentialRecord]) -> Vec<DifferentialRecord> {
        records
            .iter()
            .filter(|record| self.passes(record))
            .cloned()
            .collect()
    }

    /// Gene ids for the cascade: the first `cascade_cap` passing records in
    /// array order, not ranked by strength.
    pub fn feature_set(&self, records: &[DifferentialRecord]) -> Vec<String> {
        records
            .iter()
            .filter(|record| self.passes(record))
            .take(self.cascade_cap)
            .map(|record| record.gene.clone())
            .collect()
    }
}

pub fn filter_significant(records: &[DifferentialRecord]) -> Vec<DifferentialRecord> {
    SignificanceGate::default().filter(records)
}

/// Stable sort on a copy of `records`. `None` keeps the order as received.
/// A missing adjusted p-value orders after every number.
pub fn sort_by(records: &[DifferentialRecord], spec: Option<&SortSpec>) -> Vec<DifferentialRecord> {
    let mut sorted = records.to_vec();
    if let Some(spec) = spec {
        sorted.sort_by(|a, b| {
            let ordering = compare_on(a, b, spec.key);
            match spec.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });
    }
    sorted
}

fn compare_on(a: &DifferentialRecord, b: &DifferentialRecord, key: SortKey) -> Ordering {
    match key {
        SortKey::Gene => a.gene.cmp(&b.gene),
        SortKey::LogFc => a.log_fc.total_cmp(&b.log_fc),
        SortKey::PValue => a.p_value.total_cmp(&b.p_value),
        SortKey::AdjPValue => match (a.adj_p_value, b.adj_p_value) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    }
}

/// Column-header click: ascending flips to descending on the same key,
/// anything else starts ascending on `key`.
pub fn toggle_sort(current: Option<&SortSpec>, key: SortKey) -> SortSpec {
    match current {
        Some(spec) if spec.key == key && spec.direction == SortDirection::Asc => {
            SortSpec::descending(key)
        }
        _ => SortSpec::ascending(key),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series<K, V> {
    pub group: K,
    pub values: Vec<V>,
}

/// Splits `items` into one series per distinct group, in order of first
/// appearance, keeping item order inside each series.
pub fn group_series<T, K, V>(
    items: &[T],
    key: impl Fn(&T) -> K,
    value: impl Fn(&T) -> V,
) -> Vec<Series<K, V>>
where
    K: PartialEq,
{
    let mut series: Vec<Series<K, V>> = Vec::new();
    for item in items {
        let group = key(item);
        match series.iter_mut().find(|existing| existing.group == group) {
            Some(existing) => existing.values.push(value(item)),
            None => series.push(Series {
                group,
                values: vec![value(item)],
            }),
        }
    }
    series
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySeries {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WideTable {
    pub row_ids: Vec<String>,
    pub series: Vec<CategorySeries>,
}

/// Turns sample-per-row records (`{Sample, TaxonA, TaxonB, ...}`) into one
/// numeric series per category. Categories come from the first row, in its
/// key order; every other row must carry exactly the same set.
pub fn pivot_wide(rows: &[Map<String, Value>], row_key: &str) -> Result<WideTable, KiraError> {
    let Some(first) = rows.first() else {
        return Ok(WideTable::default());
    };
    let categories: Vec<&String> = first.keys().filter(|key| key.as_str() != row_key).collect();

    let mut table = WideTable {
        row_ids: Vec::with_capacity(rows.len()),
        series: categories
            .iter()
            .map(|name| CategorySeries {
                name: (*name).clone(),
                values: Vec::with_capacity(rows.len()),
            })
            .collect(),
    };

    for (index, row) in rows.iter().enumerate() {
        let row_id = row
            .get(row_key)
            .and_then(Value::as_str)
            .ok_or_else(|| KiraError::SchemaMismatch {
                row: index,
                detail: format!("missing string column {row_key:?}"),
            })?;

        let column_count = row.keys().filter(|key| key.as_str() != row_key).count();
        if column_count != categories.len() {
            return Err(KiraError::SchemaMismatch {
                row: index,
                detail: format!(
                    "{column_count} category columns, expected {}",
                    categories.len()
                ),
            });
        }

        for (name, series) in categories.iter().zip(table.series.iter_mut()) {
            let value = row
                .get(name.as_str())
                .ok_or_else(|| KiraError::SchemaMismatch {
                    row: index,
                    detail: format!("missing column {name:?}"),
                })?
                .as_f64()
                .ok_or_else(|| KiraError::SchemaMismatch {
                    row: index,
                    detail: format!("column {name:?} is not numeric"),
                })?;
            series.values.push(value);
        }
        table.row_ids.push(row_id.to_string());
    }

    Ok(table)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Regulation {
    Up,
    Down,
    NotSignificant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolcanoPoint {
    pub gene: String,
    pub x: f64,
    pub y: f64,
    pub regulation: Regulation,
}

pub fn classify(record: &DifferentialRecord, gate: &SignificanceGate) -> Regulation {
    if record.p_value >= gate.max_p_value {
        Regulation::NotSignificant
    } else if record.log_fc > gate.min_abs_log_fc {
        Regulation::Up
    } else if record.log_fc < -gate.min_abs_log_fc {
        Regulation::Down
    } else {
        Regulation::NotSignificant
    }
}

/// Every record, not just the significant ones: x is logFC, y is -log10(p).
pub fn volcano_points(records: &[DifferentialRecord], gate: &SignificanceGate) -> Vec<VolcanoPoint> {
    records
        .iter()
        .map(|record| VolcanoPoint {
            gene: record.gene.clone(),
            x: record.log_fc,
            y: neg_log10(record.p_value),
            regulation: classify(record, gate),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentBar {
    pub label: String,
    pub term_id: Option<String>,
    pub score: f64,
}

static TERM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^(]*)(?:\(([^)]*)\))?").expect("valid term regex"));

/// Bars for a horizontal enrichment chart; "Inflammatory Response
/// (GO:0006954)" becomes label "Inflammatory Response", id "GO:0006954".
pub fn enrichment_bars(terms: &[EnrichmentTerm]) -> Vec<EnrichmentBar> {
    terms
        .iter()
        .map(|term| {
            let captures = TERM_RE.captures(&term.term);
            let label = captures
                .as_ref()
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            let term_id = captures
                .as_ref()
                .and_then(|caps| caps.get(2))
                .map(|m| m.as_str().trim().to_string())
                .filter(|id| !id.is_empty());
            EnrichmentBar {
                label,
                term_id,
                score: neg_log10(term.p_value),
            }
        })
        .collect()
}

/// Clamped to the smallest positive float so a zero p-value stays finite.
fn neg_log10(p_value: f64) -> f64 {
    -p_value.max(f64::MIN_POSITIVE).log10()
}
