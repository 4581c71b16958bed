//! Labelled training datasets.
//!
//! Two generators feed the single-window trainer:
//! - rolling: features from a lookback snapshot, growth-rate labels against
//!   the current 1D snapshot;
//! - dated: per-day features with absolute-activity labels from the
//!   following days, concatenated over a date range.

use crate::forecast::context::PipelineContext;
use crate::forecast::error::{PipelineError, Result};
use crate::forecast::features::{ContractFeatureVector, FeatureName, FeatureTable};
use crate::forecast::labels::{fetch_forward_window, Labels};
use crate::forecast::logs::{csv_escape, split_csv_line, LogWindow, Lookback};
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::fmt::Write;
use tracing::{info, warn};

pub const ROLLING_DATASET_KEY: &str = "training/rolling_training_dataset.csv";
pub const DATED_DATASET_KEY: &str = "training/dated_training_dataset.csv";

pub fn rolling_dataset_key(lookback: Lookback) -> String {
    format!("training/rolling_training_dataset_{}.csv", lookback.key_suffix())
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    pub contract_address: String,
    pub date: Option<NaiveDate>,
    pub values: Vec<f64>,
    pub label: bool,
}

/// Rows of (features, label) with a fixed column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabeledDataset {
    pub features: Vec<FeatureName>,
    pub rows: Vec<DatasetRow>,
}

impl LabeledDataset {
    pub fn new(features: Vec<FeatureName>) -> Self {
        Self {
            features,
            rows: Vec::new(),
        }
    }

    /// Append every contract that has a label; unlabelled contracts are dropped.
    pub fn extend_labeled(
        &mut self,
        vectors: &[ContractFeatureVector],
        labels: &Labels,
        date: Option<NaiveDate>,
    ) -> usize {
        let before = self.rows.len();
        for fv in vectors {
            if let Some(&label) = labels.get(&fv.contract_address) {
                self.rows.push(DatasetRow {
                    contract_address: fv.contract_address.clone(),
                    date,
                    values: fv.row(&self.features),
                    label,
                });
            }
        }
        self.rows.len() - before
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.rows.iter().filter(|r| r.label).count()
    }

    pub fn x(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.values.clone()).collect()
    }

    pub fn y(&self) -> Vec<bool> {
        self.rows.iter().map(|r| r.label).collect()
    }

    pub fn select(&self, indices: &[usize]) -> (Vec<Vec<f64>>, Vec<bool>) {
        indices
            .iter()
            .filter_map(|&i| self.rows.get(i))
            .map(|r| (r.values.clone(), r.label))
            .unzip()
    }

    pub fn to_csv(&self) -> String {
        let has_date = self.rows.iter().any(|r| r.date.is_some());
        let mut out = String::from("contract_address");
        if has_date {
            out.push_str(",date");
        }
        for f in &self.features {
            out.push(',');
            out.push_str(f.as_str());
        }
        out.push_str(",label\n");

        for row in &self.rows {
            out.push_str(&csv_escape(&row.contract_address));
            if has_date {
                out.push(',');
                if let Some(d) = row.date {
                    out.push_str(&d.format("%Y-%m-%d").to_string());
                }
            }
            for v in &row.values {
                let _ = write!(out, ",{}", v);
            }
            let _ = writeln!(out, ",{}", u8::from(row.label));
        }
        out
    }

    /// Parse a dataset; feature columns are the canonical ones present, in
    /// canonical order. Unknown columns are ignored.
    pub fn from_csv(text: &str) -> Result<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| PipelineError::malformed("dataset is empty"))?;
        let columns: HashMap<String, usize> = split_csv_line(header)
            .into_iter()
            .enumerate()
            .map(|(i, c)| (c.trim().to_string(), i))
            .collect();

        let label_col = *columns.get("label").ok_or_else(|| {
            PipelineError::malformed("dataset missing 'label' column (generate it first)")
        })?;
        let contract_col = columns
            .get("contract_address")
            .or_else(|| columns.get("contract"))
            .copied();
        let date_col = columns.get("date").copied();
        let features: Vec<FeatureName> = FeatureName::ALL
            .into_iter()
            .filter(|f| columns.contains_key(f.as_str()))
            .collect();
        let feature_cols: Vec<usize> = features.iter().map(|f| columns[f.as_str()]).collect();

        let mut rows = Vec::new();
        for (i, line) in lines.enumerate() {
            let fields = split_csv_line(line);
            let field = |col: usize| fields.get(col).map(|s| s.trim()).unwrap_or("");
            let bad = |what: &str| PipelineError::malformed(format!("dataset row {}: invalid {}", i + 1, what));

            let label = match field(label_col) {
                "1" | "1.0" | "true" | "True" => true,
                "0" | "0.0" | "false" | "False" => false,
                _ => return Err(bad("label")),
            };
            let values = feature_cols
                .iter()
                .zip(&features)
                .map(|(&c, f)| {
                    let raw = field(c);
                    if raw.is_empty() {
                        Ok(0.0)
                    } else {
                        raw.parse::<f64>().map_err(|_| bad(f.as_str()))
                    }
                })
                .collect::<Result<Vec<f64>>>()?;
            let date = match date_col.map(field).filter(|s| !s.is_empty()) {
                Some(s) => Some(NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| bad("date"))?),
                None => None,
            };

            rows.push(DatasetRow {
                contract_address: contract_col.map(field).unwrap_or_default().to_string(),
                date,
                values,
                label,
            });
        }

        Ok(Self { features, rows })
    }
}

// =============================================================================
// GENERATORS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub key: String,
    pub rows: usize,
    pub positives: usize,
    pub skipped_days: Vec<NaiveDate>,
}

/// Rolling dataset for one lookback; the forward volume comes from
/// `outcome` (defaults to the lookback itself).
pub fn generate_rolling_dataset(
    ctx: &PipelineContext,
    lookback: Lookback,
    outcome: Option<Lookback>,
) -> Result<DatasetSummary> {
    let outcome = outcome.unwrap_or(lookback);
    let historical = ctx.fetch(LogWindow::Rolling(lookback))?;
    let current = ctx.fetch(LogWindow::Rolling(Lookback::OneDay))?;
    let future = if outcome == lookback {
        historical.clone()
    } else {
        ctx.fetch(LogWindow::Rolling(outcome))?
    };

    let table = FeatureTable::build(&historical, &ctx.centrality)?;
    let labels = ctx.label_generator().growth_rate(&current, &future);

    let mut dataset = LabeledDataset::new(FeatureName::ALL.to_vec());
    dataset.extend_labeled(&table.vectors, &labels, None);
    if dataset.is_empty() {
        return Err(PipelineError::Training(format!(
            "no labelled contracts for lookback {}",
            lookback
        )));
    }

    let key = rolling_dataset_key(lookback);
    ctx.artifacts.put(&key, dataset.to_csv().as_bytes())?;
    info!(
        "Rolling dataset {}: {} rows, {} positive (features {}, outcome {})",
        key,
        dataset.len(),
        dataset.positives(),
        lookback,
        outcome
    );
    Ok(DatasetSummary {
        key,
        rows: dataset.len(),
        positives: dataset.positives(),
        skipped_days: Vec::new(),
    })
}

/// Dated dataset over `start..=end`. Days without logs or without any
/// forward logs are skipped; a malformed day aborts only that day.
pub fn generate_dated_dataset(
    ctx: &PipelineContext,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<DatasetSummary> {
    let generator = ctx.label_generator();
    let mut dataset = LabeledDataset::new(FeatureName::ALL.to_vec());
    let mut skipped_days = Vec::new();

    let mut day = start;
    while day <= end {
        let outcome = ctx.window_features(LogWindow::Day(day)).and_then(|table| {
            let future = fetch_forward_window(ctx.logs.as_ref(), day, ctx.config.labels.forward_days)?;
            Ok((table, generator.absolute_activity(&future)))
        });

        match outcome {
            Ok((table, labels)) => {
                let added = dataset.extend_labeled(&table.vectors, &labels, Some(day));
                info!("{}: {} labelled rows", day, added);
            }
            Err(e) => {
                warn!("Skipping {}: {}", day, e);
                skipped_days.push(day);
            }
        }
        day += Duration::days(1);
    }

    if dataset.is_empty() {
        return Err(PipelineError::missing_window(format!(
            "no usable days between {} and {}",
            start, end
        )));
    }

    ctx.artifacts.put(DATED_DATASET_KEY, dataset.to_csv().as_bytes())?;
    info!(
        "Dated dataset {}: {} rows from {} days ({} skipped)",
        DATED_DATASET_KEY,
        dataset.len(),
        (end - start).num_days() + 1 - skipped_days.len() as i64,
        skipped_days.len()
    );
    Ok(DatasetSummary {
        key: DATED_DATASET_KEY.to_string(),
        rows: dataset.len(),
        positives: dataset.positives(),
        skipped_days,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_roundtrip_with_dates() {
        let mut dataset = LabeledDataset::new(FeatureName::ACTIVITY.to_vec());
        dataset.rows.push(DatasetRow {
            contract_address: "0xa".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 2),
            values: vec![3.0, 40.0],
            label: true,
        });
        dataset.rows.push(DatasetRow {
            contract_address: "0xb".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 3),
            values: vec![1.0, 0.5],
            label: false,
        });

        let parsed = LabeledDataset::from_csv(&dataset.to_csv()).unwrap();
        assert_eq!(parsed, dataset);
    }

    #[test]
    fn test_from_csv_uses_canonical_columns_present() {
        let text = "contract,min_block,activity_span,tx_count,volume_growth_pct,label\n\
                    0xa,5,10,2,33.3,1\n\
                    0xb,6,0,1,-5.0,0\n";
        let parsed = LabeledDataset::from_csv(text).unwrap();
        assert_eq!(parsed.features, FeatureName::ACTIVITY.to_vec());
        assert_eq!(parsed.rows[0].values, vec![2.0, 10.0]);
        assert_eq!(parsed.rows[0].contract_address, "0xa");
        assert_eq!(parsed.y(), vec![true, false]);
    }

    #[test]
    fn test_missing_label_column() {
        let err = LabeledDataset::from_csv("tx_count,activity_span\n1,2\n").unwrap_err();
        assert!(err.to_string().contains("generate it first"));
    }

    #[test]
    fn test_extend_labeled_drops_unlabelled() {
        let fv = |a: &str| ContractFeatureVector {
            contract_address: a.into(),
            tx_count: 1,
            min_block: 0,
            max_block: 0,
            activity_span: 0,
            betweenness_centrality: 0.0,
            closeness_centrality: 0.0,
            eigenvector_centrality: 0.0,
        };
        let labels: Labels = [("a".to_string(), true)].into_iter().collect();
        let mut dataset = LabeledDataset::new(FeatureName::ALL.to_vec());
        assert_eq!(dataset.extend_labeled(&[fv("a"), fv("b")], &labels, None), 1);
        assert_eq!(dataset.rows[0].values.len(), 5);
    }
}
