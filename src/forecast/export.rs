//! Flat tabular outputs: the ranked contract list and the walk-forward
//! performance history.

use crate::forecast::error::{PipelineError, Result};
use crate::forecast::logs::{csv_escape, split_csv_line};
use crate::forecast::metrics::ClassificationMetrics;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;

// =============================================================================
// RANKED LIST
// =============================================================================

/// One model's share in a contract's combined score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowContribution {
    pub window: String,
    pub weight: f64,
    /// Served by the unscoped default model.
    pub fallback: bool,
}

impl std::fmt::Display for WindowContribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:.0}%)", self.window, self.weight * 100.0)?;
        if self.fallback {
            f.write_str("*fallback")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedContract {
    pub rank: usize,
    pub contract_address: String,
    pub combined_score: f64,
    pub tx_count: u64,
    pub activity_span: u64,
    pub token_display: String,
    pub all_tokens: Vec<String>,
    pub contributions: Vec<WindowContribution>,
}

impl RankedContract {
    pub fn contributing_windows(&self) -> String {
        self.contributions
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

pub const RANKED_HEADER: &str =
    "rank,contract_address,combined_score,tx_count,activity_span,token_display,all_tokens,contributing_windows";

pub fn ranked_to_csv(rows: &[RankedContract]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", RANKED_HEADER);
    for r in rows {
        let _ = writeln!(
            out,
            "{},{},{:.6},{},{},{},{},{}",
            r.rank,
            csv_escape(&r.contract_address),
            r.combined_score,
            r.tx_count,
            r.activity_span,
            csv_escape(&r.token_display),
            csv_escape(&r.all_tokens.join(", ")),
            csv_escape(&r.contributing_windows()),
        );
    }
    out
}

// =============================================================================
// PERFORMANCE HISTORY
// =============================================================================

/// One walk-forward cycle's validation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub day: u32,
    pub training_date: NaiveDate,
    pub validation_date: NaiveDate,
    pub training_samples: usize,
    pub validation_samples: usize,
    pub labeled_validation_samples: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

impl PerformanceRecord {
    pub fn metrics(&self) -> ClassificationMetrics {
        ClassificationMetrics {
            accuracy: self.accuracy,
            precision: self.precision,
            recall: self.recall,
            f1: self.f1_score,
        }
    }

    /// Eligible for best-model selection.
    pub fn has_labeled_validation(&self) -> bool {
        self.labeled_validation_samples > 0
    }
}

pub const PERFORMANCE_HEADER: &str = "day,training_date,validation_date,training_samples,validation_samples,\
labeled_validation_samples,accuracy,precision,recall,f1_score";

pub fn performance_to_csv(records: &[PerformanceRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", PERFORMANCE_HEADER);
    for r in records {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{:.6},{:.6},{:.6},{:.6}",
            r.day,
            r.training_date.format("%Y-%m-%d"),
            r.validation_date.format("%Y-%m-%d"),
            r.training_samples,
            r.validation_samples,
            r.labeled_validation_samples,
            r.accuracy,
            r.precision,
            r.recall,
            r.f1_score,
        );
    }
    out
}

/// Parse a performance table. Older tables without
/// `labeled_validation_samples` read it as `validation_samples`.
pub fn performance_from_csv(text: &str) -> Result<Vec<PerformanceRecord>> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: HashMap<String, usize> = split_csv_line(header)
        .into_iter()
        .enumerate()
        .map(|(i, c)| (c.trim().to_string(), i))
        .collect();

    let mut records = Vec::new();
    for (row, line) in lines.enumerate() {
        let fields = split_csv_line(line);
        let get = |name: &str| -> Result<String> {
            columns
                .get(name)
                .and_then(|&i| fields.get(i))
                .map(|s| s.trim().to_string())
                .ok_or_else(|| {
                    PipelineError::malformed(format!("performance row {}: missing '{}'", row + 1, name))
                })
        };
        let bad = |name: &str| {
            PipelineError::malformed(format!("performance row {}: invalid '{}'", row + 1, name))
        };
        let date = |name: &str| -> Result<NaiveDate> {
            NaiveDate::parse_from_str(&get(name)?, "%Y-%m-%d").map_err(|_| bad(name))
        };
        let count = |name: &str| -> Result<usize> { get(name)?.parse().map_err(|_| bad(name)) };
        let ratio = |name: &str| -> Result<f64> { get(name)?.parse().map_err(|_| bad(name)) };

        let validation_samples = count("validation_samples")?;
        records.push(PerformanceRecord {
            day: get("day")?.parse().map_err(|_| bad("day"))?,
            training_date: date("training_date")?,
            validation_date: date("validation_date")?,
            training_samples: count("training_samples")?,
            validation_samples,
            labeled_validation_samples: if columns.contains_key("labeled_validation_samples") {
                count("labeled_validation_samples")?
            } else {
                validation_samples
            },
            accuracy: ratio("accuracy")?,
            precision: ratio("precision")?,
            recall: ratio("recall")?,
            f1_score: ratio("f1_score")?,
        });
    }
    Ok(records)
}

/// Highest-F1 record among those with labelled validation rows.
/// Ties go to the earliest day.
pub fn best_record(records: &[PerformanceRecord]) -> Option<&PerformanceRecord> {
    records
        .iter()
        .filter(|r| r.has_labeled_validation())
        .fold(None, |best: Option<&PerformanceRecord>, r| match best {
            Some(b) if b.f1_score >= r.f1_score => Some(b),
            _ => Some(r),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(day: u32, f1: f64, labeled: usize) -> PerformanceRecord {
        let training_date = NaiveDate::from_ymd_opt(2025, 1, day).unwrap();
        PerformanceRecord {
            day,
            training_date,
            validation_date: training_date.succ_opt().unwrap(),
            training_samples: 8,
            validation_samples: 12,
            labeled_validation_samples: labeled,
            accuracy: 0.5,
            precision: 0.25,
            recall: 1.0,
            f1_score: f1,
        }
    }

    #[test]
    fn test_performance_csv_roundtrip() {
        let records = vec![record(1, 0.4, 10), record(2, 0.75, 0)];
        let csv = performance_to_csv(&records);
        assert!(csv.starts_with(PERFORMANCE_HEADER));
        assert_eq!(performance_from_csv(&csv).unwrap(), records);
    }

    #[test]
    fn test_legacy_table_without_labeled_column() {
        let csv = "day,training_date,validation_date,training_samples,validation_samples,accuracy,precision,recall,f1_score\n\
                   3,2025-02-01,2025-02-02,40,50,0.9,0.5,0.4,0.44\n";
        let records = performance_from_csv(csv).unwrap();
        assert_eq!(records[0].labeled_validation_samples, 50);
        assert_eq!(records[0].day, 3);
    }

    #[test]
    fn test_best_record_skips_unlabelled() {
        let records = vec![record(1, 0.4, 10), record(2, 0.9, 0), record(3, 0.6, 4), record(4, 0.6, 4)];
        assert_eq!(best_record(&records).map(|r| r.day), Some(3));
        assert_eq!(best_record(&[record(1, 1.0, 0)]), None);
    }

    #[test]
    fn test_ranked_csv_renders_contributions() {
        let row = RankedContract {
            rank: 1,
            contract_address: "0xabc".into(),
            combined_score: 0.5,
            tx_count: 12,
            activity_span: 300,
            token_display: "USDC / DAI".into(),
            all_tokens: vec!["USDC".into(), "DAI".into()],
            contributions: vec![
                WindowContribution {
                    window: "1D".into(),
                    weight: 0.40,
                    fallback: false,
                },
                WindowContribution {
                    window: "3D".into(),
                    weight: 0.35,
                    fallback: true,
                },
            ],
        };
        let csv = ranked_to_csv(&[row]);
        let line = csv.lines().nth(1).unwrap();
        assert_eq!(
            line,
            "1,0xabc,0.500000,12,300,USDC / DAI,\"USDC, DAI\",1D(40%) + 3D(35%)*fallback"
        );
    }
}
