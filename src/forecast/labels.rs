//! Forward-looking binary labels.
//!
//! Both modes threshold a metric at its own quantile over the batch and
//! label every contract at or above the threshold. Contracts without
//! forward-window data get no label at all.

use crate::forecast::config::LabelConfig;
use crate::forecast::error::{PipelineError, Result};
use crate::forecast::logs::{LogSource, LogTable, LogWindow};
use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Contract address -> high-growth label.
pub type Labels = BTreeMap<String, bool>;

/// Threshold for quantile `q`: the sorted value at index `min(ceil(q·n), n−1)`.
/// `None` for an empty batch.
pub fn quantile_threshold(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let idx = ((q.clamp(0.0, 1.0) * n as f64) - 1e-9).ceil().max(0.0) as usize;
    Some(sorted[idx.min(n - 1)])
}

fn label_by_quantile(metric: &BTreeMap<String, f64>, q: f64) -> Labels {
    let values: Vec<f64> = metric.values().copied().collect();
    let Some(threshold) = quantile_threshold(&values, q) else {
        return Labels::new();
    };
    metric
        .iter()
        .map(|(contract, v)| (contract.clone(), *v >= threshold))
        .collect()
}

fn tx_counts(logs: &LogTable) -> BTreeMap<String, f64> {
    let mut counts = BTreeMap::new();
    for event in logs.events() {
        *counts.entry(event.contract_address.clone()).or_insert(0.0) += 1.0;
    }
    counts
}

/// Percentage growth with `+1` smoothing on the baseline.
pub fn growth_pct(current: f64, future: f64) -> f64 {
    (future - current) / (current + 1.0) * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelGenerator {
    pub activity_quantile: f64,
    pub growth_quantile: f64,
}

impl LabelGenerator {
    pub fn new(config: &LabelConfig) -> Self {
        Self {
            activity_quantile: config.activity_quantile,
            growth_quantile: config.growth_quantile,
        }
    }

    /// Label on future transaction count over the forward window.
    pub fn absolute_activity(&self, future: &LogTable) -> Labels {
        label_by_quantile(&tx_counts(future), self.activity_quantile)
    }

    /// Label on percentage growth from `current` volume to `future` volume.
    /// Only contracts seen in the future window are labelled; a contract
    /// absent from `current` has baseline 0.
    pub fn growth_rate(&self, current: &LogTable, future: &LogTable) -> Labels {
        label_by_quantile(&self.growth_table(current, future), self.growth_quantile)
    }

    /// Growth percentage per future-window contract.
    pub fn growth_table(&self, current: &LogTable, future: &LogTable) -> BTreeMap<String, f64> {
        let baseline: HashMap<String, f64> = tx_counts(current).into_iter().collect();
        tx_counts(future)
            .into_iter()
            .map(|(contract, fut)| {
                let cur = baseline.get(&contract).copied().unwrap_or(0.0);
                (contract, growth_pct(cur, fut))
            })
            .collect()
    }
}

// =============================================================================
// OUTCOME LABELERS
// =============================================================================

/// Concatenate dated logs for `day+1 ..= day+days`. Missing days are
/// skipped; `MissingWindowData` only when none exist.
pub fn fetch_forward_window(source: &dyn LogSource, day: NaiveDate, days: u32) -> Result<LogTable> {
    let mut parts = Vec::new();
    for offset in 1..=days as i64 {
        let future_day = day + Duration::days(offset);
        match source.fetch(LogWindow::Day(future_day)) {
            Ok(table) => parts.push(table),
            Err(e) if e.is_skippable() => {
                debug!("Forward day {} unavailable: {}", future_day, e);
            }
            Err(e) => return Err(e),
        }
    }
    if parts.is_empty() {
        return Err(PipelineError::missing_window(format!(
            "forward window after {} ({} days)",
            day, days
        )));
    }
    Ok(LogTable::concat(parts.iter()))
}

/// Supplies ground-truth outcome labels for a day's contracts.
pub trait OutcomeLabeler: Send + Sync {
    fn label_outcomes(&self, source: &dyn LogSource, day: NaiveDate) -> Result<Labels>;
}

/// Absolute-activity labels over the next `forward_days` days of logs.
pub struct ForwardActivityLabeler {
    generator: LabelGenerator,
    forward_days: u32,
}

impl ForwardActivityLabeler {
    pub fn new(generator: LabelGenerator, forward_days: u32) -> Self {
        Self {
            generator,
            forward_days,
        }
    }

    pub fn from_config(config: &LabelConfig) -> Self {
        Self::new(LabelGenerator::new(config), config.forward_days)
    }
}

impl OutcomeLabeler for ForwardActivityLabeler {
    fn label_outcomes(&self, source: &dyn LogSource, day: NaiveDate) -> Result<Labels> {
        let future = fetch_forward_window(source, day, self.forward_days)?;
        let labels = self.generator.absolute_activity(&future);
        if labels.is_empty() {
            warn!("Forward window after {} has no contracts", day);
        }
        Ok(labels)
    }
}

/// Fixed labels per day (fixtures and externally sourced outcomes).
#[derive(Default)]
pub struct StaticOutcomeLabeler {
    by_day: HashMap<NaiveDate, Labels>,
}

impl StaticOutcomeLabeler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, day: NaiveDate, labels: Labels) -> Self {
        self.by_day.insert(day, labels);
        self
    }
}

impl OutcomeLabeler for StaticOutcomeLabeler {
    fn label_outcomes(&self, _source: &dyn LogSource, day: NaiveDate) -> Result<Labels> {
        self.by_day
            .get(&day)
            .cloned()
            .ok_or_else(|| PipelineError::missing_window(format!("outcomes for {}", day)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::logs::{LogEvent, MemoryLogSource};

    fn logs(counts: &[(&str, usize)]) -> LogTable {
        let mut events = Vec::new();
        for (contract, n) in counts {
            for i in 0..*n {
                events.push(LogEvent {
                    transaction_id: format!("{}-{}", contract, i),
                    contract_address: contract.to_string(),
                    input_token: "A".into(),
                    output_token: "B".into(),
                    block_number: i as u64,
                });
            }
        }
        LogTable::new(events)
    }

    fn generator() -> LabelGenerator {
        LabelGenerator::new(&LabelConfig::default())
    }

    #[test]
    fn test_quantile_threshold_index() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(quantile_threshold(&values, 0.9), Some(10.0));
        assert_eq!(quantile_threshold(&values, 0.8), Some(9.0));
        assert_eq!(quantile_threshold(&[], 0.9), None);
        assert_eq!(quantile_threshold(&[3.0], 0.9), Some(3.0));
    }

    #[test]
    fn test_absolute_activity_labels_top_decile() {
        let counts: Vec<(String, usize)> = (0..20).map(|i| (format!("c{:02}", i), i + 1)).collect();
        let refs: Vec<(&str, usize)> = counts.iter().map(|(c, n)| (c.as_str(), *n)).collect();
        let labels = generator().absolute_activity(&logs(&refs));

        assert_eq!(labels.len(), 20);
        let positives: Vec<&String> = labels.iter().filter(|(_, l)| **l).map(|(c, _)| c).collect();
        assert_eq!(positives, vec!["c18", "c19"]);
    }

    #[test]
    fn test_positive_fraction_bounded() {
        for n in [10usize, 20, 37, 100] {
            let counts: Vec<(String, usize)> = (0..n).map(|i| (format!("c{}", i), i + 1)).collect();
            let refs: Vec<(&str, usize)> = counts.iter().map(|(c, k)| (c.as_str(), *k)).collect();
            let labels = generator().absolute_activity(&logs(&refs));
            let frac = labels.values().filter(|l| **l).count() as f64 / n as f64;
            assert!(frac <= 0.1 + 1e-9, "n={} frac={}", n, frac);
        }
    }

    #[test]
    fn test_small_batches_label_at_least_one() {
        // Below ten contracts the top value is always positive
        for n in 1usize..10 {
            let counts: Vec<(String, usize)> = (0..n).map(|i| (format!("c{}", i), i + 1)).collect();
            let refs: Vec<(&str, usize)> = counts.iter().map(|(c, k)| (c.as_str(), *k)).collect();
            let labels = generator().absolute_activity(&logs(&refs));
            let positives: Vec<&String> = labels.iter().filter(|(_, l)| **l).map(|(c, _)| c).collect();
            assert_eq!(positives, vec![&format!("c{}", n - 1)], "n={}", n);
        }
        let single = generator().absolute_activity(&logs(&[("only", 3)]));
        assert_eq!(single.get("only"), Some(&true));
    }

    #[test]
    fn test_ties_at_threshold_all_labelled() {
        let labels = generator().absolute_activity(&logs(&[
            ("a", 1),
            ("b", 1),
            ("c", 1),
            ("d", 5),
            ("e", 5),
        ]));
        assert!(labels["d"] && labels["e"]);
        assert!(!labels["a"]);
    }

    #[test]
    fn test_growth_rate_smoothing_and_scope() {
        let current = logs(&[("a", 10), ("b", 1), ("gone", 50)]);
        let future = logs(&[("a", 11), ("b", 3), ("new", 4)]);
        let table = generator().growth_table(&current, &future);

        assert_eq!(table.len(), 3);
        assert!((table["a"] - 100.0 / 11.0).abs() < 1e-9);
        assert!((table["b"] - 100.0).abs() < 1e-9);
        assert!((table["new"] - 400.0).abs() < 1e-9);
        assert!(!table.contains_key("gone"));

        let labels = generator().growth_rate(&current, &future);
        assert_eq!(labels.get("new"), Some(&true));
        assert_eq!(labels.get("a"), Some(&false));
    }

    #[test]
    fn test_empty_future_yields_no_labels() {
        assert!(generator().absolute_activity(&LogTable::default()).is_empty());
    }

    #[test]
    fn test_forward_window_skips_missing_days() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let source = MemoryLogSource::new()
            .with(LogWindow::Day(day + Duration::days(2)), logs(&[("a", 2)]))
            .with(LogWindow::Day(day + Duration::days(3)), logs(&[("a", 1), ("b", 1)]));

        let window = fetch_forward_window(&source, day, 3).unwrap();
        assert_eq!(window.len(), 4);

        let err = fetch_forward_window(&source, day + Duration::days(3), 3).unwrap_err();
        assert!(matches!(err, PipelineError::MissingWindowData(_)));
    }
}
