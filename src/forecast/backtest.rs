//! One-week Precision@K backtest.
//!
//! The last `segments × blocks_per_day` blocks of a log window are cut into
//! day-sized segments. Segment `t` is labelled from the following
//! `forward_days` segments, scored by a forest trained on the pooled
//! labelled segments before it, and graded by Precision@K.
//!
//! Training labels for segment `i < t` are built from its own forward
//! segments, which may reach into `t`.

use crate::forecast::config::{BacktestConfig, ForestConfig};
use crate::forecast::context::PipelineContext;
use crate::forecast::dataset::LabeledDataset;
use crate::forecast::error::{PipelineError, Result};
use crate::forecast::features::{FeatureName, FeatureTable};
use crate::forecast::forest::RandomForest;
use crate::forecast::labels::{LabelGenerator, Labels};
use crate::forecast::logs::LogTable;
use crate::forecast::metrics::precision_at_k;
use statrs::statistics::Statistics;
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentResult {
    pub segment: usize,
    pub first_block: u64,
    pub last_block: u64,
    pub training_rows: usize,
    pub test_contracts: usize,
    pub positives: usize,
    pub k: usize,
    pub precision_at_k: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSegment {
    pub segment: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BacktestReport {
    pub segments: Vec<SegmentResult>,
    pub skipped: Vec<SkippedSegment>,
}

impl BacktestReport {
    pub fn mean_precision(&self) -> Option<f64> {
        if self.segments.is_empty() {
            return None;
        }
        Some(self.segments.iter().map(|s| s.precision_at_k).mean())
    }
}

struct Segment {
    first_block: u64,
    last_block: u64,
    logs: LogTable,
}

pub struct BacktestEvaluator {
    config: BacktestConfig,
    forest: ForestConfig,
    labels: LabelGenerator,
    forward_segments: usize,
}

impl BacktestEvaluator {
    pub fn new(
        config: BacktestConfig,
        forest: ForestConfig,
        labels: LabelGenerator,
        forward_segments: usize,
    ) -> Self {
        Self {
            config,
            forest,
            labels,
            forward_segments: forward_segments.max(1),
        }
    }

    pub fn from_context(ctx: &PipelineContext) -> Self {
        Self::new(
            ctx.config.backtest.clone(),
            ctx.config.forest.clone(),
            ctx.label_generator(),
            ctx.config.labels.forward_days as usize,
        )
    }

    fn segment(&self, logs: &LogTable) -> Result<Vec<Segment>> {
        let max_block = logs
            .max_block()
            .ok_or_else(|| PipelineError::missing_window("backtest window"))?;
        let bpd = self.config.blocks_per_day.max(1);
        let start = (max_block + 1).saturating_sub(self.config.segments as u64 * bpd);

        Ok((0..self.config.segments as u64)
            .map(|i| {
                let first_block = start + i * bpd;
                let last_block = first_block + bpd - 1;
                Segment {
                    first_block,
                    last_block,
                    logs: logs.block_range(first_block, last_block),
                }
            })
            .collect())
    }

    /// Labels for segment `t` from its forward segments; `None` when `t`
    /// has no forward segment.
    fn forward_labels(&self, segments: &[Segment], t: usize) -> Option<Labels> {
        let end = (t + self.forward_segments).min(segments.len() - 1);
        if t + 1 > end {
            return None;
        }
        let future = LogTable::concat(segments[t + 1..=end].iter().map(|s| &s.logs));
        Some(self.labels.absolute_activity(&future))
    }

    pub fn run(&self, logs: &LogTable) -> Result<BacktestReport> {
        let segments = self.segment(logs)?;
        let features = segments
            .iter()
            .map(|s| FeatureTable::activity_only(&s.logs))
            .collect::<Result<Vec<_>>>()?;
        let labels: Vec<Option<Labels>> = (0..segments.len())
            .map(|t| self.forward_labels(&segments, t))
            .collect();

        let mut report = BacktestReport::default();
        for t in 0..segments.len() {
            let Some(test_labels) = &labels[t] else {
                continue;
            };
            let skip = |reason: &str| SkippedSegment {
                segment: t,
                reason: reason.to_string(),
            };

            let mut train = LabeledDataset::new(FeatureName::ACTIVITY.to_vec());
            for i in 0..t {
                if let Some(l) = &labels[i] {
                    train.extend_labeled(&features[i].vectors, l, None);
                }
            }
            if train.is_empty() {
                warn!("Segment {}: no training history", t);
                report.skipped.push(skip("no training history"));
                continue;
            }
            if features[t].is_empty() || test_labels.is_empty() {
                warn!("Segment {}: no test data", t);
                report.skipped.push(skip("no test data"));
                continue;
            }

            let forest = RandomForest::fit(&train.x(), &train.y(), &self.forest)?;
            let test = &features[t].vectors;
            let probs: Vec<f64> = test
                .iter()
                .map(|fv| forest.predict_proba_one(&fv.row(&train.features)))
                .collect();
            let mut order: Vec<usize> = (0..test.len()).collect();
            order.sort_by(|&a, &b| {
                probs[b]
                    .total_cmp(&probs[a])
                    .then_with(|| test[a].contract_address.cmp(&test[b].contract_address))
            });
            let ranked: Vec<String> = order
                .into_iter()
                .map(|i| test[i].contract_address.clone())
                .collect();

            let truth: HashSet<String> = test_labels
                .iter()
                .filter(|(_, &label)| label)
                .map(|(c, _)| c.clone())
                .collect();
            let k = self.config.top_k.min(ranked.len());
            let precision = precision_at_k(&ranked, &truth, k);
            info!(
                "Segment {} (blocks {}-{}): Precision@{} = {:.3} ({} training rows, {} positives)",
                t,
                segments[t].first_block,
                segments[t].last_block,
                k,
                precision,
                train.len(),
                truth.len()
            );

            report.segments.push(SegmentResult {
                segment: t,
                first_block: segments[t].first_block,
                last_block: segments[t].last_block,
                training_rows: train.len(),
                test_contracts: test.len(),
                positives: truth.len(),
                k,
                precision_at_k: precision,
            });
        }

        match report.mean_precision() {
            Some(mean) => info!(
                "Backtest mean Precision@{} over {} segments: {:.3}",
                self.config.top_k,
                report.segments.len(),
                mean
            ),
            None => warn!("Backtest produced no evaluable segments"),
        }
        Ok(report)
    }
}
