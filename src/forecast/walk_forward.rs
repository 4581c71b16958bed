//! Walk-Forward Trainer
//!
//! Cycle `i` trains on day `start + (i-1)·validation_days` and validates on
//! the training day plus `validation_days`:
//!
//! ```text
//! fetch day(i) ─► features + centrality ─► label vs day(i)+1..=+3
//!      ─► 80/20 fit ─► score day(i+v) ─► outcome labels ─► record ─► persist
//! ```
//!
//! Training rows come only from the training day, which is strictly before
//! the validation day. A cycle that cannot complete is recorded as a
//! [`SkippedCycle`] and the loop moves on.

use crate::forecast::artifacts::{ModelArtifact, ModelTag};
use crate::forecast::context::PipelineContext;
use crate::forecast::dataset::LabeledDataset;
use crate::forecast::error::{PipelineError, Result};
use crate::forecast::export::PerformanceRecord;
use crate::forecast::features::FeatureName;
use crate::forecast::labels::{ForwardActivityLabeler, OutcomeLabeler};
use crate::forecast::logs::LogWindow;
use crate::forecast::metrics::ClassificationMetrics;
use crate::forecast::training::fit_dataset;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeSet;
use tracing::{error, info, warn};

/// A cycle that produced no record.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedCycle {
    pub day: u32,
    pub date: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub record: PerformanceRecord,
    pub model_key: String,
    /// Dates whose feature rows went into training.
    pub training_days: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct WalkForwardReport {
    pub cycles: Vec<CycleOutcome>,
    pub skipped: Vec<SkippedCycle>,
}

impl WalkForwardReport {
    pub fn records(&self) -> Vec<PerformanceRecord> {
        self.cycles.iter().map(|c| c.record.clone()).collect()
    }

    /// Mean metrics over cycles with labelled validation rows.
    pub fn mean_metrics(&self) -> Option<ClassificationMetrics> {
        let scored: Vec<ClassificationMetrics> = self
            .cycles
            .iter()
            .filter(|c| c.record.has_labeled_validation())
            .map(|c| c.record.metrics())
            .collect();
        (!scored.is_empty()).then(|| ClassificationMetrics::mean(&scored))
    }
}

pub struct WalkForwardTrainer<'a> {
    ctx: &'a PipelineContext,
    training_labeler: ForwardActivityLabeler,
    outcome_labeler: Box<dyn OutcomeLabeler + 'a>,
    validation_days: u32,
}

impl<'a> WalkForwardTrainer<'a> {
    /// Validation outcomes default to absolute-activity labels over each
    /// validation day's forward window.
    pub fn new(ctx: &'a PipelineContext, validation_days: u32) -> Self {
        Self {
            ctx,
            training_labeler: ForwardActivityLabeler::from_config(&ctx.config.labels),
            outcome_labeler: Box::new(ForwardActivityLabeler::from_config(&ctx.config.labels)),
            validation_days: validation_days.max(1),
        }
    }

    pub fn with_outcome_labeler(mut self, labeler: Box<dyn OutcomeLabeler + 'a>) -> Self {
        self.outcome_labeler = labeler;
        self
    }

    /// Run cycles until the training day passes `end`, then append the
    /// cycle records to the cumulative performance history.
    pub fn run(&self, start: NaiveDate, end: NaiveDate) -> Result<WalkForwardReport> {
        info!(
            "Walk-forward from {} to {} (validation window {} day(s))",
            start, end, self.validation_days
        );
        let mut report = WalkForwardReport::default();
        let step = Duration::days(self.validation_days as i64);

        let mut day_index = 1u32;
        let mut train_day = start;
        while train_day <= end {
            match self.run_cycle(day_index, train_day) {
                Ok(outcome) => {
                    let r = &outcome.record;
                    info!(
                        "Day {} ({} -> {}): acc {:.4} prec {:.4} rec {:.4} f1 {:.4} on {}/{} labelled",
                        r.day,
                        r.training_date,
                        r.validation_date,
                        r.accuracy,
                        r.precision,
                        r.recall,
                        r.f1_score,
                        r.labeled_validation_samples,
                        r.validation_samples
                    );
                    report.cycles.push(outcome);
                }
                Err(e) => {
                    if e.is_skippable() {
                        warn!("Day {} ({}): skipped: {}", day_index, train_day, e);
                    } else {
                        error!("Day {} ({}): aborted: {}", day_index, train_day, e);
                    }
                    report.skipped.push(SkippedCycle {
                        day: day_index,
                        date: train_day,
                        reason: e.to_string(),
                    });
                }
            }
            train_day += step;
            day_index += 1;
        }

        let records = report.records();
        if !records.is_empty() {
            self.ctx.artifacts.append_performance(&records)?;
        }
        match report.mean_metrics() {
            Some(mean) => info!(
                "Walk-forward done: {} cycles, {} skipped; mean acc {:.4} prec {:.4} rec {:.4} f1 {:.4}",
                report.cycles.len(),
                report.skipped.len(),
                mean.accuracy,
                mean.precision,
                mean.recall,
                mean.f1
            ),
            None => info!(
                "Walk-forward done: {} cycles, {} skipped; no labelled validation data",
                report.cycles.len(),
                report.skipped.len()
            ),
        }
        Ok(report)
    }

    fn run_cycle(&self, day_index: u32, train_day: NaiveDate) -> Result<CycleOutcome> {
        let ctx = self.ctx;
        let validation_day = train_day + Duration::days(self.validation_days as i64);

        // Fetch + label
        let train_table = ctx.window_features(LogWindow::Day(train_day))?;
        if train_table.is_empty() {
            return Err(PipelineError::missing_window(train_day.to_string()));
        }
        let train_labels = self
            .training_labeler
            .label_outcomes(ctx.logs.as_ref(), train_day)?;

        let mut dataset = LabeledDataset::new(FeatureName::ALL.to_vec());
        dataset.extend_labeled(&train_table.vectors, &train_labels, Some(train_day));
        if dataset.is_empty() {
            return Err(PipelineError::missing_window(format!(
                "{}: no contracts with forward labels",
                train_day
            )));
        }

        let training_days: Vec<NaiveDate> = dataset
            .rows
            .iter()
            .filter_map(|row| row.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        // Train
        let (forest, holdout, training_samples, _) = fit_dataset(&dataset, ctx)?;
        info!(
            "Day {}: trained on {} rows from {} (holdout acc {:.4})",
            day_index, training_samples, train_day, holdout.accuracy
        );
        let artifact = ModelArtifact::new(
            ModelTag::WalkForward {
                day_index,
                training_date: train_day,
            },
            dataset.features.clone(),
            forest,
            training_samples,
        );

        // Validate
        let validation_table = ctx.window_features(LogWindow::Day(validation_day))?;
        let predictions = artifact.predict(&validation_table.vectors);
        let outcomes = match self
            .outcome_labeler
            .label_outcomes(ctx.logs.as_ref(), validation_day)
        {
            Ok(labels) => labels,
            Err(e) if e.is_skippable() => {
                warn!("Day {}: no outcome labels for {}: {}", day_index, validation_day, e);
                Default::default()
            }
            Err(e) => return Err(e),
        };

        let (y_true, y_pred): (Vec<bool>, Vec<bool>) = validation_table
            .vectors
            .iter()
            .zip(&predictions)
            .filter_map(|(fv, &pred)| outcomes.get(&fv.contract_address).map(|&t| (t, pred)))
            .unzip();
        let metrics = ClassificationMetrics::compute(&y_true, &y_pred);

        // Persist
        let model_key = ctx.artifacts.save_model(&artifact)?;

        Ok(CycleOutcome {
            record: PerformanceRecord {
                day: day_index,
                training_date: train_day,
                validation_date: validation_day,
                training_samples,
                validation_samples: validation_table.len(),
                labeled_validation_samples: y_true.len(),
                accuracy: metrics.accuracy,
                precision: metrics.precision,
                recall: metrics.recall,
                f1_score: metrics.f1,
            },
            model_key,
            training_days,
        })
    }
}
