//! Inference entry points.
//!
//! All three score the current 1D rolling logs, write the full ranking as a
//! CSV snapshot under `predictions/`, and return the selected top list.

use crate::forecast::artifacts::{ModelTag, WALK_FORWARD_PREFIX};
use crate::forecast::context::PipelineContext;
use crate::forecast::ensemble::{EnsembleScorer, WindowModel};
use crate::forecast::error::{PipelineError, Result};
use crate::forecast::export::{best_record, ranked_to_csv, RankedContract};
use crate::forecast::features::FeatureTable;
use crate::forecast::logs::{LogWindow, Lookback};
use chrono::Utc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InferenceOutput {
    /// Models that produced the scores, e.g. "3D" or "day_004".
    pub models: Vec<String>,
    pub predictions_key: String,
    pub ranked: Vec<RankedContract>,
    pub top: Vec<RankedContract>,
}

fn current_features(ctx: &PipelineContext) -> Result<FeatureTable> {
    let table = ctx.window_features(LogWindow::Rolling(Lookback::OneDay))?;
    info!("Scoring {} contracts from current 1D logs", table.len());
    Ok(table)
}

fn finish(
    ctx: &PipelineContext,
    scorer: &EnsembleScorer,
    table: &FeatureTable,
    snapshot: &str,
    top_k: usize,
    filter: bool,
) -> Result<InferenceOutput> {
    let output = scorer.score(table, top_k, filter);
    let name = format!("{}_{}", snapshot, Utc::now().format("%Y%m%d_%H%M%S"));
    let predictions_key = ctx
        .artifacts
        .save_predictions(&name, &ranked_to_csv(&output.ranked))?;
    Ok(InferenceOutput {
        models: scorer.models().iter().map(|m| m.window.clone()).collect(),
        predictions_key,
        ranked: output.ranked,
        top: output.top,
    })
}

/// Score with the single model trained for `lookback`.
pub fn infer_single(
    ctx: &PipelineContext,
    lookback: Lookback,
    top_k: usize,
    filter: bool,
) -> Result<InferenceOutput> {
    let artifact = ctx.artifacts.load_model(&ModelTag::lookback(lookback.tag()))?;
    let table = current_features(ctx)?;
    let scorer = EnsembleScorer::from_models(
        ctx,
        vec![WindowModel {
            window: lookback.tag().to_string(),
            weight: 1.0,
            fallback: false,
            artifact,
        }],
    );
    finish(
        ctx,
        &scorer,
        &table,
        &format!("top_predictions_{}", lookback.key_suffix()),
        top_k,
        filter,
    )
}

/// Weighted multi-window ensemble. An empty `windows` uses the configured defaults.
pub fn infer_multi(
    ctx: &PipelineContext,
    windows: &[String],
    top_k: usize,
    filter: bool,
) -> Result<InferenceOutput> {
    let windows = if windows.is_empty() {
        ctx.config.ensemble.default_windows.clone()
    } else {
        windows.to_vec()
    };
    let scorer = EnsembleScorer::load(ctx, &windows)?;
    let table = current_features(ctx)?;
    finish(ctx, &scorer, &table, "top_predictions_multi_timeframe", top_k, filter)
}

/// Score with a walk-forward model: `model_day`, or the best-F1 cycle on record.
pub fn predict_with_walk_forward(
    ctx: &PipelineContext,
    top_k: usize,
    model_day: Option<u32>,
) -> Result<InferenceOutput> {
    let (day, key) = match model_day {
        Some(day) => {
            let key = ctx.artifacts.find_walk_forward(day)?.ok_or_else(|| {
                PipelineError::artifact_not_found(format!("{}day_{:03}_*", WALK_FORWARD_PREFIX, day))
            })?;
            (day, key)
        }
        None => {
            let history = ctx.artifacts.load_performance()?;
            let best = best_record(&history).ok_or_else(|| {
                PipelineError::artifact_not_found("walk-forward history with labelled validation")
            })?;
            info!(
                "Best walk-forward model: day {} (f1 {:.4}, trained {})",
                best.day, best.f1_score, best.training_date
            );
            // Day indices repeat across runs; the training date pins the model
            let tag = ModelTag::WalkForward {
                day_index: best.day,
                training_date: best.training_date,
            };
            (best.day, tag.model_key())
        }
    };
    let artifact = ctx.artifacts.load_model_key(&key)?;
    let table = current_features(ctx)?;
    let scorer = EnsembleScorer::from_models(
        ctx,
        vec![WindowModel {
            window: artifact.tag.to_string(),
            weight: 1.0,
            fallback: false,
            artifact,
        }],
    );
    finish(
        ctx,
        &scorer,
        &table,
        &format!("walk_forward_day_{:03}", day),
        top_k,
        false,
    )
}
