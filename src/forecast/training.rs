//! Single-window trainer.

use crate::forecast::artifacts::{ModelArtifact, ModelTag};
use crate::forecast::context::PipelineContext;
use crate::forecast::dataset::{rolling_dataset_key, LabeledDataset, DATED_DATASET_KEY, ROLLING_DATASET_KEY};
use crate::forecast::error::{PipelineError, Result};
use crate::forecast::forest::{stratified_split, RandomForest};
use crate::forecast::logs::Lookback;
use crate::forecast::metrics::ClassificationMetrics;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub dataset_key: String,
    pub model_key: String,
    pub training_rows: usize,
    pub holdout_rows: usize,
    pub holdout: ClassificationMetrics,
}

/// Fit a forest on the dataset's feature columns with the configured
/// holdout split. Returns the model, holdout metrics and split sizes.
pub fn fit_dataset(
    dataset: &LabeledDataset,
    ctx: &PipelineContext,
) -> Result<(RandomForest, ClassificationMetrics, usize, usize)> {
    if dataset.is_empty() {
        return Err(PipelineError::Training("dataset has no rows".into()));
    }
    let forest_config = &ctx.config.forest;
    let split = stratified_split(&dataset.y(), forest_config.test_fraction, forest_config.seed);
    let (x_train, y_train) = dataset.select(&split.train);
    let (x_test, y_test) = dataset.select(&split.test);

    let forest = RandomForest::fit(&x_train, &y_train, forest_config)?;
    let holdout = ClassificationMetrics::compute(&y_test, &forest.predict(&x_test));
    Ok((forest, holdout, x_train.len(), x_test.len()))
}

/// Train and persist a model for `lookback` (or the unscoped default).
///
/// Datasets are tried in order: the lookback's rolling dataset, the
/// untagged rolling dataset, then the dated dataset.
pub fn train_single_window(ctx: &PipelineContext, lookback: Option<Lookback>) -> Result<TrainingSummary> {
    let mut candidates = Vec::new();
    if let Some(lb) = lookback {
        candidates.push(rolling_dataset_key(lb));
    }
    candidates.push(ROLLING_DATASET_KEY.to_string());
    candidates.push(DATED_DATASET_KEY.to_string());

    let mut found = None;
    for key in &candidates {
        debug!("Trying dataset {}", key);
        if let Some(text) = ctx.artifacts.get_text(key)? {
            found = Some((key.clone(), text));
            break;
        }
    }
    let (dataset_key, text) = found.ok_or_else(|| {
        PipelineError::Training(format!(
            "no training dataset among [{}]; run generate-from-rolling or generate-data first",
            candidates.join(", ")
        ))
    })?;

    let dataset = LabeledDataset::from_csv(&text)?;
    if dataset.features.is_empty() {
        return Err(PipelineError::malformed(format!(
            "{} has no known feature columns",
            dataset_key
        )));
    }
    info!(
        "Training on {} ({} rows, {} positive, features: {})",
        dataset_key,
        dataset.len(),
        dataset.positives(),
        dataset
            .features
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let (forest, holdout, training_rows, holdout_rows) = fit_dataset(&dataset, ctx)?;
    info!(
        "Holdout accuracy {:.4} on {} rows (precision {:.4}, recall {:.4})",
        holdout.accuracy, holdout_rows, holdout.precision, holdout.recall
    );

    let tag = match lookback {
        Some(lb) => ModelTag::lookback(lb.tag()),
        None => ModelTag::Default,
    };
    let artifact = ModelArtifact::new(tag, dataset.features.clone(), forest, training_rows);
    let model_key = ctx.artifacts.save_model(&artifact)?;

    Ok(TrainingSummary {
        dataset_key,
        model_key,
        training_rows,
        holdout_rows,
        holdout,
    })
}
