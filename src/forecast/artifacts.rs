//! Model artifacts and the store facade.
//!
//! [`ArtifactStore`] wraps a [`BlobStore`] with the retry policy and owns the
//! key layout:
//!
//! ```text
//! training/models/random_forest_{tag}.json      model, single-window
//! training/models/feature_list_{tag}.json       feature sidecar
//! training/models/random_forest.json            unscoped default model
//! training/models/feature_list.json
//! training/models/walk_forward/day_{NNN}_{date}.json
//! training/performance/walk_forward_performance_summary.csv
//! predictions/{name}.csv
//! ```
//!
//! Loaded models are cached per store instance.

use crate::forecast::clock::{Clock, RetryPolicy};
use crate::forecast::error::{PipelineError, Result};
use crate::forecast::export::{performance_from_csv, performance_to_csv, PerformanceRecord};
use crate::forecast::features::{ContractFeatureVector, FeatureName};
use crate::forecast::forest::RandomForest;
use crate::forecast::store::BlobStore;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

pub const MODELS_PREFIX: &str = "training/models/";
pub const WALK_FORWARD_PREFIX: &str = "training/models/walk_forward/";
pub const PERFORMANCE_KEY: &str = "training/performance/walk_forward_performance_summary.csv";
pub const PREDICTIONS_PREFIX: &str = "predictions/";

/// Identity of a trained model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelTag {
    /// Unscoped model used as the ensemble fallback.
    Default,
    /// Single-window model for a lookback tag such as "3D".
    Lookback { period: String },
    WalkForward {
        day_index: u32,
        training_date: NaiveDate,
    },
}

impl ModelTag {
    pub fn lookback(period: &str) -> Self {
        ModelTag::Lookback {
            period: period.trim().to_uppercase(),
        }
    }

    pub fn model_key(&self) -> String {
        match self {
            ModelTag::Default => format!("{}random_forest.json", MODELS_PREFIX),
            ModelTag::Lookback { period } => {
                format!("{}random_forest_{}.json", MODELS_PREFIX, period.to_lowercase())
            }
            ModelTag::WalkForward {
                day_index,
                training_date,
            } => format!(
                "{}day_{:03}_{}.json",
                WALK_FORWARD_PREFIX,
                day_index,
                training_date.format("%Y-%m-%d")
            ),
        }
    }

    /// Walk-forward artifacts carry their features inline and have no sidecar.
    pub fn sidecar_key(&self) -> Option<String> {
        match self {
            ModelTag::Default => Some(format!("{}feature_list.json", MODELS_PREFIX)),
            ModelTag::Lookback { period } => Some(format!(
                "{}feature_list_{}.json",
                MODELS_PREFIX,
                period.to_lowercase()
            )),
            ModelTag::WalkForward { .. } => None,
        }
    }
}

impl fmt::Display for ModelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelTag::Default => f.write_str("default"),
            ModelTag::Lookback { period } => f.write_str(period),
            ModelTag::WalkForward { day_index, .. } => write!(f, "day_{:03}", day_index),
        }
    }
}

/// A trained classifier plus the columns it expects, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub tag: ModelTag,
    pub feature_list: Vec<FeatureName>,
    pub classifier: RandomForest,
    pub training_samples: usize,
    pub trained_at: DateTime<Utc>,
}

impl ModelArtifact {
    pub fn new(
        tag: ModelTag,
        feature_list: Vec<FeatureName>,
        classifier: RandomForest,
        training_samples: usize,
    ) -> Self {
        Self {
            tag,
            feature_list,
            classifier,
            training_samples,
            trained_at: Utc::now(),
        }
    }

    /// Positive-class probability per contract, in input order.
    pub fn score(&self, features: &[ContractFeatureVector]) -> Vec<f64> {
        features
            .iter()
            .map(|fv| self.classifier.predict_proba_one(&fv.row(&self.feature_list)))
            .collect()
    }

    pub fn predict(&self, features: &[ContractFeatureVector]) -> Vec<bool> {
        self.score(features).into_iter().map(|p| p > 0.5).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureListSidecar {
    pub features: Vec<FeatureName>,
    pub lookback_period: Option<String>,
}

// =============================================================================
// STORE FACADE
// =============================================================================

pub struct ArtifactStore {
    blobs: Arc<dyn BlobStore>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    cache: Mutex<HashMap<String, Arc<ModelArtifact>>>,
}

impl ArtifactStore {
    pub fn new(blobs: Arc<dyn BlobStore>, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            blobs,
            retry,
            clock,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn blobs(&self) -> Arc<dyn BlobStore> {
        self.blobs.clone()
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.retry
            .run(self.clock.as_ref(), key, || self.blobs.get(key))
            .map_err(|e| PipelineError::external(format!("reading {}: {}", key, e)))
    }

    pub fn put(&self, key: &str, body: &[u8]) -> Result<()> {
        self.retry
            .run(self.clock.as_ref(), key, || self.blobs.put(key, body))
            .map_err(|e| PipelineError::external(format!("writing {}: {}", key, e)))
    }

    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.retry
            .run(self.clock.as_ref(), prefix, || self.blobs.list(prefix))
            .map_err(|e| PipelineError::external(format!("listing {}: {}", prefix, e)))
    }

    pub fn get_text(&self, key: &str) -> Result<Option<String>> {
        match self.get(key)? {
            Some(body) => String::from_utf8(body)
                .map(Some)
                .map_err(|_| PipelineError::malformed(format!("{} is not valid UTF-8", key))),
            None => Ok(None),
        }
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    // -------------------------------------------------------------------------
    // Models
    // -------------------------------------------------------------------------

    /// Persist a model (and its sidecar when the tag has one). Returns the model key.
    pub fn save_model(&self, artifact: &ModelArtifact) -> Result<String> {
        let key = artifact.tag.model_key();
        self.put(&key, &serde_json::to_vec(artifact)?)?;

        if let Some(sidecar_key) = artifact.tag.sidecar_key() {
            let sidecar = FeatureListSidecar {
                features: artifact.feature_list.clone(),
                lookback_period: match &artifact.tag {
                    ModelTag::Lookback { period } => Some(period.to_lowercase()),
                    _ => None,
                },
            };
            self.put(&sidecar_key, &serde_json::to_vec(&sidecar)?)?;
        }

        self.cache.lock().remove(&key);
        info!("Saved model {} ({} features)", key, artifact.feature_list.len());
        Ok(key)
    }

    /// Load a model by tag. `ArtifactNotFound` when the model or its sidecar is absent.
    pub fn load_model(&self, tag: &ModelTag) -> Result<Arc<ModelArtifact>> {
        let key = tag.model_key();
        if let Some(cached) = self.cache.lock().get(&key) {
            return Ok(cached.clone());
        }

        let mut artifact = self.read_model(&key)?;
        if let Some(sidecar_key) = tag.sidecar_key() {
            let body = self
                .get(&sidecar_key)?
                .ok_or_else(|| PipelineError::artifact_not_found(sidecar_key.clone()))?;
            let sidecar: FeatureListSidecar = serde_json::from_slice(&body)?;
            if sidecar.features.len() != artifact.classifier.n_features() {
                return Err(PipelineError::malformed(format!(
                    "{} lists {} features but the model expects {}",
                    sidecar_key,
                    sidecar.features.len(),
                    artifact.classifier.n_features()
                )));
            }
            artifact.feature_list = sidecar.features;
        }

        let artifact = Arc::new(artifact);
        self.cache.lock().insert(key, artifact.clone());
        Ok(artifact)
    }

    /// Load a model blob by key (walk-forward history).
    pub fn load_model_key(&self, key: &str) -> Result<Arc<ModelArtifact>> {
        if let Some(cached) = self.cache.lock().get(key) {
            return Ok(cached.clone());
        }
        let artifact = Arc::new(self.read_model(key)?);
        self.cache.lock().insert(key.to_string(), artifact.clone());
        Ok(artifact)
    }

    fn read_model(&self, key: &str) -> Result<ModelArtifact> {
        let body = self
            .get(key)?
            .ok_or_else(|| PipelineError::artifact_not_found(key))?;
        let artifact: ModelArtifact = serde_json::from_slice(&body)?;
        debug!("Loaded model {} ({} trees)", key, artifact.classifier.n_trees());
        Ok(artifact)
    }

    /// All walk-forward model keys, oldest day first.
    pub fn walk_forward_keys(&self) -> Result<Vec<String>> {
        self.list(WALK_FORWARD_PREFIX)
    }

    /// Key of the walk-forward model for `day_index`. Each run numbers its
    /// cycles from 1, so several runs can share an index; the latest
    /// training date wins.
    pub fn find_walk_forward(&self, day_index: u32) -> Result<Option<String>> {
        let prefix = format!("{}day_{:03}_", WALK_FORWARD_PREFIX, day_index);
        let keys = self.list(&prefix)?;
        if keys.len() > 1 {
            debug!(
                "{} walk-forward models for day {}; using the latest",
                keys.len(),
                day_index
            );
        }
        Ok(keys.into_iter().max())
    }

    // -------------------------------------------------------------------------
    // Tables
    // -------------------------------------------------------------------------

    pub fn load_performance(&self) -> Result<Vec<PerformanceRecord>> {
        match self.get_text(PERFORMANCE_KEY)? {
            Some(text) => performance_from_csv(&text),
            None => Ok(Vec::new()),
        }
    }

    /// Read the cumulative history, append `records`, write it back.
    pub fn append_performance(&self, records: &[PerformanceRecord]) -> Result<usize> {
        let mut history = self.load_performance()?;
        history.extend_from_slice(records);
        self.put(PERFORMANCE_KEY, performance_to_csv(&history).as_bytes())?;
        info!(
            "Performance history at {} now has {} records",
            PERFORMANCE_KEY,
            history.len()
        );
        Ok(history.len())
    }

    /// Write a prediction snapshot; returns its key.
    pub fn save_predictions(&self, name: &str, csv: &str) -> Result<String> {
        let key = format!("{}{}.csv", PREDICTIONS_PREFIX, name);
        self.put(&key, csv.as_bytes())?;
        info!("Saved predictions to {}", key);
        Ok(key)
    }
}
