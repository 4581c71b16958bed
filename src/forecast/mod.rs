//! Liquidity Forecast Pipeline
//!
//! Ranks on-chain liquidity contracts by their chance of above-average
//! forward activity.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐
//! │ LogSource   │────▶│ FeatureAggregator│──────────────┐
//! │ (day/1D/3D) │     └──────────────────┘              │
//! └──────┬──────┘     ┌──────────────────┐     ┌────────▼───────┐
//!        └───────────▶│ TokenFlowGraph   │────▶│ CentralityEngine│
//!                     └──────────────────┘     │ (fallback chain)│
//!                                              └────────┬───────┘
//!                                                       ▼
//!                                              ┌────────────────┐
//!                             LabelGenerator ─▶│  FeatureTable  │
//!                                              └───┬────────┬───┘
//!                         ┌────────────────────────┘        └──────────────┐
//!                         ▼                                                ▼
//!              ┌─────────────────────┐                          ┌──────────────────┐
//!              │ WalkForwardTrainer  │                          │ BacktestEvaluator│
//!              │ single-window train │                          │  (Precision@K)   │
//!              └──────────┬──────────┘                          └──────────────────┘
//!                         ▼
//!              ┌─────────────────────┐     ┌──────────────────┐
//!              │   ArtifactStore     │────▶│  EnsembleScorer  │──▶ ranked list
//!              │ (models, history)   │     │ (weighted, rayon)│
//!              └─────────────────────┘     └──────────────────┘
//! ```
//!
//! # Determinism
//!
//! - **RNG**: seeded `ChaCha8Rng` only (splits, bootstraps, feature sampling)
//! - **Ensemble**: window scores summed in sorted window order
//! - **Waiting**: retry backoff and rate limiting go through [`clock::Clock`]

pub mod artifacts;
pub mod backtest;
pub mod centrality;
pub mod clock;
pub mod config;
pub mod context;
pub mod dataset;
pub mod ensemble;
pub mod error;
pub mod export;
pub mod features;
pub mod forest;
pub mod graph;
pub mod inference;
pub mod labels;
pub mod logs;
pub mod metrics;
pub mod resolver;
pub mod store;
pub mod training;
pub mod walk_forward;

#[cfg(test)]
mod centrality_tests;

pub use artifacts::{ArtifactStore, ModelArtifact, ModelTag};
pub use backtest::{BacktestEvaluator, BacktestReport, SegmentResult};
pub use centrality::{CentralityEngine, CentralityMetric, CentralityScores, CentralityStrategy};
pub use clock::{Clock, FakeClock, RateLimiter, RetryPolicy, SystemClock};
pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use dataset::{generate_dated_dataset, generate_rolling_dataset, LabeledDataset};
pub use ensemble::{EnsembleScorer, TokenFilter, WindowModel};
pub use error::{PipelineError, Result};
pub use export::{PerformanceRecord, RankedContract};
pub use features::{ContractFeatureVector, FeatureAggregator, FeatureName, FeatureTable};
pub use forest::RandomForest;
pub use graph::TokenFlowGraph;
pub use inference::{infer_multi, infer_single, predict_with_walk_forward, InferenceOutput};
pub use labels::{ForwardActivityLabeler, LabelGenerator, Labels, OutcomeLabeler};
pub use logs::{LogEvent, LogSource, LogTable, LogWindow, Lookback};
pub use metrics::{precision_at_k, ClassificationMetrics};
pub use resolver::TokenResolver;
pub use store::{BlobStore, SqliteBlobStore};
pub use training::train_single_window;
pub use walk_forward::{WalkForwardReport, WalkForwardTrainer};
