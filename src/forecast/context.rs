//! Shared resource handle for pipeline entry points.
//!
//! Owns the log source, artifact store, symbol resolver and centrality
//! engine for one run. Built once by the caller and passed by reference.

use crate::forecast::centrality::CentralityEngine;
use crate::forecast::clock::Clock;
use crate::forecast::config::PipelineConfig;
use crate::forecast::artifacts::ArtifactStore;
use crate::forecast::error::Result;
use crate::forecast::features::FeatureTable;
use crate::forecast::labels::LabelGenerator;
use crate::forecast::logs::{LogSource, LogTable, LogWindow, StoreLogSource};
use crate::forecast::resolver::TokenResolver;
use crate::forecast::store::BlobStore;
use std::sync::Arc;

pub struct PipelineContext {
    pub config: PipelineConfig,
    pub logs: Arc<dyn LogSource>,
    pub artifacts: ArtifactStore,
    pub resolver: TokenResolver,
    pub centrality: CentralityEngine,
    pub clock: Arc<dyn Clock>,
}

impl PipelineContext {
    /// Logs and artifacts both come from `blobs`; symbols resolve over HTTP.
    pub fn new(config: PipelineConfig, blobs: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Self {
        let retry = config.store.retry_policy();
        let logs: Arc<dyn LogSource> =
            Arc::new(StoreLogSource::new(blobs.clone(), retry, clock.clone()));
        let resolver = TokenResolver::from_config(&config.resolver, clock.clone());
        Self::assemble(config, blobs, logs, resolver, clock)
    }

    /// No network: the resolver only knows the static token table.
    pub fn offline(config: PipelineConfig, blobs: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Self {
        let retry = config.store.retry_policy();
        let logs: Arc<dyn LogSource> =
            Arc::new(StoreLogSource::new(blobs.clone(), retry, clock.clone()));
        let resolver = TokenResolver::offline(clock.clone());
        Self::assemble(config, blobs, logs, resolver, clock)
    }

    fn assemble(
        config: PipelineConfig,
        blobs: Arc<dyn BlobStore>,
        logs: Arc<dyn LogSource>,
        resolver: TokenResolver,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let artifacts = ArtifactStore::new(blobs, config.store.retry_policy(), clock.clone());
        let centrality = CentralityEngine::new(&config.centrality);
        Self {
            config,
            logs,
            artifacts,
            resolver,
            centrality,
            clock,
        }
    }

    pub fn with_log_source(mut self, logs: Arc<dyn LogSource>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_resolver(mut self, resolver: TokenResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn fetch(&self, window: LogWindow) -> Result<LogTable> {
        self.logs.fetch(window)
    }

    /// Fetch a window and build its features with centrality.
    pub fn window_features(&self, window: LogWindow) -> Result<FeatureTable> {
        let logs = self.fetch(window)?;
        FeatureTable::build(&logs, &self.centrality)
    }

    pub fn label_generator(&self) -> LabelGenerator {
        LabelGenerator::new(&self.config.labels)
    }
}
