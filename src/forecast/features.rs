//! Per-contract feature vectors.

use crate::forecast::centrality::{CentralityEngine, CentralityScores};
use crate::forecast::error::{PipelineError, Result};
use crate::forecast::graph::{collect_token_sets, ContractTokens, TokenFlowGraph};
use crate::forecast::logs::LogTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Canonical model input columns, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureName {
    TxCount,
    ActivitySpan,
    BetweennessCentrality,
    ClosenessCentrality,
    EigenvectorCentrality,
}

impl FeatureName {
    pub const ALL: [FeatureName; 5] = [
        FeatureName::TxCount,
        FeatureName::ActivitySpan,
        FeatureName::BetweennessCentrality,
        FeatureName::ClosenessCentrality,
        FeatureName::EigenvectorCentrality,
    ];

    /// Activity-only columns (no graph).
    pub const ACTIVITY: [FeatureName; 2] = [FeatureName::TxCount, FeatureName::ActivitySpan];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureName::TxCount => "tx_count",
            FeatureName::ActivitySpan => "activity_span",
            FeatureName::BetweennessCentrality => "betweenness_centrality",
            FeatureName::ClosenessCentrality => "closeness_centrality",
            FeatureName::EigenvectorCentrality => "eigenvector_centrality",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s.trim())
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contract's features for one evaluation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractFeatureVector {
    pub contract_address: String,
    pub tx_count: u64,
    pub min_block: u64,
    pub max_block: u64,
    pub activity_span: u64,
    pub betweenness_centrality: f64,
    pub closeness_centrality: f64,
    pub eigenvector_centrality: f64,
}

impl ContractFeatureVector {
    pub fn value(&self, feature: FeatureName) -> f64 {
        match feature {
            FeatureName::TxCount => self.tx_count as f64,
            FeatureName::ActivitySpan => self.activity_span as f64,
            FeatureName::BetweennessCentrality => self.betweenness_centrality,
            FeatureName::ClosenessCentrality => self.closeness_centrality,
            FeatureName::EigenvectorCentrality => self.eigenvector_centrality,
        }
    }

    /// Model input row in the given column order.
    pub fn row(&self, features: &[FeatureName]) -> Vec<f64> {
        features.iter().map(|f| self.value(*f)).collect()
    }
}

/// Groups log events by contract.
pub struct FeatureAggregator;

impl FeatureAggregator {
    /// One vector per contract present in `logs`, sorted by address.
    /// Centrality fields start at 0.
    pub fn aggregate(logs: &LogTable) -> Result<Vec<ContractFeatureVector>> {
        let mut by_contract: BTreeMap<&str, (u64, u64, u64)> = BTreeMap::new();
        for (row, event) in logs.events().iter().enumerate() {
            if event.contract_address.is_empty() {
                return Err(PipelineError::malformed(format!(
                    "event {} has no contract address",
                    row
                )));
            }
            let entry = by_contract
                .entry(event.contract_address.as_str())
                .or_insert((0, event.block_number, event.block_number));
            entry.0 += 1;
            entry.1 = entry.1.min(event.block_number);
            entry.2 = entry.2.max(event.block_number);
        }

        Ok(by_contract
            .into_iter()
            .map(|(address, (tx_count, min_block, max_block))| ContractFeatureVector {
                contract_address: address.to_string(),
                tx_count,
                min_block,
                max_block,
                activity_span: max_block - min_block,
                betweenness_centrality: 0.0,
                closeness_centrality: 0.0,
                eigenvector_centrality: 0.0,
            })
            .collect())
    }

    /// Copy centrality scores onto the vectors; contracts outside the graph keep 0.
    pub fn merge_centrality(features: &mut [ContractFeatureVector], scores: &CentralityScores) {
        for fv in features.iter_mut() {
            fv.betweenness_centrality = scores.betweenness(&fv.contract_address);
            fv.closeness_centrality = scores.closeness(&fv.contract_address);
            fv.eigenvector_centrality = scores.eigenvector(&fv.contract_address);
        }
    }
}

/// Features with centrality plus the token sets seen in the same window.
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    pub vectors: Vec<ContractFeatureVector>,
    pub tokens: BTreeMap<String, ContractTokens>,
}

impl FeatureTable {
    /// Aggregate, build the token-flow graph, score it and merge.
    pub fn build(logs: &LogTable, engine: &CentralityEngine) -> Result<Self> {
        let mut vectors = FeatureAggregator::aggregate(logs)?;
        let tokens = collect_token_sets(logs);
        let graph = TokenFlowGraph::from_token_sets(&tokens);
        let scores = engine.compute(&graph);
        FeatureAggregator::merge_centrality(&mut vectors, &scores);
        debug!(
            "Built features for {} contracts ({} graph nodes, {} edges)",
            vectors.len(),
            graph.node_count(),
            graph.edge_count()
        );
        Ok(Self { vectors, tokens })
    }

    /// Activity features only; centrality stays 0.
    pub fn activity_only(logs: &LogTable) -> Result<Self> {
        Ok(Self {
            vectors: FeatureAggregator::aggregate(logs)?,
            tokens: collect_token_sets(logs),
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn get(&self, contract: &str) -> Option<&ContractFeatureVector> {
        self.vectors
            .binary_search_by(|fv| fv.contract_address.as_str().cmp(contract))
            .ok()
            .map(|i| &self.vectors[i])
    }
}
