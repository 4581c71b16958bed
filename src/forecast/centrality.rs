//! Centrality Engine
//!
//! Computes betweenness, closeness and eigenvector centrality for every node
//! of a [`TokenFlowGraph`]. Each metric runs an ordered chain of
//! [`CentralityStrategy`] objects; the first strategy that returns finite
//! scores wins.
//!
//! ```text
//! betweenness:  WeightedBetweenness ──► InDegree
//! closeness:    WeightedCloseness   ──► InDegree
//! eigenvector:  PowerIteration ──► DenseEigenSolve ──► InDegree
//! ```
//!
//! Edge weights act as distances for the shortest-path metrics and as link
//! strengths for eigenvector centrality. Contracts that are not graph nodes
//! score 0 on every metric.

use crate::forecast::config::CentralityConfig;
use crate::forecast::graph::TokenFlowGraph;
use nalgebra::linalg::Schur;
use nalgebra::DMatrix;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use tracing::{debug, warn};

// =============================================================================
// RESULT TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CentralityMetric {
    Betweenness,
    Closeness,
    Eigenvector,
}

impl fmt::Display for CentralityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CentralityMetric::Betweenness => "betweenness",
            CentralityMetric::Closeness => "closeness",
            CentralityMetric::Eigenvector => "eigenvector",
        };
        f.write_str(s)
    }
}

/// A strategy could not produce usable scores (GraphComputationFailure).
#[derive(Debug, Clone, PartialEq)]
pub struct CentralityFailure(pub String);

impl fmt::Display for CentralityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "centrality computation failed: {}", self.0)
    }
}

impl std::error::Error for CentralityFailure {}

/// Per-contract scores for one window.
#[derive(Debug, Clone, Default)]
pub struct CentralityScores {
    betweenness: HashMap<String, f64>,
    closeness: HashMap<String, f64>,
    eigenvector: HashMap<String, f64>,
    /// Which strategy produced each metric.
    pub strategies: Vec<(CentralityMetric, &'static str)>,
}

impl CentralityScores {
    pub fn get(&self, metric: CentralityMetric, contract: &str) -> f64 {
        let map = match metric {
            CentralityMetric::Betweenness => &self.betweenness,
            CentralityMetric::Closeness => &self.closeness,
            CentralityMetric::Eigenvector => &self.eigenvector,
        };
        map.get(contract).copied().unwrap_or(0.0)
    }

    pub fn betweenness(&self, contract: &str) -> f64 {
        self.get(CentralityMetric::Betweenness, contract)
    }

    pub fn closeness(&self, contract: &str) -> f64 {
        self.get(CentralityMetric::Closeness, contract)
    }

    pub fn eigenvector(&self, contract: &str) -> f64 {
        self.get(CentralityMetric::Eigenvector, contract)
    }

    pub fn strategy_for(&self, metric: CentralityMetric) -> Option<&'static str> {
        self.strategies
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, s)| *s)
    }
}

// =============================================================================
// STRATEGY CHAIN
// =============================================================================

/// One way of computing a centrality vector, indexed like `graph.nodes()`.
pub trait CentralityStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn compute(&self, graph: &TokenFlowGraph) -> Result<Vec<f64>, CentralityFailure>;
}

pub struct CentralityEngine {
    betweenness: Vec<Box<dyn CentralityStrategy>>,
    closeness: Vec<Box<dyn CentralityStrategy>>,
    eigenvector: Vec<Box<dyn CentralityStrategy>>,
}

impl CentralityEngine {
    pub fn new(config: &CentralityConfig) -> Self {
        Self {
            betweenness: vec![Box::new(WeightedBetweenness), Box::new(InDegree)],
            closeness: vec![Box::new(WeightedCloseness), Box::new(InDegree)],
            eigenvector: vec![
                Box::new(PowerIteration {
                    max_iter: config.max_iter,
                    tolerance: config.tolerance,
                }),
                Box::new(DenseEigenSolve {
                    node_limit: config.dense_node_limit,
                    max_iter: config.max_iter,
                }),
                Box::new(InDegree),
            ],
        }
    }

    /// Replace the chain for one metric.
    pub fn with_chain(
        mut self,
        metric: CentralityMetric,
        chain: Vec<Box<dyn CentralityStrategy>>,
    ) -> Self {
        match metric {
            CentralityMetric::Betweenness => self.betweenness = chain,
            CentralityMetric::Closeness => self.closeness = chain,
            CentralityMetric::Eigenvector => self.eigenvector = chain,
        }
        self
    }

    pub fn compute(&self, graph: &TokenFlowGraph) -> CentralityScores {
        let mut scores = CentralityScores::default();
        if graph.is_empty() {
            return scores;
        }

        for (metric, chain) in [
            (CentralityMetric::Betweenness, &self.betweenness),
            (CentralityMetric::Closeness, &self.closeness),
            (CentralityMetric::Eigenvector, &self.eigenvector),
        ] {
            let (values, strategy) = run_chain(metric, chain, graph);
            let map: HashMap<String, f64> = graph
                .nodes()
                .iter()
                .cloned()
                .zip(values)
                .collect();
            match metric {
                CentralityMetric::Betweenness => scores.betweenness = map,
                CentralityMetric::Closeness => scores.closeness = map,
                CentralityMetric::Eigenvector => scores.eigenvector = map,
            }
            scores.strategies.push((metric, strategy));
        }

        scores
    }
}

fn run_chain(
    metric: CentralityMetric,
    chain: &[Box<dyn CentralityStrategy>],
    graph: &TokenFlowGraph,
) -> (Vec<f64>, &'static str) {
    for (tier, strategy) in chain.iter().enumerate() {
        match strategy.compute(graph) {
            Ok(values) if values.len() == graph.node_count() && values.iter().all(|v| v.is_finite()) => {
                if tier > 0 {
                    warn!(
                        "{} centrality fell back to {} (tier {})",
                        metric,
                        strategy.name(),
                        tier + 1
                    );
                }
                return (values, strategy.name());
            }
            Ok(_) => {
                debug!("{} via {} produced non-finite scores", metric, strategy.name());
            }
            Err(e) => {
                debug!("{} via {}: {}", metric, strategy.name(), e);
            }
        }
    }
    warn!("{} centrality chain exhausted; using zeros", metric);
    (vec![0.0; graph.node_count()], "zeros")
}

// =============================================================================
// SHORTEST PATHS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct QueueEntry {
    dist: f64,
    seq: usize,
    node: usize,
    pred: usize,
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    // Min-heap on (dist, seq)
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct ShortestPaths {
    /// Nodes in non-decreasing distance order.
    order: Vec<usize>,
    preds: Vec<Vec<usize>>,
    sigma: Vec<f64>,
    dist: Vec<Option<f64>>,
}

/// Weighted single-source shortest paths with path counting.
fn dijkstra<F>(n: usize, source: usize, neighbors: F) -> ShortestPaths
where
    F: Fn(usize) -> Vec<(usize, f64)>,
{
    let mut order = Vec::with_capacity(n);
    let mut preds = vec![Vec::new(); n];
    let mut sigma = vec![0.0; n];
    let mut dist: Vec<Option<f64>> = vec![None; n];
    let mut seen: Vec<Option<f64>> = vec![None; n];
    let mut heap = BinaryHeap::new();
    let mut seq = 0;

    sigma[source] = 1.0;
    seen[source] = Some(0.0);
    heap.push(QueueEntry {
        dist: 0.0,
        seq,
        node: source,
        pred: source,
    });

    while let Some(QueueEntry { dist: d, node: v, .. }) = heap.pop() {
        if dist[v].is_some() {
            continue;
        }
        order.push(v);
        dist[v] = Some(d);

        for (w, weight) in neighbors(v) {
            let candidate = d + weight;
            match seen[w] {
                Some(best) if dist[w].is_some() || candidate > best => {}
                Some(best) if candidate == best => {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
                _ => {
                    seen[w] = Some(candidate);
                    seq += 1;
                    heap.push(QueueEntry {
                        dist: candidate,
                        seq,
                        node: w,
                        pred: v,
                    });
                    sigma[w] = sigma[v];
                    preds[w] = vec![v];
                }
            }
        }
    }

    ShortestPaths {
        order,
        preds,
        sigma,
        dist,
    }
}

fn forward(graph: &TokenFlowGraph) -> impl Fn(usize) -> Vec<(usize, f64)> + '_ {
    move |v| graph.out_edges(v).to_vec()
}

fn backward(graph: &TokenFlowGraph) -> impl Fn(usize) -> Vec<(usize, f64)> + '_ {
    move |v| graph.in_edges(v).to_vec()
}

// =============================================================================
// STRATEGIES
// =============================================================================

/// Brandes betweenness over weighted shortest paths, normalized by
/// `1 / ((n-1)(n-2))` for directed graphs with more than two nodes.
pub struct WeightedBetweenness;

impl CentralityStrategy for WeightedBetweenness {
    fn name(&self) -> &'static str {
        "weighted_betweenness"
    }

    fn compute(&self, graph: &TokenFlowGraph) -> Result<Vec<f64>, CentralityFailure> {
        let n = graph.node_count();
        let mut betweenness = vec![0.0; n];

        for s in 0..n {
            let paths = dijkstra(n, s, forward(graph));
            let mut delta = vec![0.0; n];
            for &w in paths.order.iter().rev() {
                if paths.sigma[w] == 0.0 {
                    return Err(CentralityFailure(format!("zero path count at node {}", w)));
                }
                let coeff = (1.0 + delta[w]) / paths.sigma[w];
                for &v in &paths.preds[w] {
                    delta[v] += paths.sigma[v] * coeff;
                }
                if w != s {
                    betweenness[w] += delta[w];
                }
            }
        }

        if n > 2 {
            let scale = 1.0 / ((n - 1) as f64 * (n - 2) as f64);
            for b in betweenness.iter_mut() {
                *b *= scale;
            }
        }
        Ok(betweenness)
    }
}

/// Closeness on incoming distances with the Wasserman-Faust correction
/// for nodes that only part of the graph can reach.
pub struct WeightedCloseness;

impl CentralityStrategy for WeightedCloseness {
    fn name(&self) -> &'static str {
        "weighted_closeness"
    }

    fn compute(&self, graph: &TokenFlowGraph) -> Result<Vec<f64>, CentralityFailure> {
        let n = graph.node_count();
        let mut closeness = vec![0.0; n];

        for (u, score) in closeness.iter_mut().enumerate() {
            let paths = dijkstra(n, u, backward(graph));
            let reachable = paths.order.len();
            let total: f64 = paths.dist.iter().flatten().sum();
            if total > 0.0 && n > 1 {
                let r = (reachable - 1) as f64;
                *score = (r / total) * (r / (n - 1) as f64);
            }
        }
        Ok(closeness)
    }
}

/// Power iteration on `Aᵀ + I`, starting uniform, L2-normalized each step.
pub struct PowerIteration {
    pub max_iter: usize,
    pub tolerance: f64,
}

impl CentralityStrategy for PowerIteration {
    fn name(&self) -> &'static str {
        "power_iteration"
    }

    fn compute(&self, graph: &TokenFlowGraph) -> Result<Vec<f64>, CentralityFailure> {
        let n = graph.node_count();
        let mut x = vec![1.0 / n as f64; n];

        for _ in 0..self.max_iter {
            let last = x.clone();
            for (u, &xu) in last.iter().enumerate() {
                for &(v, w) in graph.out_edges(u) {
                    x[v] += xu * w;
                }
            }
            let norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
            let norm = if norm == 0.0 { 1.0 } else { norm };
            for v in x.iter_mut() {
                *v /= norm;
            }
            let change: f64 = x.iter().zip(&last).map(|(a, b)| (a - b).abs()).sum();
            if change < n as f64 * self.tolerance {
                return Ok(x);
            }
        }

        Err(CentralityFailure(format!(
            "power iteration did not converge in {} iterations",
            self.max_iter
        )))
    }
}

/// Dense eigen-solve: take the eigenvalue of `Aᵀ` with the largest real
/// part, then the null vector of `Aᵀ − λI` from its SVD.
pub struct DenseEigenSolve {
    pub node_limit: usize,
    pub max_iter: usize,
}

impl CentralityStrategy for DenseEigenSolve {
    fn name(&self) -> &'static str {
        "dense_eigen_solve"
    }

    fn compute(&self, graph: &TokenFlowGraph) -> Result<Vec<f64>, CentralityFailure> {
        let n = graph.node_count();
        if n > self.node_limit {
            return Err(CentralityFailure(format!(
                "{} nodes exceeds dense solver limit {}",
                n, self.node_limit
            )));
        }

        let mut at = DMatrix::<f64>::zeros(n, n);
        for u in 0..n {
            for &(v, w) in graph.out_edges(u) {
                at[(v, u)] += w;
            }
        }

        let schur = Schur::try_new(at.clone(), f64::EPSILON, self.max_iter)
            .ok_or_else(|| CentralityFailure("Schur decomposition did not converge".into()))?;
        let lambda = schur
            .complex_eigenvalues()
            .iter()
            .map(|c| c.re)
            .fold(f64::NEG_INFINITY, f64::max);
        if !lambda.is_finite() {
            return Err(CentralityFailure("no finite leading eigenvalue".into()));
        }

        let shifted = at - DMatrix::<f64>::identity(n, n) * lambda;
        let svd = shifted
            .try_svd(false, true, f64::EPSILON, self.max_iter)
            .ok_or_else(|| CentralityFailure("SVD did not converge".into()))?;
        let v_t = svd
            .v_t
            .ok_or_else(|| CentralityFailure("SVD returned no right singular vectors".into()))?;
        let (min_idx, _) = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .ok_or_else(|| CentralityFailure("empty singular value set".into()))?;

        let vector: Vec<f64> = v_t.row(min_idx).iter().copied().collect();
        let sum: f64 = vector.iter().sum();
        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        let scale = sum.signum() * norm;
        if sum == 0.0 || scale == 0.0 || !scale.is_finite() {
            return Err(CentralityFailure("degenerate leading eigenvector".into()));
        }
        Ok(vector.into_iter().map(|v| v / scale).collect())
    }
}

/// Incoming edge count divided by `n - 1`.
pub struct InDegree;

impl CentralityStrategy for InDegree {
    fn name(&self) -> &'static str {
        "in_degree"
    }

    fn compute(&self, graph: &TokenFlowGraph) -> Result<Vec<f64>, CentralityFailure> {
        let n = graph.node_count();
        if n <= 1 {
            return Ok(vec![1.0; n]);
        }
        let scale = 1.0 / (n - 1) as f64;
        Ok((0..n).map(|v| graph.in_degree(v) as f64 * scale).collect())
    }
}
