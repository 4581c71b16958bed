//! Centrality Engine Tests
//!
//! Known values on small graphs, the fallback chain, and the zero-edge
//! guarantee for contracts outside the graph.

use crate::forecast::centrality::{
    CentralityEngine, CentralityFailure, CentralityMetric, CentralityStrategy, DenseEigenSolve,
    InDegree, PowerIteration, WeightedBetweenness, WeightedCloseness,
};
use crate::forecast::config::CentralityConfig;
use crate::forecast::features::FeatureTable;
use crate::forecast::graph::TokenFlowGraph;
use crate::forecast::logs::{LogEvent, LogTable};

fn event(contract: &str, input: &str, output: &str, block: u64) -> LogEvent {
    LogEvent {
        transaction_id: format!("0x{}_{}", contract, block),
        contract_address: contract.to_string(),
        input_token: input.to_string(),
        output_token: output.to_string(),
        block_number: block,
    }
}

fn engine() -> CentralityEngine {
    CentralityEngine::new(&CentralityConfig::default())
}

fn path_graph() -> TokenFlowGraph {
    TokenFlowGraph::from_edges([("A", "B", 1.0), ("B", "C", 1.0)])
}

fn assert_close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() < tol,
        "expected {} got {}",
        expected,
        actual
    );
}

struct AlwaysFails;

impl CentralityStrategy for AlwaysFails {
    fn name(&self) -> &'static str {
        "always_fails"
    }

    fn compute(&self, _graph: &TokenFlowGraph) -> Result<Vec<f64>, CentralityFailure> {
        Err(CentralityFailure("did not converge".into()))
    }
}

struct NotFinite;

impl CentralityStrategy for NotFinite {
    fn name(&self) -> &'static str {
        "not_finite"
    }

    fn compute(&self, graph: &TokenFlowGraph) -> Result<Vec<f64>, CentralityFailure> {
        Ok(vec![f64::NAN; graph.node_count()])
    }
}

// =============================================================================
// ZERO-EDGE SCENARIOS
// =============================================================================

#[test]
fn test_disjoint_token_sets_score_zero() {
    let mut events = Vec::new();
    for i in 0..50u64 {
        let block = if i == 49 { 200 } else { 100 + i };
        events.push(event("X", "TA", "TB", block));
    }
    for block in [100, 102, 104, 106, 110] {
        events.push(event("Y", "TC", "TD", block));
    }
    for block in [300, 301] {
        events.push(event("Z", "TE", "TF", block));
    }

    let table = FeatureTable::build(&LogTable::new(events), &engine()).unwrap();
    assert_eq!(table.len(), 3);

    for fv in &table.vectors {
        assert_eq!(fv.betweenness_centrality, 0.0, "{}", fv.contract_address);
        assert_eq!(fv.closeness_centrality, 0.0, "{}", fv.contract_address);
        assert_eq!(fv.eigenvector_centrality, 0.0, "{}", fv.contract_address);
    }

    let x = table.get("X").unwrap();
    assert_eq!(x.tx_count, 50);
    assert_eq!(x.activity_span, 100);
    let y = table.get("Y").unwrap();
    assert_eq!(y.tx_count, 5);
    assert_eq!(y.activity_span, 10);
}

#[test]
fn test_contract_outside_graph_scores_zero() {
    // A hands USDC to B; C trades tokens nobody else touches
    let logs = LogTable::new(vec![
        event("A", "WETH", "USDC", 1),
        event("B", "USDC", "DAI", 2),
        event("C", "FOO", "BAR", 3),
    ]);
    let table = FeatureTable::build(&logs, &engine()).unwrap();

    let c = table.get("C").unwrap();
    assert_eq!(c.betweenness_centrality, 0.0);
    assert_eq!(c.closeness_centrality, 0.0);
    assert_eq!(c.eigenvector_centrality, 0.0);

    let b = table.get("B").unwrap();
    assert!(b.closeness_centrality > 0.0);
}

#[test]
fn test_empty_graph_has_no_strategies() {
    let scores = engine().compute(&TokenFlowGraph::default());
    assert!(scores.strategies.is_empty());
    assert_eq!(scores.eigenvector("anything"), 0.0);
}

// =============================================================================
// KNOWN VALUES
// =============================================================================

#[test]
fn test_betweenness_on_path() {
    let scores = WeightedBetweenness.compute(&path_graph()).unwrap();
    // Only B sits on a shortest path (A -> C); normalized by 1/((n-1)(n-2))
    assert_close(scores[0], 0.0, 1e-12);
    assert_close(scores[1], 0.5, 1e-12);
    assert_close(scores[2], 0.0, 1e-12);
}

#[test]
fn test_betweenness_prefers_lighter_route() {
    // A -> C directly costs 5, via B costs 2
    let graph = TokenFlowGraph::from_edges([("A", "B", 1.0), ("B", "C", 1.0), ("A", "C", 5.0)]);
    let scores = WeightedBetweenness.compute(&graph).unwrap();
    assert_close(scores[1], 0.5, 1e-12);
}

#[test]
fn test_betweenness_splits_equal_paths() {
    // Two equal-cost routes A -> D, through B and through C
    let graph = TokenFlowGraph::from_edges([
        ("A", "B", 1.0),
        ("A", "C", 1.0),
        ("B", "D", 1.0),
        ("C", "D", 1.0),
    ]);
    let scores = WeightedBetweenness.compute(&graph).unwrap();
    let scale = 1.0 / 6.0;
    assert_close(scores[1], 0.5 * scale, 1e-12);
    assert_close(scores[2], 0.5 * scale, 1e-12);
    assert_close(scores[0], 0.0, 1e-12);
}

#[test]
fn test_closeness_on_path() {
    let scores = WeightedCloseness.compute(&path_graph()).unwrap();
    assert_close(scores[0], 0.0, 1e-12);
    assert_close(scores[1], 0.5, 1e-12);
    assert_close(scores[2], 2.0 / 3.0, 1e-12);
}

#[test]
fn test_in_degree_normalized() {
    let graph = TokenFlowGraph::from_edges([("A", "C", 1.0), ("B", "C", 3.0)]);
    let scores = InDegree.compute(&graph).unwrap();
    assert_eq!(scores, vec![0.0, 0.0, 1.0]);
}

#[test]
fn test_dense_solver_agrees_with_power_iteration() {
    let graph = TokenFlowGraph::from_edges([
        ("A", "B", 1.0),
        ("B", "C", 1.0),
        ("C", "A", 1.0),
        ("A", "C", 2.0),
    ]);
    let power = PowerIteration {
        max_iter: 10_000,
        tolerance: 1e-10,
    }
    .compute(&graph)
    .unwrap();
    let dense = DenseEigenSolve {
        node_limit: 10,
        max_iter: 1_000,
    }
    .compute(&graph)
    .unwrap();

    for (p, d) in power.iter().zip(&dense) {
        assert_close(*p, *d, 1e-4);
    }
    // C receives from both A and B
    assert!(dense[2] > dense[0]);
}

#[test]
fn test_dense_solver_respects_node_limit() {
    let err = DenseEigenSolve {
        node_limit: 2,
        max_iter: 100,
    }
    .compute(&path_graph())
    .unwrap_err();
    assert!(err.to_string().contains("limit"));
}

#[test]
fn test_power_iteration_reports_non_convergence() {
    let result = PowerIteration {
        max_iter: 1,
        tolerance: 1e-12,
    }
    .compute(&path_graph());
    assert!(result.is_err());
}

// =============================================================================
// FALLBACK CHAIN
// =============================================================================

#[test]
fn test_default_chain_names() {
    let graph = TokenFlowGraph::from_edges([("A", "B", 1.0), ("B", "A", 1.0)]);
    let scores = engine().compute(&graph);
    assert_eq!(
        scores.strategy_for(CentralityMetric::Betweenness),
        Some("weighted_betweenness")
    );
    assert_eq!(
        scores.strategy_for(CentralityMetric::Closeness),
        Some("weighted_closeness")
    );
    assert_eq!(
        scores.strategy_for(CentralityMetric::Eigenvector),
        Some("power_iteration")
    );
    assert_close(scores.eigenvector("A"), scores.eigenvector("B"), 1e-9);
}

#[test]
fn test_chain_falls_through_to_in_degree() {
    let graph = TokenFlowGraph::from_edges([("A", "C", 1.0), ("B", "C", 1.0)]);
    let engine = engine().with_chain(
        CentralityMetric::Eigenvector,
        vec![Box::new(AlwaysFails), Box::new(NotFinite), Box::new(InDegree)],
    );
    let scores = engine.compute(&graph);

    assert_eq!(scores.strategy_for(CentralityMetric::Eigenvector), Some("in_degree"));
    assert_close(scores.eigenvector("C"), 1.0, 1e-12);
    assert_close(scores.eigenvector("A"), 0.0, 1e-12);
    // Other metrics keep their primary strategy
    assert_eq!(
        scores.strategy_for(CentralityMetric::Betweenness),
        Some("weighted_betweenness")
    );
}

#[test]
fn test_exhausted_chain_yields_zeros() {
    let graph = path_graph();
    let engine = engine().with_chain(CentralityMetric::Closeness, vec![Box::new(AlwaysFails)]);
    let scores = engine.compute(&graph);

    assert_eq!(scores.strategy_for(CentralityMetric::Closeness), Some("zeros"));
    for node in ["A", "B", "C"] {
        assert_eq!(scores.closeness(node), 0.0);
    }
}

#[test]
fn test_dense_solver_used_when_power_iteration_fails() {
    let graph = TokenFlowGraph::from_edges([("A", "B", 1.0), ("B", "A", 1.0)]);
    let engine = engine().with_chain(
        CentralityMetric::Eigenvector,
        vec![
            Box::new(AlwaysFails),
            Box::new(DenseEigenSolve {
                node_limit: 10,
                max_iter: 1_000,
            }),
            Box::new(InDegree),
        ],
    );
    let scores = engine.compute(&graph);

    assert_eq!(
        scores.strategy_for(CentralityMetric::Eigenvector),
        Some("dense_eigen_solve")
    );
    let expected = 1.0 / 2f64.sqrt();
    assert_close(scores.eigenvector("A"), expected, 1e-6);
    assert_close(scores.eigenvector("B"), expected, 1e-6);
}
