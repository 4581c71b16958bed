//! Token-flow graph between contracts.
//!
//! An edge A→B exists when some token A was observed to output is also a
//! token B was observed to input; its weight is the size of that overlap.
//! A naive all-pairs scan is O(C²) in contract count. The builder indexes
//! tokens to their input contracts instead, which costs O(C·T) for T
//! distinct tokens and yields the same weights.

use crate::forecast::logs::LogTable;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Tokens a contract was seen receiving and sending within one window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractTokens {
    pub inputs: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
}

impl ContractTokens {
    /// Every token touched by the contract, in either direction.
    pub fn all(&self) -> BTreeSet<String> {
        self.inputs.union(&self.outputs).cloned().collect()
    }
}

/// Per-contract token sets, keyed by contract address.
pub fn collect_token_sets(logs: &LogTable) -> BTreeMap<String, ContractTokens> {
    let mut sets: BTreeMap<String, ContractTokens> = BTreeMap::new();
    for event in logs.events() {
        let entry = sets.entry(event.contract_address.clone()).or_default();
        if !event.input_token.is_empty() {
            entry.inputs.insert(event.input_token.clone());
        }
        if !event.output_token.is_empty() {
            entry.outputs.insert(event.output_token.clone());
        }
    }
    sets
}

/// Directed weighted graph over contracts that take part in at least one edge.
///
/// Nodes are kept in address order so every traversal is deterministic.
#[derive(Debug, Clone, Default)]
pub struct TokenFlowGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    out_edges: Vec<Vec<(usize, f64)>>,
    in_edges: Vec<Vec<(usize, f64)>>,
}

impl TokenFlowGraph {
    pub fn from_logs(logs: &LogTable) -> Self {
        Self::from_token_sets(&collect_token_sets(logs))
    }

    pub fn from_token_sets(sets: &BTreeMap<String, ContractTokens>) -> Self {
        // token -> contracts that take it as input
        let mut consumers: HashMap<&str, Vec<&str>> = HashMap::new();
        for (contract, tokens) in sets {
            for token in &tokens.inputs {
                consumers.entry(token.as_str()).or_default().push(contract.as_str());
            }
        }

        let mut weights: BTreeMap<(&str, &str), f64> = BTreeMap::new();
        for (source, tokens) in sets {
            for token in &tokens.outputs {
                let Some(targets) = consumers.get(token.as_str()) else {
                    continue;
                };
                for &target in targets {
                    if target != source.as_str() {
                        *weights.entry((source.as_str(), target)).or_insert(0.0) += 1.0;
                    }
                }
            }
        }

        Self::from_edges(weights.into_iter().map(|((a, b), w)| (a, b, w)))
    }

    /// Build directly from `(source, target, weight)` triples. Self-loops are dropped.
    pub fn from_edges<'a>(edges: impl IntoIterator<Item = (&'a str, &'a str, f64)>) -> Self {
        let edges: Vec<(&str, &str, f64)> = edges
            .into_iter()
            .filter(|(a, b, _)| a != b)
            .collect();

        let nodes: Vec<String> = edges
            .iter()
            .flat_map(|(a, b, _)| [*a, *b])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();

        let mut out_edges = vec![Vec::new(); nodes.len()];
        let mut in_edges = vec![Vec::new(); nodes.len()];
        for (a, b, w) in edges {
            let (ia, ib) = (index[a], index[b]);
            out_edges[ia].push((ib, w));
            in_edges[ib].push((ia, w));
        }
        for adj in out_edges.iter_mut().chain(in_edges.iter_mut()) {
            adj.sort_by_key(|(n, _)| *n);
        }

        Self {
            nodes,
            index,
            out_edges,
            in_edges,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.out_edges.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn node_index(&self, contract: &str) -> Option<usize> {
        self.index.get(contract).copied()
    }

    pub fn out_edges(&self, node: usize) -> &[(usize, f64)] {
        &self.out_edges[node]
    }

    pub fn in_edges(&self, node: usize) -> &[(usize, f64)] {
        &self.in_edges[node]
    }

    pub fn in_degree(&self, node: usize) -> usize {
        self.in_edges[node].len()
    }

    pub fn weight(&self, source: &str, target: &str) -> Option<f64> {
        let (a, b) = (self.node_index(source)?, self.node_index(target)?);
        self.out_edges[a]
            .iter()
            .find(|(n, _)| *n == b)
            .map(|(_, w)| *w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::logs::LogEvent;

    fn event(contract: &str, input: &str, output: &str) -> LogEvent {
        LogEvent {
            transaction_id: format!("0x{}{}{}", contract, input, output),
            contract_address: contract.to_string(),
            input_token: input.to_string(),
            output_token: output.to_string(),
            block_number: 1,
        }
    }

    #[test]
    fn test_edge_weight_is_token_overlap() {
        // A outputs {USDC, DAI}; B inputs {USDC, DAI, WETH}; C inputs {DAI}
        let logs = LogTable::new(vec![
            event("A", "WETH", "USDC"),
            event("A", "WETH", "DAI"),
            event("B", "USDC", "WBTC"),
            event("B", "DAI", "WBTC"),
            event("B", "WETH", "WBTC"),
            event("C", "DAI", "FRAX"),
        ]);
        let graph = TokenFlowGraph::from_logs(&logs);

        assert_eq!(graph.weight("A", "B"), Some(2.0));
        assert_eq!(graph.weight("A", "C"), Some(1.0));
        // B outputs WBTC which nobody inputs; C outputs FRAX likewise
        assert_eq!(graph.weight("B", "A"), None);
        // B inputs WETH and A inputs WETH, but neither outputs it to the other
        assert_eq!(graph.weight("C", "A"), None);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_self_loops_excluded() {
        let logs = LogTable::new(vec![event("A", "USDC", "DAI"), event("A", "DAI", "USDC")]);
        let graph = TokenFlowGraph::from_logs(&logs);
        assert!(graph.is_empty());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_isolated_contracts_not_in_graph() {
        let logs = LogTable::new(vec![
            event("A", "T1", "T2"),
            event("B", "T2", "T3"),
            event("Z", "T8", "T9"),
        ]);
        let graph = TokenFlowGraph::from_logs(&logs);
        assert_eq!(graph.nodes(), &["A".to_string(), "B".to_string()]);
        assert_eq!(graph.node_index("Z"), None);
        assert_eq!(graph.in_degree(graph.node_index("B").unwrap()), 1);
    }

    #[test]
    fn test_indexed_build_matches_all_pairs_scan() {
        let logs = LogTable::new(vec![
            event("A", "T1", "T2"),
            event("A", "T3", "T4"),
            event("B", "T2", "T1"),
            event("B", "T4", "T5"),
            event("C", "T5", "T2"),
            event("C", "T1", "T3"),
            event("D", "T2", "T4"),
        ]);
        let sets = collect_token_sets(&logs);
        let graph = TokenFlowGraph::from_token_sets(&sets);

        for (a, ta) in &sets {
            for (b, tb) in &sets {
                if a == b {
                    continue;
                }
                let overlap = ta.outputs.intersection(&tb.inputs).count();
                let expected = (overlap > 0).then_some(overlap as f64);
                assert_eq!(graph.weight(a, b), expected, "edge {} -> {}", a, b);
            }
        }
    }
}
