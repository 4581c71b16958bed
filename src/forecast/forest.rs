//! Random-forest binary classifier.
//!
//! CART trees grown on bootstrap samples with Gini impurity and a random
//! subset of `√features` considered per split. Everything is driven by a
//! single seed, so equal inputs give equal models.

use crate::forecast::config::ForestConfig;
use crate::forecast::error::{PipelineError, Result};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        positive_fraction: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn predict_one(&self, row: &[f64]) -> f64 {
        let mut i = 0;
        loop {
            match self.nodes.get(i) {
                Some(TreeNode::Leaf { positive_fraction }) => return *positive_fraction,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    i = if value <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], i: usize) -> usize {
            match nodes.get(i) {
                Some(TreeNode::Split { left, right, .. }) => 1 + walk(nodes, *left).max(walk(nodes, *right)),
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [bool],
    config: &'a ForestConfig,
    n_features: usize,
    max_features: usize,
    rng: ChaCha8Rng,
    nodes: Vec<TreeNode>,
}

impl<'a> TreeBuilder<'a> {
    fn grow(mut self, samples: Vec<usize>) -> DecisionTree {
        self.build(samples, 0);
        DecisionTree { nodes: self.nodes }
    }

    fn build(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let idx = self.nodes.len();
        let n = samples.len();
        let positives = samples.iter().filter(|&&s| self.y[s]).count();
        let positive_fraction = if n == 0 { 0.0 } else { positives as f64 / n as f64 };
        self.nodes.push(TreeNode::Leaf { positive_fraction });

        let depth_reached = self.config.max_depth.is_some_and(|d| depth >= d);
        if positives == 0 || positives == n || n < self.config.min_samples_split || depth_reached {
            return idx;
        }

        let Some((feature, threshold)) = self.best_split(&samples, positives) else {
            return idx;
        };
        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&s| self.x[s][feature] <= threshold);

        let left = self.build(left_samples, depth + 1);
        let right = self.build(right_samples, depth + 1);
        self.nodes[idx] = TreeNode::Split {
            feature,
            threshold,
            left,
            right,
        };
        idx
    }

    /// Lowest weighted Gini split; keeps looking past `max_features` only
    /// while every feature tried so far was constant.
    fn best_split(&mut self, samples: &[usize], positives: usize) -> Option<(usize, f64)> {
        let n = samples.len();
        let parent = gini(positives, n);
        let min_leaf = self.config.min_samples_leaf.max(1);

        let mut features: Vec<usize> = (0..self.n_features).collect();
        features.shuffle(&mut self.rng);

        let mut best: Option<(f64, usize, f64)> = None;
        for (tried, &feature) in features.iter().enumerate() {
            if tried >= self.max_features && best.is_some() {
                break;
            }

            let mut values: Vec<(f64, bool)> = samples
                .iter()
                .map(|&s| (self.x[s][feature], self.y[s]))
                .collect();
            values.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0;
            for i in 0..n - 1 {
                if values[i].1 {
                    left_pos += 1;
                }
                if values[i].0 == values[i + 1].0 {
                    continue;
                }
                let left_n = i + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                let impurity = (left_n as f64 * gini(left_pos, left_n)
                    + right_n as f64 * gini(positives - left_pos, right_n))
                    / n as f64;
                if best.map_or(true, |(b, _, _)| impurity < b) {
                    let mut threshold = (values[i].0 + values[i + 1].0) / 2.0;
                    if threshold >= values[i + 1].0 {
                        threshold = values[i].0;
                    }
                    best = Some((impurity, feature, threshold));
                }
            }
        }

        best.filter(|(impurity, _, _)| *impurity < parent - 1e-12)
            .map(|(_, feature, threshold)| (feature, threshold))
    }
}

// =============================================================================
// FOREST
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    trees: Vec<DecisionTree>,
    /// Set when training data held a single class.
    constant: Option<f64>,
}

impl RandomForest {
    pub fn fit(x: &[Vec<f64>], y: &[bool], config: &ForestConfig) -> Result<Self> {
        if x.is_empty() {
            return Err(PipelineError::Training("no training rows".into()));
        }
        if x.len() != y.len() {
            return Err(PipelineError::Training(format!(
                "{} feature rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        let n_features = x[0].len();
        if x.iter().any(|row| row.len() != n_features) {
            return Err(PipelineError::Training("ragged feature rows".into()));
        }

        let positives = y.iter().filter(|l| **l).count();
        if positives == 0 || positives == y.len() {
            return Ok(Self {
                n_features,
                trees: Vec::new(),
                constant: Some(if positives == 0 { 0.0 } else { 1.0 }),
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let seeds: Vec<u64> = (0..config.n_estimators.max(1)).map(|_| rng.gen()).collect();
        let max_features = ((n_features as f64).sqrt() as usize).max(1);

        let trees = seeds
            .par_iter()
            .map(|&seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let bootstrap: Vec<usize> = (0..x.len()).map(|_| rng.gen_range(0..x.len())).collect();
                TreeBuilder {
                    x,
                    y,
                    config,
                    n_features,
                    max_features,
                    rng,
                    nodes: Vec::new(),
                }
                .grow(bootstrap)
            })
            .collect();

        Ok(Self {
            n_features,
            trees,
            constant: None,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }

    /// Mean positive-class leaf fraction across trees.
    pub fn predict_proba_one(&self, row: &[f64]) -> f64 {
        if let Some(p) = self.constant {
            return p;
        }
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_one(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict_proba(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.predict_proba_one(r)).collect()
    }

    /// Positive when the probability exceeds 0.5.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<bool> {
        self.predict_proba(rows).into_iter().map(|p| p > 0.5).collect()
    }
}

// =============================================================================
// TRAIN / HOLDOUT SPLIT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffled train/holdout split with `ceil(test_fraction · n)` holdout rows.
///
/// Stratifies by label when both classes have at least two members. Fewer
/// than two rows go entirely to training.
pub fn stratified_split(labels: &[bool], test_fraction: f64, seed: u64) -> SplitIndices {
    let n = labels.len();
    if n < 2 {
        return SplitIndices {
            train: (0..n).collect(),
            test: Vec::new(),
        };
    }
    let n_test = ((test_fraction * n as f64).ceil() as usize).clamp(1, n - 1);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut positives: Vec<usize> = (0..n).filter(|&i| labels[i]).collect();
    let mut negatives: Vec<usize> = (0..n).filter(|&i| !labels[i]).collect();

    let mut split = if positives.len() >= 2 && negatives.len() >= 2 {
        positives.shuffle(&mut rng);
        negatives.shuffle(&mut rng);

        // Proportional allocation, rounded, each class keeping one training row
        let pos_test = ((n_test as f64 * positives.len() as f64 / n as f64).round() as usize)
            .clamp(1, positives.len() - 1);
        let neg_test = n_test
            .saturating_sub(pos_test)
            .clamp(1, negatives.len() - 1);

        let mut test: Vec<usize> = positives[..pos_test].to_vec();
        test.extend_from_slice(&negatives[..neg_test]);
        let mut train: Vec<usize> = positives[pos_test..].to_vec();
        train.extend_from_slice(&negatives[neg_test..]);
        SplitIndices { train, test }
    } else {
        let mut all: Vec<usize> = (0..n).collect();
        all.shuffle(&mut rng);
        SplitIndices {
            test: all[..n_test].to_vec(),
            train: all[n_test..].to_vec(),
        }
    };

    split.train.sort_unstable();
    split.test.sort_unstable();
    split
}
