//! Classification and ranking metrics.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::HashSet;

/// Binary classification metrics; any zero denominator yields 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ClassificationMetrics {
    pub fn compute(y_true: &[bool], y_pred: &[bool]) -> Self {
        let n = y_true.len().min(y_pred.len());
        if n == 0 {
            return Self::default();
        }

        let (mut tp, mut fp, mut fneg, mut correct) = (0usize, 0usize, 0usize, 0usize);
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t, p) {
                (true, true) => tp += 1,
                (false, true) => fp += 1,
                (true, false) => fneg += 1,
                (false, false) => {}
            }
            if t == p {
                correct += 1;
            }
        }

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fneg);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };

        Self {
            accuracy: ratio(correct, n),
            precision,
            recall,
            f1,
        }
    }

    /// Element-wise mean over a set of records.
    pub fn mean(records: &[ClassificationMetrics]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        Self {
            accuracy: records.iter().map(|m| m.accuracy).mean(),
            precision: records.iter().map(|m| m.precision).mean(),
            recall: records.iter().map(|m| m.recall).mean(),
            f1: records.iter().map(|m| m.f1).mean(),
        }
    }
}

/// Fraction of the top `k` ranked contracts that are in `truth`.
/// 0 when `k` is 0 or `truth` is empty.
pub fn precision_at_k(ranked: &[String], truth: &HashSet<String>, k: usize) -> f64 {
    if k == 0 || truth.is_empty() {
        return 0.0;
    }
    let hits = ranked.iter().take(k).filter(|c| truth.contains(*c)).count();
    hits as f64 / k as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_basic() {
        let y_true = [true, true, false, false, true];
        let y_pred = [true, false, true, false, true];
        let m = ClassificationMetrics::compute(&y_true, &y_pred);

        assert!((m.accuracy - 0.6).abs() < 1e-12);
        assert!((m.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.f1 - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_division_is_zero() {
        let m = ClassificationMetrics::compute(&[false, false], &[false, false]);
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert_eq!(ClassificationMetrics::compute(&[], &[]), ClassificationMetrics::default());
    }

    #[test]
    fn test_precision_at_k() {
        let ranked: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let truth: HashSet<String> = ["b", "d", "z"].iter().map(|s| s.to_string()).collect();

        assert_eq!(precision_at_k(&ranked, &truth, 2), 0.5);
        assert_eq!(precision_at_k(&ranked, &truth, 4), 0.5);
        assert_eq!(precision_at_k(&ranked, &truth, 0), 0.0);
        assert_eq!(precision_at_k(&ranked, &HashSet::new(), 3), 0.0);
        // K beyond the list still divides by K
        assert_eq!(precision_at_k(&ranked[..1], &truth, 2), 0.0);
        for k in 0..6 {
            let p = precision_at_k(&ranked, &truth, k);
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_mean_metrics() {
        let a = ClassificationMetrics {
            accuracy: 1.0,
            precision: 0.5,
            recall: 0.0,
            f1: 0.2,
        };
        let b = ClassificationMetrics::default();
        let m = ClassificationMetrics::mean(&[a, b]);
        assert_eq!(m.accuracy, 0.5);
        assert_eq!(m.precision, 0.25);
        assert!((m.f1 - 0.1).abs() < 1e-12);
    }
}
