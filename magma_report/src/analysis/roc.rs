use std::cmp::Ordering;

use tracing::info;

/// Holds FPR/TPR pairs, thresholds, and the final AUC for one ROC curve.
#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    pub fprs: Vec<f64>,
    pub tprs: Vec<f64>,
    pub thresholds: Vec<f64>,
    pub auc: f64,
}

/// ROC curve for `scores` against boolean `labels`, higher score meaning more
/// likely positive. One point is emitted per distinct score, starting from
/// (0, 0) at an infinite threshold.
///
/// Returns `None` when all instances are in one class, the curve is
/// degenerate then.
pub fn calculate_roc(labels: &[bool], scores: &[f64]) -> Option<RocCurve> {
    if labels.len() != scores.len() {
        return None;
    }
    let positive_count = labels.iter().filter(|&&l| l).count();
    let negative_count = labels.len() - positive_count;
    if positive_count == 0 || negative_count == 0 {
        info!("All instances are in one class, ROC curve is not computable");
        return None;
    }

    // Pair predictions with actual labels and sort by prediction (descending)
    let mut paired_data: Vec<(f64, bool)> = scores
        .iter()
        .cloned()
        .zip(labels.iter().cloned())
        .collect();
    paired_data.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    let mut fprs = vec![0.0];
    let mut tprs = vec![0.0];
    let mut thresholds = vec![f64::INFINITY];

    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut i = 0;
    while i < paired_data.len() {
        let score = paired_data[i].0;
        // Tied scores move the curve in one step
        while i < paired_data.len() && paired_data[i].0 == score {
            if paired_data[i].1 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        fprs.push(fp as f64 / negative_count as f64);
        tprs.push(tp as f64 / positive_count as f64);
        thresholds.push(score);
    }

    let auc = calculate_auc(&fprs, &tprs);
    Some(RocCurve {
        fprs,
        tprs,
        thresholds,
        auc,
    })
}

/// Trapezoid area under the (FPR, TPR) points of a ranked entity list.
/// Mismatched or single point inputs give 0.
pub fn calculate_auc(fprs: &[f64], tprs: &[f64]) -> f64 {
    if fprs.len() != tprs.len() || fprs.len() < 2 {
        return 0.0;
    }

    fprs.windows(2)
        .zip(tprs.windows(2))
        .map(|(x, y)| (x[1] - x[0]) * (y[1] + y[0]) / 2.0)
        .sum()
}
