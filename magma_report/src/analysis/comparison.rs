//! Pairwise comparison of result tables and evaluation against known
//! positives.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::roc::{calculate_roc, RocCurve};
use crate::analysis::stats::{
    fisher_exact, linear_regression, mann_whitney_u, neg_log10, Regression,
};
use crate::models::{
    GeneResult, KnownPositives, ResultKey, ResultRecord, ResultTable, SignificanceColumn,
};

/// Entities with `column < threshold`.
pub fn significant_set(
    table: &ResultTable,
    column: SignificanceColumn,
    threshold: f64,
) -> BTreeSet<String> {
    table
        .records
        .iter()
        .filter(|r| column.value(r) < threshold)
        .map(|r| r.entity.clone())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetDifference {
    pub first: ResultKey,
    pub second: ResultKey,
    pub column: SignificanceColumn,
    pub threshold: f64,
    pub only_first: BTreeSet<String>,
    pub only_second: BTreeSet<String>,
    pub both: BTreeSet<String>,
}

pub fn set_difference(
    a: &ResultTable,
    b: &ResultTable,
    column: SignificanceColumn,
    threshold: f64,
) -> SetDifference {
    let sig_a = significant_set(a, column, threshold);
    let sig_b = significant_set(b, column, threshold);
    let diff = SetDifference {
        first: a.key.clone(),
        second: b.key.clone(),
        column,
        threshold,
        only_first: sig_a.difference(&sig_b).cloned().collect(),
        only_second: sig_b.difference(&sig_a).cloned().collect(),
        both: sig_a.intersection(&sig_b).cloned().collect(),
    };
    info!(
        "{} < {}: {} only in {}, {} only in {}, {} in both",
        column,
        threshold,
        diff.only_first.len(),
        a.key,
        diff.only_second.len(),
        b.key,
        diff.both.len()
    );
    diff
}

/// Per-entity value compared between two tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    NegLog10Q,
    NegLog10P,
    Z,
    Beta,
}

impl Metric {
    pub fn value(&self, record: &ResultRecord) -> f64 {
        match self {
            Metric::NegLog10Q => neg_log10(record.q),
            Metric::NegLog10P => neg_log10(record.p),
            Metric::Z => record.z,
            Metric::Beta => record.beta,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::NegLog10Q => "-log10(Q)",
            Metric::NegLog10P => "-log10(P)",
            Metric::Z => "Z",
            Metric::Beta => "BETA",
        };
        write!(f, "{}", name)
    }
}

/// Records present in both tables, in entity order.
fn shared_records<'a>(
    a: &'a ResultTable,
    b: &'a ResultTable,
) -> Vec<(&'a ResultRecord, &'a ResultRecord)> {
    let b_index = b.by_entity();
    a.by_entity()
        .into_iter()
        .filter_map(|(entity, ra)| b_index.get(entity).map(|rb| (ra, *rb)))
        .collect()
}

fn finite_pairs(pairs: impl Iterator<Item = (f64, f64)>) -> (Vec<f64>, Vec<f64>) {
    pairs.filter(|(x, y)| x.is_finite() && y.is_finite()).unzip()
}

/// Regresses `metric` of `b` on `metric` of `a` over the shared entities.
pub fn paired_regression(a: &ResultTable, b: &ResultTable, metric: Metric) -> Option<Regression> {
    let shared = shared_records(a, b);
    let (x, y) = finite_pairs(shared.iter().map(|(ra, rb)| (metric.value(ra), metric.value(rb))));
    let fit = linear_regression(&x, &y);
    match &fit {
        Some(fit) => info!(
            "{} {} vs {}: n={}, slope={:.4}, r={:.4}, p={:.3e}",
            metric, a.key, b.key, fit.n, fit.slope, fit.r_value, fit.p_value
        ),
        None => warn!(
            "{} {} vs {}: regression not computable on {} shared entities",
            metric,
            a.key,
            b.key,
            x.len()
        ),
    }
    fit
}

/// Does a change in gene-set size explain the change in significance?
/// Regresses the `-log10 q` difference on the NGENES difference.
pub fn gene_count_regression(a: &ResultTable, b: &ResultTable) -> Option<Regression> {
    let shared = shared_records(a, b);
    let (x, y) = finite_pairs(shared.iter().map(|(ra, rb)| {
        (
            rb.n_genes as f64 - ra.n_genes as f64,
            Metric::NegLog10Q.value(rb) - Metric::NegLog10Q.value(ra),
        )
    }));
    let fit = linear_regression(&x, &y);
    if fit.is_none() {
        warn!("{} vs {}: gene count regression not computable", a.key, b.key);
    }
    fit
}

/// Regresses `-log10 P` of the gene analysis between two annotation methods,
/// on genes present in both.
pub fn compare_gene_results(a: &[GeneResult], b: &[GeneResult]) -> Option<Regression> {
    let b_index: BTreeMap<&str, &GeneResult> = b.iter().map(|g| (g.gene.as_str(), g)).collect();
    let (x, y) = finite_pairs(a.iter().filter_map(|ga| {
        b_index
            .get(ga.gene.as_str())
            .map(|gb| (neg_log10(ga.best_p()), neg_log10(gb.best_p())))
    }));
    info!("{} genes shared between gene analyses", x.len());
    linear_regression(&x, &y)
}

/// Outcome of thresholding one table against known positives.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub key: ResultKey,
    pub column: SignificanceColumn,
    pub threshold: f64,
    pub true_positives: BTreeSet<String>,
    pub false_positives: BTreeSet<String>,
    pub true_negatives: BTreeSet<String>,
    pub false_negatives: BTreeSet<String>,
    pub sensitivity: Option<f64>,
    pub specificity: Option<f64>,
    /// Positives vs negatives on the significance value
    pub mann_whitney_p: Option<f64>,
    /// Significant x positive 2x2 table
    pub fisher_p: Option<f64>,
    pub roc: Option<RocCurve>,
}

impl Classification {
    pub fn counts(&self) -> [usize; 4] {
        [
            self.true_positives.len(),
            self.false_positives.len(),
            self.true_negatives.len(),
            self.false_negatives.len(),
        ]
    }

    pub fn significant(&self) -> BTreeSet<String> {
        self.true_positives.union(&self.false_positives).cloned().collect()
    }

    pub fn auc(&self) -> Option<f64> {
        self.roc.as_ref().map(|r| r.auc)
    }
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    if den == 0 {
        None
    } else {
        Some(num as f64 / den as f64)
    }
}

pub fn classify(
    table: &ResultTable,
    positives: &KnownPositives,
    column: SignificanceColumn,
    threshold: f64,
) -> Classification {
    let mut tp = BTreeSet::new();
    let mut fp = BTreeSet::new();
    let mut tn = BTreeSet::new();
    let mut fn_ = BTreeSet::new();
    let mut pos_values = Vec::new();
    let mut neg_values = Vec::new();
    let mut labels = Vec::new();
    let mut scores = Vec::new();

    for record in &table.records {
        let value = column.value(record);
        let is_positive = positives.contains(&record.entity);
        let is_significant = value < threshold;
        let entity = record.entity.clone();
        match (is_significant, is_positive) {
            (true, true) => tp.insert(entity),
            (true, false) => fp.insert(entity),
            (false, false) => tn.insert(entity),
            (false, true) => fn_.insert(entity),
        };
        if value.is_finite() {
            if is_positive {
                pos_values.push(value);
            } else {
                neg_values.push(value);
            }
            labels.push(is_positive);
            scores.push(1.0 - value);
        }
    }

    let sensitivity = ratio(tp.len(), tp.len() + fn_.len());
    let specificity = ratio(tn.len(), tn.len() + fp.len());

    let computable = !positives.is_empty() && !pos_values.is_empty() && !neg_values.is_empty();
    let (mann_whitney_p, fisher_p, roc) = if computable {
        let fisher_table = [
            [tp.len() as u64, fp.len() as u64],
            [fn_.len() as u64, tn.len() as u64],
        ];
        (
            mann_whitney_u(&pos_values, &neg_values).map(|m| m.p_value),
            fisher_exact(fisher_table),
            calculate_roc(&labels, &scores),
        )
    } else {
        warn!(
            "{}: classification metrics not computable \
             ({} known positives, {} finite positive, {} finite negative values)",
            table.key,
            positives.len(),
            pos_values.len(),
            neg_values.len()
        );
        (None, None, None)
    };

    let classification = Classification {
        key: table.key.clone(),
        column,
        threshold,
        true_positives: tp,
        false_positives: fp,
        true_negatives: tn,
        false_negatives: fn_,
        sensitivity,
        specificity,
        mann_whitney_p,
        fisher_p,
        roc,
    };
    let [n_tp, n_fp, n_tn, n_fn] = classification.counts();
    info!(
        "{} {} < {}: TP={} FP={} TN={} FN={} AUC={:?}",
        table.key,
        column,
        threshold,
        n_tp,
        n_fp,
        n_tn,
        n_fn,
        classification.auc()
    );
    classification
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table(source: &str, values: &[(&str, f64)]) -> ResultTable {
        ResultTable {
            key: ResultKey::new(source, "prox"),
            records: values
                .iter()
                .map(|(entity, p)| {
                    let mut r = ResultRecord::new(entity.to_string(), 10, 0.1, 0.01, 0.05, *p);
                    r.q = *p;
                    r
                })
                .collect(),
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn positives(items: &[&str]) -> KnownPositives {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn two_table_scenario() {
        let first = table("duggie", &[("A", 0.01), ("B", 0.2), ("C", 0.8)]);
        let second = table("stitch", &[("A", 0.03), ("B", 0.04), ("C", 0.9)]);
        let known = positives(&["A"]);

        let c1 = classify(&first, &known, SignificanceColumn::Q, 0.05);
        assert_eq!(c1.true_positives, set(&["A"]));
        assert!(c1.false_positives.is_empty());
        assert_eq!(c1.true_negatives, set(&["B", "C"]));

        let c2 = classify(&second, &known, SignificanceColumn::Q, 0.05);
        assert_eq!(c2.significant(), set(&["A", "B"]));
        assert_eq!(c2.true_positives, set(&["A"]));
        assert_eq!(c2.false_positives, set(&["B"]));
        assert_eq!(c2.counts(), [1, 1, 1, 0]);
        assert_relative_eq!(c2.sensitivity.unwrap(), 1.0);
        assert_relative_eq!(c2.specificity.unwrap(), 0.5);

        // A has the lowest value in both, so ranking is perfect
        assert_relative_eq!(c1.auc().unwrap(), 1.0);
        assert_relative_eq!(c2.auc().unwrap(), 1.0);
        assert!(c1.fisher_p.is_some());
        assert!(c1.mann_whitney_p.is_some());
    }

    #[test]
    fn empty_known_set_is_not_computable() {
        let t = table("duggie", &[("A", 0.01), ("B", 0.2), ("C", 0.8)]);
        let c = classify(&t, &KnownPositives::new(), SignificanceColumn::Q, 0.05);
        assert!(c.mann_whitney_p.is_none());
        assert!(c.fisher_p.is_none());
        assert!(c.roc.is_none());
        assert!(c.sensitivity.is_none());
        assert_eq!(c.false_positives, set(&["A"]));
    }

    #[test]
    fn no_finite_values_is_not_computable() {
        let t = table("duggie", &[("A", f64::NAN), ("B", f64::NAN)]);
        let c = classify(&t, &positives(&["A"]), SignificanceColumn::P, 0.05);
        assert!(c.roc.is_none());
        assert!(c.mann_whitney_p.is_none());
    }

    #[test]
    fn threshold_is_strict() {
        let t = table("duggie", &[("A", 0.05), ("B", 0.0499)]);
        assert_eq!(significant_set(&t, SignificanceColumn::P, 0.05), set(&["B"]));
    }

    #[test]
    fn set_differences() {
        let a = table("duggie", &[("A", 0.01), ("B", 0.2), ("C", 0.01)]);
        let b = table("stitch", &[("A", 0.03), ("B", 0.04), ("D", 0.01)]);
        let diff = set_difference(&a, &b, SignificanceColumn::Q, 0.05);
        assert_eq!(diff.only_first, set(&["C"]));
        assert_eq!(diff.only_second, set(&["B", "D"]));
        assert_eq!(diff.both, set(&["A"]));
        assert_eq!(diff.column, SignificanceColumn::Q);
    }

    #[test]
    fn regression_over_shared_entities() {
        let a = table("duggie", &[("A", 0.1), ("B", 0.01), ("C", 0.001), ("X", 0.5)]);
        let b = table("stitch", &[("A", 0.01), ("B", 0.001), ("C", 0.0001), ("Y", 0.5)]);
        let fit = paired_regression(&a, &b, Metric::NegLog10Q).unwrap();
        assert_eq!(fit.n, 3);
        assert_relative_eq!(fit.slope, 1.0, epsilon = 1e-9);
        assert_relative_eq!(fit.intercept, 1.0, epsilon = 1e-9);

        let small = table("stitch", &[("A", 0.01)]);
        assert!(paired_regression(&a, &small, Metric::default()).is_none());
    }

    #[test]
    fn gene_count_differences() {
        let mut a = table("duggie", &[("A", 0.1), ("B", 0.1), ("C", 0.1)]);
        let b = table("stitch", &[("A", 0.1), ("B", 0.01), ("C", 0.001)]);
        for (r, n) in a.records.iter_mut().zip([10, 9, 8]) {
            r.n_genes = n;
        }
        // size differences 0, 1, 2 against significance gains 0, 1, 2
        let fit = gene_count_regression(&a, &b).unwrap();
        assert_relative_eq!(fit.slope, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn gene_level_comparison() {
        let gene = |name: &str, p: f64| GeneResult {
            gene: name.to_string(),
            chrom: "1".to_string(),
            start: 1,
            stop: 2,
            n_snps: 10,
            n_param: 2,
            n: 1000.0,
            z_stat: 1.0,
            p,
            p_multi: Some(p),
            permp_multi: None,
        };
        let a = vec![gene("G1", 0.1), gene("G2", 0.01), gene("G3", 0.0), gene("G4", 0.5)];
        let b = vec![gene("G1", 0.1), gene("G2", 0.01), gene("G3", 0.0)];
        let fit = compare_gene_results(&a, &b).unwrap();
        assert_eq!(fit.n, 3);
        assert_relative_eq!(fit.slope, 1.0, epsilon = 1e-9);
    }
}
