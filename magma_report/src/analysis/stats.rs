//! Small numeric routines shared by the loader and the reporter. Every
//! function here is pure.

use adjustp::{adjust, Procedure};
use anyhow::{Context, Result};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Discrete, Hypergeometric, Normal, StudentsT};

/// Substituted for non-finite z-scores (p of exactly 0 or 1).
pub const Z_SENTINEL: f64 = 0.0;
/// Substituted for significance values of exactly zero before a log.
pub const LOG_EPSILON: f64 = 1e-5;

pub fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).context("normal distribution")
}

/// MAGMA-style z-score, `Φ⁻¹(1 − p)`: larger means more significant.
///
/// Evaluated as `-Φ⁻¹(p)`, since `1 − p` rounds to 1 for p below ~1e-16.
pub fn z_score(p: f64, normal: &Normal) -> f64 {
    if !(p > 0.0 && p < 1.0) {
        return Z_SENTINEL;
    }
    let z = -normal.inverse_cdf(p);
    if z.is_finite() {
        z
    } else {
        Z_SENTINEL
    }
}

pub fn z_scores(pvalues: &[f64]) -> Result<Vec<f64>> {
    let normal = standard_normal()?;
    Ok(pvalues.iter().map(|&p| z_score(p, &normal)).collect())
}

/// Benjamini-Hochberg adjusted p-values, in input order.
pub fn q_values(pvalues: &[f64]) -> Vec<f64> {
    if pvalues.is_empty() {
        return Vec::new();
    }
    adjust(pvalues, Procedure::BenjaminiHochberg)
}

pub fn neg_log10(x: f64) -> f64 {
    let x = if x <= 0.0 { LOG_EPSILON } else { x };
    -x.log10()
}

/// Ordinary least squares fit of `y` on `x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Regression {
    pub n: usize,
    pub slope: f64,
    pub intercept: f64,
    pub r_value: f64,
    pub p_value: f64,
    pub std_err: f64,
}

/// Returns `None` for fewer than three points or a constant `x`.
pub fn linear_regression(x: &[f64], y: &[f64]) -> Option<Regression> {
    if x.len() != y.len() || x.len() < 3 {
        return None;
    }
    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;

    let mut ssxm = 0.0;
    let mut ssym = 0.0;
    let mut ssxym = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        let dx = xi - x_mean;
        let dy = yi - y_mean;
        ssxm += dx * dx;
        ssym += dy * dy;
        ssxym += dx * dy;
    }
    if ssxm == 0.0 {
        return None;
    }

    let r_value = if ssym == 0.0 {
        0.0
    } else {
        (ssxym / (ssxm * ssym).sqrt()).clamp(-1.0, 1.0)
    };
    let slope = ssxym / ssxm;
    let intercept = y_mean - slope * x_mean;
    let df = n - 2.0;

    let (p_value, std_err) = if (1.0 - r_value.abs()) < 1e-12 {
        (0.0, 0.0)
    } else {
        let t = r_value * (df / ((1.0 - r_value) * (1.0 + r_value))).sqrt();
        let p = StudentsT::new(0.0, 1.0, df)
            .map(|dist| 2.0 * dist.sf(t.abs()))
            .unwrap_or(f64::NAN);
        let se = ((1.0 - r_value * r_value) * ssym / ssxm / df).sqrt();
        (p, se)
    };

    Some(Regression {
        n: x.len(),
        slope,
        intercept,
        r_value,
        p_value,
        std_err,
    })
}

/// Average ranks (1-based), ties share the mean of their positions.
pub fn rank_data(vals: &[f64]) -> Vec<f64> {
    let mut indexed: Vec<(usize, f64)> = vals.iter().cloned().enumerate().collect();
    indexed.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut ranks = vec![0.0; vals.len()];
    let mut i = 0;
    while i < indexed.len() {
        let mut j = i;
        while j < indexed.len() && indexed[j].1 == indexed[i].1 {
            j += 1;
        }
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        for item in &indexed[i..j] {
            ranks[item.0] = avg_rank;
        }
        i = j;
    }
    ranks
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MannWhitney {
    /// U statistic of the first sample
    pub u: f64,
    pub p_value: f64,
}

/// Two-sided Mann-Whitney U test, normal approximation with tie and
/// continuity correction. `None` when either sample is empty.
pub fn mann_whitney_u(x: &[f64], y: &[f64]) -> Option<MannWhitney> {
    if x.is_empty() || y.is_empty() {
        return None;
    }
    let n1 = x.len() as f64;
    let n2 = y.len() as f64;
    let n = n1 + n2;

    let mut all: Vec<f64> = x.to_vec();
    all.extend_from_slice(y);
    let ranks = rank_data(&all);
    let r1: f64 = ranks[..x.len()].iter().sum();
    let u1 = r1 - n1 * (n1 + 1.0) / 2.0;

    let mut sorted = all.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        let t = (j - i) as f64;
        tie_term += t * t * t - t;
        i = j;
    }

    let mu = n1 * n2 / 2.0;
    let sigma = (n1 * n2 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)))).sqrt();
    if !(sigma > 0.0) {
        // every value tied
        return Some(MannWhitney { u: u1, p_value: 1.0 });
    }

    let z = ((u1 - mu).abs() - 0.5).max(0.0) / sigma;
    let normal = standard_normal().ok()?;
    let p_value = (2.0 * normal.sf(z)).min(1.0);
    Some(MannWhitney { u: u1, p_value })
}

/// Two-sided Fisher exact test on `[[a, b], [c, d]]`: the summed probability of
/// every table with the same margins that is no more likely than the observed one.
pub fn fisher_exact(table: [[u64; 2]; 2]) -> Option<f64> {
    let [[a, b], [c, d]] = table;
    let total = a + b + c + d;
    if total == 0 {
        return None;
    }
    let successes = a + c;
    let draws = a + b;
    let dist = Hypergeometric::new(total, successes, draws).ok()?;

    let p_observed = dist.pmf(a);
    let lo = (draws + successes).saturating_sub(total);
    let hi = successes.min(draws);
    let p: f64 = (lo..=hi)
        .map(|k| dist.pmf(k))
        .filter(|&pk| pk <= p_observed * (1.0 + 1e-7))
        .sum();
    Some(p.min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn z_is_monotonically_decreasing_in_p() {
        let normal = standard_normal().unwrap();
        let ps: Vec<f64> = (1..1000).map(|i| i as f64 / 1000.0).collect();
        let zs: Vec<f64> = ps.iter().map(|&p| z_score(p, &normal)).collect();
        for w in zs.windows(2) {
            assert!(w[0] > w[1]);
        }
        assert_relative_eq!(z_score(0.5, &normal), 0.0, epsilon = 1e-9);
        assert_relative_eq!(z_score(0.05, &normal), 1.6448536269514722, epsilon = 1e-6);
    }

    #[test]
    fn z_keeps_growing_for_tiny_p() {
        let normal = standard_normal().unwrap();
        let ps = [1e-300, 1e-20, 1e-17, 1e-10, 1e-3];
        let zs: Vec<f64> = ps.iter().map(|&p| z_score(p, &normal)).collect();
        assert!(zs.iter().all(|z| z.is_finite()));
        for w in zs.windows(2) {
            assert!(w[0] > w[1], "z not decreasing: {:?}", zs);
        }
        assert_relative_eq!(zs[3], 6.361340889697423, epsilon = 1e-6);
    }

    #[test]
    fn p_of_one_gives_sentinel() {
        let zs = z_scores(&[1.0, 0.0]).unwrap();
        assert_eq!(zs, vec![Z_SENTINEL, Z_SENTINEL]);
        assert!(zs.iter().all(|z| z.is_finite()));
    }

    #[test]
    fn bh_q_values() {
        let q = q_values(&[0.01, 0.04, 0.03, 0.5]);
        assert_relative_eq!(q[0], 0.04, epsilon = 1e-12);
        assert_relative_eq!(q[1], 0.04 * 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(q[2], 0.04 * 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(q[3], 0.5, epsilon = 1e-12);
        assert!(q_values(&[]).is_empty());
    }

    #[test]
    fn zero_is_floored_before_log() {
        assert_relative_eq!(neg_log10(0.0), 5.0, epsilon = 1e-12);
        assert_relative_eq!(neg_log10(0.01), 2.0, epsilon = 1e-12);
        // real small values are not clipped
        assert_relative_eq!(neg_log10(1e-8), 8.0, epsilon = 1e-12);
    }

    #[test]
    fn regression_on_a_line() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [3.0, 5.0, 7.0, 9.0];
        let fit = linear_regression(&x, &y).unwrap();
        assert_relative_eq!(fit.slope, 2.0, epsilon = 1e-12);
        assert_relative_eq!(fit.intercept, 1.0, epsilon = 1e-12);
        assert_relative_eq!(fit.r_value, 1.0, epsilon = 1e-12);
        assert_eq!(fit.std_err, 0.0);
        assert_eq!(fit.p_value, 0.0);
    }

    #[test]
    fn regression_with_noise() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 5.0, 4.0, 5.0];
        let fit = linear_regression(&x, &y).unwrap();
        assert_relative_eq!(fit.slope, 0.6, epsilon = 1e-12);
        assert_relative_eq!(fit.intercept, 2.2, epsilon = 1e-12);
        assert_relative_eq!(fit.r_value, 0.7745966692414834, epsilon = 1e-12);
        assert!(fit.p_value > 0.1 && fit.p_value < 0.15);
    }

    #[test]
    fn regression_not_computable() {
        assert!(linear_regression(&[1.0, 2.0], &[1.0, 2.0]).is_none());
        assert!(linear_regression(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn ranks_average_ties() {
        assert_eq!(rank_data(&[3.0, 1.0, 3.0, 2.0]), vec![3.5, 1.0, 3.5, 2.0]);
    }

    #[test]
    fn mann_whitney_separated_groups() {
        let res = mann_whitney_u(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0, 7.0]).unwrap();
        assert_eq!(res.u, 0.0);
        assert_relative_eq!(res.p_value, 0.05182992721790969, epsilon = 1e-6);
        assert!(mann_whitney_u(&[], &[1.0]).is_none());
    }

    #[test]
    fn mann_whitney_all_tied() {
        let res = mann_whitney_u(&[1.0, 1.0], &[1.0, 1.0]).unwrap();
        assert_eq!(res.p_value, 1.0);
    }

    #[test]
    fn fisher_reference_table() {
        let p = fisher_exact([[8, 2], [1, 5]]).unwrap();
        assert_relative_eq!(p, 0.03496503496503496, epsilon = 1e-9);
        let p = fisher_exact([[1, 1], [1, 1]]).unwrap();
        assert_relative_eq!(p, 1.0, epsilon = 1e-9);
        assert!(fisher_exact([[0, 0], [0, 0]]).is_none());
    }
}
