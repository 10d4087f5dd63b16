//! This module implements rarefaction curves with the smoothed Good-Toulmin estimator.
//!
//! It provides functionality to:
//! - Estimate the number of unseen fragments revealed by sequencing t-fold more reads.
//! - Sample the estimator over a grid of fold-changes to build a rarefaction curve.
//! - Read and write curve tables.
//!
//! For t <= 1 the classical Good-Toulmin series converges and is evaluated directly. For
//! t > 1 the series is truncated at a Binomial(k, 2 / (2 + t)) distributed number of terms
//! and averaged over many draws, following Orlitsky et al. (arXiv:1511.07428).

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use rand::Rng;
use rand_distr::{Binomial, Distribution};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Serialize;

use crate::histogram::DuplicateHistogram;
use crate::io_utils::{create_writer, open_reader};
use crate::progress::progress_bar;
use crate::rarefaction_params::RarefactionParams;

/// Single point on a rarefaction curve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurvePoint {
    /// Fold-change of the sample size.
    pub x: f64,
    /// Expected number of unique fragments.
    pub y: f64,
}

/// Summary of a rarefaction run written alongside the curve.
#[derive(Clone, Debug, Serialize)]
pub struct RarefactionSummary {
    pub input: String,
    pub unique_fragments: u64,
    pub sample_size: u64,
    pub histogram_length: usize,
    /// Effective maximum fold-change of the curve.
    pub max_fold: f64,
    pub num_points: usize,
    pub params: RarefactionParams,
}

/// Good-Toulmin sum over the first `terms` histogram entries.
///
/// Coefficient i is -(-t)^(i+1). Entries past the end of the histogram are zero.
fn truncated_good_toulmin(hist: &[u64], t: f64, terms: usize) -> f64 {
    let mut coeff = t;
    let mut sum = 0.0;
    for &count in hist.iter().take(terms) {
        sum += coeff * count as f64;
        coeff *= -t;
    }

    sum
}

/// Number of trials of the binomial smoothing distribution, ceil(0.5 * log3(n * t^(2/(t-1)))).
///
/// Only defined for t > 1.
fn smoothing_kernel_size(sample_size: u64, t: f64) -> u64 {
    let log3 = ((sample_size as f64).ln() + (2.0 / (t - 1.0)) * t.ln()) / 3f64.ln();
    (0.5 * log3).ceil().max(0.0) as u64
}

/// Smoothed Good-Toulmin estimate of the number of new fragments at fold-change `t`.
///
/// The result is relative to the fragments already observed.
pub fn smoothed_good_toulmin<R: Rng>(
    hist: &DuplicateHistogram,
    sample_size: u64,
    t: f64,
    num_samples: usize,
    rng: &mut R,
) -> Result<f64> {
    if !t.is_finite() || t < 0.0 {
        bail!("Fold-change must be a non-negative number, got {}", t);
    }

    // series converges, no smoothing required
    if t <= 1.0 {
        return Ok(truncated_good_toulmin(hist.counts(), t, hist.max_duplicates()));
    }

    if num_samples == 0 {
        bail!("Number of smoothing samples must be at least 1.");
    }

    let k = smoothing_kernel_size(sample_size, t);
    let q = 2.0 / (2.0 + t);
    debug!("Smoothing at t = {:.3}: B({}, {:.4})", t, k, q);
    let binomial = Binomial::new(k, q)
        .map_err(|e| anyhow!("Invalid smoothing distribution B({}, {}): {}", k, q, e))?;

    // draws are taken sequentially so seeded runs do not depend on the thread count
    let truncations: Vec<u64> = (0..num_samples).map(|_| binomial.sample(rng)).collect();

    let estimates: Vec<f64> = truncations
        .par_iter()
        .map(|&l| truncated_good_toulmin(hist.counts(), t, l as usize))
        .collect();

    Ok(estimates.iter().sum::<f64>() / estimates.len() as f64)
}

/// Build a rarefaction curve over fold-changes 0, step, 2*step, ... below the maximum fold-change.
///
/// Every extrapolated point is relative to the observed number of unique fragments.
pub fn build_curve<R: Rng>(
    hist: &DuplicateHistogram,
    params: &RarefactionParams,
    rng: &mut R,
) -> Result<Vec<CurvePoint>> {
    let sample_size = hist.sample_size();
    let max_fold = params.max_fold(sample_size);
    if max_fold <= 0.0 {
        bail!(
            "Maximum fold-change is {} for a sample of {} reads; the curve would be empty. Set --max-fold to extrapolate.",
            max_fold,
            sample_size
        );
    }

    let fold_changes: Vec<f64> = (0u64..)
        .map(|i| i as f64 * params.step())
        .take_while(|&x| x < max_fold)
        .collect();

    let progress_bar = progress_bar(fold_changes.len() as u64);

    let anchor = hist.unique_count() as f64;
    let mut curve = Vec::with_capacity(fold_changes.len());
    for x in fold_changes {
        let y = if x == 0.0 {
            anchor
        } else {
            anchor + smoothed_good_toulmin(hist, sample_size, x, params.num_samples(), rng)?
        };
        curve.push(CurvePoint { x, y });
        progress_bar.inc(1);
    }

    progress_bar.finish();

    Ok(curve)
}

/// Write curve as a tab-separated table with an `x\ty` header.
pub fn write_curve(path: &Path, curve: &[CurvePoint]) -> Result<()> {
    let mut writer = create_writer(path)?;

    writeln!(writer, "x\ty")?;
    for point in curve {
        writeln!(writer, "{}\t{}", point.x, point.y)?;
    }
    writer.flush()?;

    Ok(())
}

/// Read a curve table written by `write_curve`.
pub fn read_curve(path: &Path) -> Result<Vec<CurvePoint>> {
    let reader = open_reader(path)?;

    let mut curve = Vec::new();
    for (line_idx, line) in reader.lines().enumerate().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let (x, y) = line
            .split_once('\t')
            .ok_or_else(|| anyhow!("Line {}: expected 2 tab-separated columns (x, y).", line_idx + 1))?;

        let x: f64 = x
            .trim()
            .parse()
            .with_context(|| format!("Line {}: invalid x value `{}`", line_idx + 1, x))?;
        let y: f64 = y
            .trim()
            .parse()
            .with_context(|| format!("Line {}: invalid y value `{}`", line_idx + 1, y))?;
        curve.push(CurvePoint { x, y });
    }

    Ok(curve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    fn example_histogram() -> DuplicateHistogram {
        DuplicateHistogram::from_histogram(vec![1000, 300, 100, 30, 10, 3, 1]).unwrap()
    }

    fn variance(values: &[f64]) -> f64 {
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
    }

    #[test]
    fn test_unsmoothed_closed_form() {
        // two fragments seen once, one fragment seen twice
        let hist = DuplicateHistogram::from_histogram(vec![2, 1]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let estimate = smoothed_good_toulmin(&hist, hist.sample_size(), 0.5, 10, &mut rng).unwrap();
        assert_eq!(estimate, 0.75);

        // t = 1 stays on the unsmoothed branch
        let estimate = smoothed_good_toulmin(&hist, hist.sample_size(), 1.0, 10, &mut rng).unwrap();
        assert_eq!(estimate, 1.0);
    }

    #[test]
    fn test_unsmoothed_ignores_rng() {
        let hist = example_histogram();
        let n = hist.sample_size();

        let a = smoothed_good_toulmin(&hist, n, 0.3, 10, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = smoothed_good_toulmin(&hist, n, 0.3, 10, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_truncated_sum_zero_pads() {
        assert_eq!(truncated_good_toulmin(&[5], 3.0, 4), 15.0);
        assert_eq!(truncated_good_toulmin(&[5], 3.0, 0), 0.0);
        assert_eq!(truncated_good_toulmin(&[5, 2], 3.0, 2), 15.0 - 18.0);
    }

    #[test]
    fn test_smoothing_kernel_size() {
        // ceil(0.5 * log3(4 * 2^2)) = ceil(1.26)
        assert_eq!(smoothing_kernel_size(4, 2.0), 2);
        // ceil(0.5 * log3(5 * 3)) = ceil(1.23)
        assert_eq!(smoothing_kernel_size(5, 3.0), 2);
    }

    #[test]
    fn test_smoothed_singletons_only() {
        // only singletons observed; truncations above 1 must fall back to zero padding
        let hist = DuplicateHistogram::from_histogram(vec![5]).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let estimate = smoothed_good_toulmin(&hist, hist.sample_size(), 3.0, 500, &mut rng).unwrap();
        assert!(estimate.is_finite());
        assert!((0.0..=15.0).contains(&estimate));
    }

    #[test]
    fn test_smoothed_matches_expectation() {
        // k = 2 and q = 0.4, so U is 15 unless L = 0: E[U] = 15 * (1 - 0.6^2) = 9.6
        let hist = DuplicateHistogram::from_histogram(vec![5]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let estimate = smoothed_good_toulmin(&hist, hist.sample_size(), 3.0, 200_000, &mut rng).unwrap();
        assert!((estimate - 9.6).abs() < 0.1, "estimate {}", estimate);
    }

    #[test]
    fn test_smoothed_is_reproducible_with_seed() {
        let hist = example_histogram();
        let n = hist.sample_size();

        let a = smoothed_good_toulmin(&hist, n, 2.5, 200, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = smoothed_good_toulmin(&hist, n, 2.5, 200, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_more_samples_reduce_variance() {
        let hist = example_histogram();
        let n = hist.sample_size();

        let few: Vec<f64> = (0..30)
            .map(|seed| smoothed_good_toulmin(&hist, n, 2.0, 10, &mut StdRng::seed_from_u64(seed)).unwrap())
            .collect();
        let many: Vec<f64> = (0..30)
            .map(|seed| smoothed_good_toulmin(&hist, n, 2.0, 2000, &mut StdRng::seed_from_u64(seed)).unwrap())
            .collect();

        assert!(variance(&many) < variance(&few));
    }

    #[test]
    fn test_invalid_fold_change() {
        let hist = example_histogram();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(smoothed_good_toulmin(&hist, 10, -1.0, 10, &mut rng).is_err());
        assert!(smoothed_good_toulmin(&hist, 10, f64::NAN, 10, &mut rng).is_err());
        assert!(smoothed_good_toulmin(&hist, 10, 2.0, 0, &mut rng).is_err());
    }

    #[test]
    fn test_curve_anchor_and_grid() {
        let hist = example_histogram();
        let params = RarefactionParams::new(0.1, 100, Some(1), None).unwrap();
        let curve = build_curve(&hist, &params, &mut params.create_rng()).unwrap();

        // n = 2095, so fold-changes run from 0 up to but excluding 3
        assert_eq!(curve.len(), 30);
        assert_eq!(curve[0], CurvePoint { x: 0.0, y: 1444.0 });
        assert!(curve.iter().all(|p| p.x < 3.0));
        assert!(curve.windows(2).all(|w| w[0].x < w[1].x));

        // points are anchored to the observed count, not accumulated
        let expected = 1444.0 + truncated_good_toulmin(hist.counts(), 0.5, hist.max_duplicates());
        assert_eq!(curve[5].y, expected);
    }

    #[test]
    fn test_curve_is_non_decreasing() {
        let hist = example_histogram();
        let params = RarefactionParams::new(0.5, 5000, Some(42), None).unwrap();
        let curve = build_curve(&hist, &params, &mut params.create_rng()).unwrap();

        assert_eq!(curve.len(), 6);
        for pair in curve.windows(2) {
            assert!(pair[1].y >= pair[0].y, "{:?} then {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_curve_is_reproducible_with_seed() {
        let hist = example_histogram();
        let params = RarefactionParams::new(0.25, 300, Some(9), None).unwrap();

        let a = build_curve(&hist, &params, &mut params.create_rng()).unwrap();
        let b = build_curve(&hist, &params, &mut params.create_rng()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_curve_independent_of_thread_count() {
        let hist = example_histogram();
        let params = RarefactionParams::new(0.25, 500, Some(11), None).unwrap();

        let curves: Vec<Vec<CurvePoint>> = [1, 4]
            .into_iter()
            .map(|threads| {
                let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
                pool.install(|| build_curve(&hist, &params, &mut params.create_rng()).unwrap())
            })
            .collect();

        assert_eq!(curves[0].len(), 12);
        assert_eq!(curves[0], curves[1]);
    }

    #[test]
    fn test_empty_curve_is_rejected() {
        // n = 4 gives floor(log10(4)) = 0
        let hist = DuplicateHistogram::from_histogram(vec![2, 1]).unwrap();
        let params = RarefactionParams::default();
        assert!(build_curve(&hist, &params, &mut params.create_rng()).is_err());

        let params = RarefactionParams::new(0.5, 10, Some(3), Some(1.0)).unwrap();
        let curve = build_curve(&hist, &params, &mut params.create_rng()).unwrap();
        assert_eq!(curve, vec![CurvePoint { x: 0.0, y: 3.0 }, CurvePoint { x: 0.5, y: 3.75 }]);
    }

    #[test]
    fn test_curve_round_trip() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("rarefaction.tsv");

        let hist = example_histogram();
        let params = RarefactionParams::new(0.1, 50, Some(5), None).unwrap();
        let curve = build_curve(&hist, &params, &mut params.create_rng()).unwrap();

        write_curve(&path, &curve).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("x\ty\n"));

        let reread = read_curve(&path).unwrap();
        assert_eq!(reread.len(), curve.len());
        for (a, b) in curve.iter().zip(&reread) {
            assert!((a.x - b.x).abs() < 1e-12);
            assert!((a.y - b.y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_read_curve_invalid_value() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("rarefaction.tsv");
        std::fs::write(&path, "x\ty\n0\t10\n0.1\tmany\n").unwrap();

        let err = read_curve(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Line 3: invalid y value `many`"));
    }
}
