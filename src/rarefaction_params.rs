//! This module defines the `RarefactionParams` struct, which encapsulates the parameters
//! controlling how a rarefaction curve is sampled: the step between fold-changes, the
//! number of draws from the smoothing distribution, an optional random seed, and an
//! optional override of the maximum fold-change. It provides accessors, validation, and
//! construction of the random number generator used for the smoothing draws.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RarefactionParams {
    step: f64,
    num_samples: usize,
    seed: Option<u64>,
    max_fold: Option<f64>,
}

impl Default for RarefactionParams {
    fn default() -> Self {
        RarefactionParams {
            step: 0.1,
            num_samples: 1000,
            seed: None,
            max_fold: None,
        }
    }
}

impl RarefactionParams {
    pub fn new(step: f64, num_samples: usize, seed: Option<u64>, max_fold: Option<f64>) -> Result<Self> {
        if !step.is_finite() || step <= 0.0 {
            bail!("Step must be a positive number, got {}", step);
        }

        if num_samples == 0 {
            bail!("Number of smoothing samples must be at least 1.");
        }

        if let Some(max_fold) = max_fold {
            if !max_fold.is_finite() || max_fold <= 0.0 {
                bail!("Maximum fold-change must be a positive number, got {}", max_fold);
            }
        }

        Ok(RarefactionParams {
            step,
            num_samples,
            seed,
            max_fold,
        })
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Maximum fold-change of the curve (exclusive).
    ///
    /// Unless overridden, this is floor(log10(n)) which keeps the extrapolation
    /// within a range supported by the observed sample size.
    pub fn max_fold(&self, sample_size: u64) -> f64 {
        match self.max_fold {
            Some(max_fold) => max_fold,
            None => (sample_size as f64).log10().floor().max(0.0),
        }
    }

    /// Create the generator for the smoothing draws.
    pub fn create_rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}
