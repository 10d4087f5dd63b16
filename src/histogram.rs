//! This module provides the `DuplicateHistogram` struct, which summarises how many
//! distinct fragments were observed exactly k times. The histogram is built from the
//! per-fragment duplicate counts listed in a UMI position table, and is the input to
//! the rarefaction estimator.

use std::io::BufRead;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::io_utils::open_reader;

/// Column holding the whitespace separated duplicate counts in a UMI position table.
const COUNTS_COLUMN: usize = 3;

/// Largest duplicate count accepted; the histogram holds one entry per count up to the maximum.
pub const MAX_DUPLICATE_COUNT: u64 = 10_000_000;

/// Number of distinct fragments observed exactly k times, stored at index k - 1.
#[derive(Clone, Debug, PartialEq)]
pub struct DuplicateHistogram {
    counts: Vec<u64>,
}

impl DuplicateHistogram {
    /// Build a histogram from raw per-fragment duplicate counts.
    pub fn from_counts<I>(counts: I) -> Result<Self>
    where
        I: IntoIterator<Item = u64>,
    {
        let mut hist: Vec<u64> = Vec::new();
        for count in counts {
            if count == 0 {
                bail!("Duplicate counts must be positive integers.");
            }

            if count > MAX_DUPLICATE_COUNT {
                bail!(
                    "Duplicate count {} exceeds the supported maximum of {}.",
                    count,
                    MAX_DUPLICATE_COUNT
                );
            }

            let idx = usize::try_from(count - 1)
                .with_context(|| format!("Duplicate count {} is too large", count))?;
            if idx >= hist.len() {
                hist.try_reserve(idx + 1 - hist.len())
                    .with_context(|| format!("Duplicate count {} is too large", count))?;
                hist.resize(idx + 1, 0);
            }
            hist[idx] += 1;
        }

        Self::from_histogram(hist)
    }

    /// Wrap an existing histogram, rejecting degenerate ones.
    pub fn from_histogram(counts: Vec<u64>) -> Result<Self> {
        if counts.iter().all(|&c| c == 0) {
            bail!("Duplicate count histogram is empty; no fragments were observed.");
        }

        Ok(DuplicateHistogram { counts })
    }

    /// Read a UMI position table and build the histogram of its duplicate counts.
    pub fn from_umi_table(path: &Path) -> Result<Self> {
        Self::from_umi_reader(open_reader(path)?)
            .with_context(|| format!("Failed to read duplicate counts from {}", path.display()))
    }

    /// Parse duplicate counts from the fourth column of a tab-separated UMI table.
    pub fn from_umi_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut counts = Vec::new();
        for (line_idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let field = match line.split('\t').nth(COUNTS_COLUMN) {
                Some(field) => field,
                None => bail!(
                    "Line {}: expected 4 tab-separated columns (chr, start, seq, counts).",
                    line_idx + 1
                ),
            };

            for token in field.split_whitespace() {
                let count: u64 = token.parse().with_context(|| {
                    format!("Line {}: `{}` isn't a valid duplicate count", line_idx + 1, token)
                })?;
                counts.push(count);
            }
        }

        if counts.is_empty() {
            bail!("No duplicate counts found in input.");
        }

        Self::from_counts(counts)
    }

    /// Histogram entries, index k - 1 holding fragments seen k times.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Maximum observed duplicate count.
    pub fn max_duplicates(&self) -> usize {
        self.counts.len()
    }

    /// Number of distinct fragments.
    pub fn unique_count(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Total number of reads, i.e. the sum of k times the fragments seen k times.
    pub fn sample_size(&self) -> u64 {
        self.counts
            .iter()
            .enumerate()
            .map(|(idx, &c)| (idx as u64 + 1) * c)
            .sum()
    }
}
