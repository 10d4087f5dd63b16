//! This module bins the genome and aggregates GPSeq bed scores into the bins.
//!
//! Chromosome sizes are inferred from the bed files themselves (the largest region end on
//! each chromosome, pooled over every condition so all conditions share one set of bins).
//! Bins either slide along each chromosome by a fraction of the bin size or span the
//! whole chromosome, and every region adds its score to each bin containing its
//! mid-point. Chromosomes are processed in parallel.

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use rustc_hash::FxHashMap;

use crate::io_utils::{create_writer, is_bed_header, open_reader};

/// Region of a GPSeq condition bed file.
#[derive(Clone, Debug, PartialEq)]
pub struct BedRegion {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub name: String,
    pub score: f64,
}

impl BedRegion {
    pub fn midpoint(&self) -> f64 {
        self.start as f64 + (self.end as f64 - self.start as f64) / 2.0
    }
}

/// Genomic bin with the summed score of the regions assigned to it.
#[derive(Clone, Debug, PartialEq)]
pub struct Bin {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub name: String,
    pub score: f64,
}

/// Parse bed regions, skipping `track`, `browser` and comment lines.
pub fn read_bed<R: BufRead>(reader: R) -> Result<Vec<BedRegion>> {
    let mut regions = Vec::new();
    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || is_bed_header(line) {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 5 {
            bail!(
                "Line {}: expected 5 tab-separated columns (chr, start, end, name, score).",
                line_idx + 1
            );
        }

        let start: u64 = fields[1]
            .parse()
            .with_context(|| format!("Line {}: invalid start `{}`", line_idx + 1, fields[1]))?;
        let end: u64 = fields[2]
            .parse()
            .with_context(|| format!("Line {}: invalid end `{}`", line_idx + 1, fields[2]))?;
        let score: f64 = fields[4]
            .parse()
            .with_context(|| format!("Line {}: invalid score `{}`", line_idx + 1, fields[4]))?;

        regions.push(BedRegion {
            chrom: fields[0].to_string(),
            start,
            end,
            name: fields[3].to_string(),
            score,
        });
    }

    Ok(regions)
}

pub fn read_bed_file(path: &Path) -> Result<Vec<BedRegion>> {
    read_bed(open_reader(path)?).with_context(|| format!("Failed to read bed file {}", path.display()))
}

/// Largest region end per chromosome, in order of first appearance.
pub fn chrom_sizes<'a, I>(regions: I) -> Vec<(String, u64)>
where
    I: IntoIterator<Item = &'a BedRegion>,
{
    let mut index: FxHashMap<&str, usize> = FxHashMap::default();
    let mut sizes: Vec<(String, u64)> = Vec::new();
    for region in regions {
        match index.get(region.chrom.as_str()) {
            Some(&idx) => sizes[idx].1 = sizes[idx].1.max(region.end),
            None => {
                index.insert(&region.chrom, sizes.len());
                sizes.push((region.chrom.clone(), region.end));
            }
        }
    }

    sizes
}

/// Bin step in bp for a bin size and a step given as a fraction of the bin size.
pub fn bin_step(bin_size: u64, step_fraction: f64) -> Result<u64> {
    if bin_size == 0 {
        bail!("Bin size must be a positive non-zero integer.");
    }

    if !(step_fraction > 0.0 && step_fraction <= 1.0) {
        bail!("Bin step must be in the range (0, 1], got {}", step_fraction);
    }

    let step = (bin_size as f64 * step_fraction).floor() as u64;
    if step == 0 {
        bail!("Bin step of {} bp is too small for a bin size of {} bp.", step_fraction, bin_size);
    }

    Ok(step)
}

/// How each chromosome is split into bins.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BinLayout {
    /// Bins of `size` bp starting every `step` bp.
    Sliding { size: u64, step: u64 },
    /// A single bin spanning the whole chromosome.
    ChromosomeWide,
}

impl BinLayout {
    pub fn sliding(bin_size: u64, step_fraction: f64) -> Result<Self> {
        Ok(BinLayout::Sliding {
            size: bin_size,
            step: bin_step(bin_size, step_fraction)?,
        })
    }

    /// Empty bins of a chromosome of the given size.
    pub fn bins(&self, chrom: &str, chrom_size: u64) -> Vec<Bin> {
        match *self {
            BinLayout::Sliding { size, step } => bin_chromosome(chrom, chrom_size, size, step),
            BinLayout::ChromosomeWide => vec![Bin {
                chrom: chrom.to_string(),
                start: 0,
                end: chrom_size,
                name: "bin_1".to_string(),
                score: 0.0,
            }],
        }
    }

    /// Tag used in output file names.
    pub fn label(&self) -> String {
        match self {
            BinLayout::Sliding { size, .. } => size.to_string(),
            BinLayout::ChromosomeWide => "chr".to_string(),
        }
    }
}

/// Bins covering a chromosome, plus one extra bin past the last full step.
pub fn bin_chromosome(chrom: &str, chrom_size: u64, bin_size: u64, step: u64) -> Vec<Bin> {
    let mut starts: Vec<u64> = (0..chrom_size.saturating_sub(bin_size))
        .step_by(step as usize)
        .collect();

    match starts.last() {
        Some(&last) => starts.push(last + bin_size),
        None => starts.push(0),
    }

    starts
        .into_iter()
        .enumerate()
        .map(|(idx, start)| Bin {
            chrom: chrom.to_string(),
            start,
            end: start + bin_size - 1,
            name: format!("bin_{}", idx + 1),
            score: 0.0,
        })
        .collect()
}

/// Add each region score to every bin whose closed interval contains the region mid-point.
pub fn sum_to_bins(bins: &mut [Bin], regions: &[&BedRegion]) {
    let mut midpoints: Vec<(f64, f64)> = regions.iter().map(|r| (r.midpoint(), r.score)).collect();
    midpoints.sort_by(|a, b| a.0.total_cmp(&b.0));

    for bin in bins.iter_mut() {
        let lo = midpoints.partition_point(|&(mid, _)| mid < bin.start as f64);
        let hi = midpoints.partition_point(|&(mid, _)| mid <= bin.end as f64);
        if hi > lo {
            bin.score += midpoints[lo..hi].iter().map(|&(_, score)| score).sum::<f64>();
        }
    }
}

/// Bin every chromosome of `sizes` and sum the scores of `regions` into the bins.
///
/// Chromosomes without regions keep their zero-score bins, so conditions binned against
/// the same sizes line up row by row.
pub fn bin_genome(regions: &[BedRegion], sizes: &[(String, u64)], layout: &BinLayout) -> Vec<Bin> {
    let binned: Vec<Vec<Bin>> = sizes
        .par_iter()
        .map(|(chrom, size)| {
            let chrom_regions: Vec<&BedRegion> = regions.iter().filter(|r| &r.chrom == chrom).collect();
            let mut bins = layout.bins(chrom, *size);
            sum_to_bins(&mut bins, &chrom_regions);
            bins
        })
        .collect();

    binned.into_iter().flatten().collect()
}

pub fn write_bins<W: Write>(writer: &mut W, bins: &[Bin]) -> Result<()> {
    for bin in bins {
        writeln!(writer, "{}\t{}\t{}\t{}\t{}", bin.chrom, bin.start, bin.end, bin.name, bin.score)?;
    }

    Ok(())
}

pub fn write_bins_file(path: &Path, bins: &[Bin]) -> Result<()> {
    let mut writer = create_writer(path)?;
    write_bins(&mut writer, bins)?;
    writer.flush()?;

    Ok(())
}
