//! Main entry point for the gpseq application.
//!
//! This file handles command-line parsing, logging setup, and dispatches to the
//! subcommands: rarefaction curves from UMI duplicate counts, UMI grouping by position,
//! genome binning of bed scores, and ranking comparison across shuffled replicates.
//! Results are written as tab-separated tables to the requested output location.

use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn, LevelFilter};
use num_format::{Locale, ToFormattedString};

use crate::cli::{Cli, Commands};
use crate::histogram::DuplicateHistogram;
use crate::logging::setup_logger;
use crate::rarefaction::{build_curve, write_curve, RarefactionSummary};
use crate::rarefaction_params::RarefactionParams;

mod cli;
pub mod binning;
pub mod histogram;
pub mod io_utils;
pub mod logging;
pub mod progress;
pub mod rank_distance;
pub mod rarefaction;
pub mod rarefaction_params;
pub mod umi_group;

const CURVE_FILE: &str = "rarefaction.tsv";
const SUMMARY_FILE: &str = "rarefaction.json";
const UMI_FILE: &str = "UMIpos.txt";
const UMI_ALL_FILE: &str = "UMIpos.all.txt";

/// Common initialization required by all commands.
fn init(threads: usize) -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    info!("{} v{}", env!("CARGO_PKG_NAME"), VERSION);
    info!("{}", env::args().collect::<Vec<String>>().join(" "));

    info!("Using {} threads.", threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()?;

    Ok(())
}

/// Directory receiving the log file of a command.
fn log_dir(command: &Commands) -> PathBuf {
    match command {
        Commands::Rarefaction { out_dir, .. }
        | Commands::UmiGroup { out_dir, .. }
        | Commands::Bin { out_dir, .. } => out_dir.clone(),
        Commands::RankDistance { out_file, .. } => match out_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        },
    }
}

fn run_rarefaction(input: &Path, out_dir: &Path, params: &RarefactionParams) -> Result<()> {
    info!("Reading duplicate counts from {}", input.display());
    let hist = DuplicateHistogram::from_umi_table(input)?;

    let sample_size = hist.sample_size();
    let max_fold = params.max_fold(sample_size);
    info!(
        "Observed {} unique fragments from {} reads (max duplicates: {}).",
        hist.unique_count().to_formatted_string(&Locale::en),
        sample_size.to_formatted_string(&Locale::en),
        hist.max_duplicates()
    );
    info!(
        "Sampling fold-changes [0, {}) by {} with {} smoothing samples.",
        max_fold,
        params.step(),
        params.num_samples()
    );

    match params.seed() {
        Some(seed) => info!("Seeding the smoothing draws with {}.", seed),
        None => info!("Seeding the smoothing draws from system entropy."),
    }

    let mut rng = params.create_rng();
    let curve = build_curve(&hist, params, &mut rng)?;

    let curve_path = out_dir.join(CURVE_FILE);
    write_curve(&curve_path, &curve)?;
    info!("Wrote {} curve points to {}", curve.len(), curve_path.display());

    let summary = RarefactionSummary {
        input: input.display().to_string(),
        unique_fragments: hist.unique_count(),
        sample_size,
        histogram_length: hist.max_duplicates(),
        max_fold,
        num_points: curve.len(),
        params: params.clone(),
    };
    let mut summary_writer = io_utils::create_writer(&out_dir.join(SUMMARY_FILE))?;
    serde_json::to_writer_pretty(&mut summary_writer, &summary)?;
    summary_writer.flush()?;

    Ok(())
}

fn run_umi_group(input: &Path, out_dir: &Path, umi_length: usize, mask_file: Option<&Path>) -> Result<()> {
    info!("Grouping UMIs per location from {}", input.display());
    let reader = io_utils::open_reader(input)?;
    let groups = umi_group::group_umis(reader, umi_length)
        .with_context(|| format!("Failed to read UMIs from {}", input.display()))?;
    info!("Found {} UMI locations.", groups.len().to_formatted_string(&Locale::en));

    let Some(mask_file) = mask_file else {
        umi_group::write_groups_file(&out_dir.join(UMI_FILE), &groups)?;
        return Ok(());
    };

    umi_group::write_groups_file(&out_dir.join(UMI_ALL_FILE), &groups)?;

    info!("Reading masked regions from {}", mask_file.display());
    let mask = umi_group::MaskRegions::from_file(mask_file)?;
    if mask.is_empty() {
        warn!("No regions listed in {}; nothing will be masked.", mask_file.display());
    } else {
        info!("Found {} regions to mask.", mask.len().to_formatted_string(&Locale::en));
    }

    let (kept, num_masked) = umi_group::mask_groups(groups, &mask)?;
    info!("Masked {} locations.", num_masked.to_formatted_string(&Locale::en));
    umi_group::write_groups_file(&out_dir.join(UMI_FILE), &kept)?;

    Ok(())
}

fn run_bin(beds: &[PathBuf], out_dir: &Path, layout: &binning::BinLayout) -> Result<()> {
    let mut conditions = Vec::with_capacity(beds.len());
    let mut out_paths: Vec<PathBuf> = Vec::with_capacity(beds.len());
    for bed in beds {
        let stem = bed
            .file_stem()
            .with_context(|| format!("Invalid bed file name {}", bed.display()))?
            .to_string_lossy();
        let out_path = out_dir.join(format!("{}.bins.{}.bed", stem, layout.label()));
        if out_paths.contains(&out_path) {
            bail!("Bed file {} would overwrite the output {} of another condition", bed.display(), out_path.display());
        }
        out_paths.push(out_path);

        info!("Reading {}", bed.display());
        let regions = binning::read_bed_file(bed)?;
        info!("Read {} regions.", regions.len().to_formatted_string(&Locale::en));
        conditions.push(regions);
    }

    let sizes = binning::chrom_sizes(conditions.iter().flatten());
    info!("Found {} chromosomes across {} conditions.", sizes.len(), conditions.len());
    match layout {
        binning::BinLayout::Sliding { size, step } => info!(
            "Building bins of {} bp with a step of {} bp.",
            size.to_formatted_string(&Locale::en),
            step.to_formatted_string(&Locale::en)
        ),
        binning::BinLayout::ChromosomeWide => info!("Building chromosome-wide bins."),
    }

    for (regions, out_path) in conditions.iter().zip(&out_paths) {
        let bins = binning::bin_genome(regions, &sizes, layout);
        binning::write_bins_file(out_path, &bins)?;
        info!("Wrote {} bins to {}", bins.len().to_formatted_string(&Locale::en), out_path.display());
    }

    Ok(())
}

fn run_rank_distance(original: &Path, shuffled_dir: &Path, out_file: &Path, perc: u32) -> Result<()> {
    let original = rank_distance::RankingTable::from_file(original)?;

    let files = rank_distance::shuffled_files(shuffled_dir, perc)?;
    info!("Comparing {} columns across {} shuffled files.", original.columns().len(), files.len());

    let rows = rank_distance::rank_distances(&original, &files)?;
    rank_distance::write_distances_file(out_file, original.columns(), &rows)?;
    info!("Wrote distances to {}", out_file.display());

    Ok(())
}

fn main() -> Result<()> {
    let start = Instant::now();

    let args = Cli::parse();

    let out_dir = log_dir(&args.command);
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    setup_logger(&out_dir, level)?;

    init(args.threads)?;

    match &args.command {
        Commands::Rarefaction { input, out_dir, step, niter, max_fold, seed } => {
            let params = RarefactionParams::new(*step, *niter, *seed, *max_fold)?;
            run_rarefaction(input, out_dir, &params)?;
        }
        Commands::UmiGroup { input, out_dir, umi_length, mask_file } => {
            run_umi_group(input, out_dir, *umi_length, mask_file.as_deref())?;
        }
        Commands::Bin { beds, out_dir, bin_size, bin_step, chr_wide } => {
            let layout = if *chr_wide {
                binning::BinLayout::ChromosomeWide
            } else {
                binning::BinLayout::sliding(*bin_size, *bin_step)?
            };
            run_bin(beds, out_dir, &layout)?;
        }
        Commands::RankDistance { original, shuffled_dir, out_file, perc } => {
            run_rank_distance(original, shuffled_dir, out_file, *perc)?;
        }
    }

    info!("Elapsed time (sec): {:.2}", start.elapsed().as_secs_f32());
    info!("Done.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{read_to_string, write};
    use tempfile::tempdir;

    #[test]
    fn test_run_rarefaction() -> Result<()> {
        let temp_dir = tempdir()?;
        let input = temp_dir.path().join("UMIpos.unique.atcs.txt");

        // 20 fragments: 12 seen once, 6 twice, 2 three times -> 30 reads
        let mut table = String::new();
        for i in 0..12 {
            table.push_str(&format!("1\t{}\tACGT\t1\n", i));
        }
        table.push_str("2\t10\tACGT\t2 2 2\n2\t20\tACGT\t2 2 2\n");
        table.push_str("3\t10\tACGT\t3 3\n");
        write(&input, table)?;

        let params = RarefactionParams::new(0.25, 50, Some(1), None)?;
        run_rarefaction(&input, temp_dir.path(), &params)?;

        let curve = rarefaction::read_curve(&temp_dir.path().join(CURVE_FILE))?;
        // floor(log10(30)) = 1
        assert_eq!(curve.len(), 4);
        assert_eq!(curve[0].y, 20.0);

        let summary: serde_json::Value = serde_json::from_str(&read_to_string(temp_dir.path().join(SUMMARY_FILE))?)?;
        assert_eq!(summary["sample_size"], 30);
        assert_eq!(summary["unique_fragments"], 20);
        assert_eq!(summary["max_fold"], 1.0);
        assert_eq!(summary["num_points"], 4);
        assert_eq!(summary["params"]["step"], 0.25);
        assert_eq!(summary["params"]["num_samples"], 50);
        assert_eq!(summary["params"]["seed"], 1);
        assert!(summary["params"]["max_fold"].is_null());

        Ok(())
    }

    #[test]
    fn test_run_umi_group_with_mask() -> Result<()> {
        let temp_dir = tempdir()?;
        let input = temp_dir.path().join("cond.filtered.umi.pos.txt");
        write(&input, "1\t100\tACGTAA\tIIIIII\n1\t100\tTTTTAA\tJJJJJJ\nY\t500\tGGGGAA\tKKKKKK\n")?;

        let mask = temp_dir.path().join("mask.tsv");
        write(&mask, "chr\tname\tstart\tend\n1\tm1\t90\t110\n")?;

        run_umi_group(&input, temp_dir.path(), 4, Some(&mask))?;

        let all = read_to_string(temp_dir.path().join(UMI_ALL_FILE))?;
        assert_eq!(all, "1\t100\tACGT TTTT\tIIII JJJJ\n24\t500\tGGGG\tKKKK\n");

        let kept = read_to_string(temp_dir.path().join(UMI_FILE))?;
        assert_eq!(kept, "24\t500\tGGGG\tKKKK\n");

        Ok(())
    }

    #[test]
    fn test_run_umi_group_with_empty_mask() -> Result<()> {
        let temp_dir = tempdir()?;
        let input = temp_dir.path().join("cond.filtered.umi.pos.txt");
        write(&input, "1\t100\tACGTAA\tIIIIII\n")?;

        let mask = temp_dir.path().join("mask.tsv");
        write(&mask, "chr\tname\tstart\tend\n")?;
        assert!(umi_group::MaskRegions::from_file(&mask)?.is_empty());

        run_umi_group(&input, temp_dir.path(), 4, Some(&mask))?;

        let kept = read_to_string(temp_dir.path().join(UMI_FILE))?;
        assert_eq!(kept, read_to_string(temp_dir.path().join(UMI_ALL_FILE))?);
        assert_eq!(kept, "1\t100\tACGT\tIIII\n");

        Ok(())
    }

    #[test]
    fn test_run_bin() -> Result<()> {
        let temp_dir = tempdir()?;
        let bed = temp_dir.path().join("cond.bed");
        write(&bed, "track name=cond\nchr1\t0\t10\tr1\t1\nchr1\t30\t40\tr2\t2\n")?;

        run_bin(&[bed], temp_dir.path(), &binning::BinLayout::sliding(20, 1.0)?)?;

        let out = read_to_string(temp_dir.path().join("cond.bins.20.bed"))?;
        assert_eq!(out, "chr1\t0\t19\tbin_1\t1\nchr1\t20\t39\tbin_2\t2\n");

        Ok(())
    }

    #[test]
    fn test_run_bin_conditions_chromosome_wide() -> Result<()> {
        let temp_dir = tempdir()?;
        let first = temp_dir.path().join("cond1.bed");
        write(&first, "chr1\t0\t10\tr1\t1\nchr1\t30\t40\tr2\t2\n")?;
        let second = temp_dir.path().join("cond2.bed");
        write(&second, "chr1\t0\t60\tr1\t5\nchr2\t0\t10\tr2\t3\n")?;

        let beds = vec![first, second];
        run_bin(&beds, temp_dir.path(), &binning::BinLayout::ChromosomeWide)?;

        let out = read_to_string(temp_dir.path().join("cond1.bins.chr.bed"))?;
        assert_eq!(out, "chr1\t0\t60\tbin_1\t3\nchr2\t0\t10\tbin_1\t0\n");
        let out = read_to_string(temp_dir.path().join("cond2.bins.chr.bed"))?;
        assert_eq!(out, "chr1\t0\t60\tbin_1\t5\nchr2\t0\t10\tbin_1\t3\n");

        let nested = temp_dir.path().join("nested");
        std::fs::create_dir(&nested)?;
        let clash = nested.join("cond1.bed");
        write(&clash, "chr1\t0\t10\tr1\t1\n")?;
        let beds = vec![beds[0].clone(), clash];
        assert!(run_bin(&beds, temp_dir.path(), &binning::BinLayout::ChromosomeWide).is_err());

        Ok(())
    }

    #[test]
    fn test_log_dir() {
        let command = Commands::RankDistance {
            original: PathBuf::from("gc.tsv"),
            shuffled_dir: PathBuf::from("shuffled"),
            out_file: PathBuf::from("cmp.tsv"),
            perc: 10,
        };
        assert_eq!(log_dir(&command), PathBuf::from("."));
    }
}
