//! Command-line interface definition for the gpseq toolkit.
//!
//! This file defines the `Cli` struct and its subcommands using the `clap` crate. Each
//! subcommand corresponds to one step of a GPSeq analysis: rarefaction curves from UMI
//! duplicate counts, grouping of UMIs by position, genome binning of bed scores, and
//! comparison of centrality rankings across shuffled replicates. Custom value parsers
//! validate numeric options before any file is touched, and the output is styled with
//! the `anstyle` crate.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

const DEFAULT_STEP: f64 = 0.1;
const DEFAULT_NITER: usize = 1000;
const DEFAULT_BIN_SIZE: u64 = 100_000;
const DEFAULT_BIN_STEP: f64 = 0.1;
const DEFAULT_PERC: u32 = 10;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(styles=get_styles())]
#[command(disable_help_subcommand = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Number of threads to use
    #[arg(short, long, global = true, default_value_t = 1, value_parser = validate_threads)]
    pub threads: usize,

    /// Log debug messages
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a rarefaction curve from UMI duplicate counts (smoothed Good-Toulmin estimator)
    Rarefaction {
        /// UMI position table (chr, start, seq, space-separated duplicate counts)
        #[arg(value_parser = clap::value_parser!(PathBuf))]
        input: PathBuf,

        /// Output directory
        #[arg(short = 'o', long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
        out_dir: PathBuf,

        /// Step size on the x-axis (fold-change) of the curve
        #[arg(short, long, help_heading = "Curve parameters", default_value_t = DEFAULT_STEP, value_parser = validate_step)]
        step: f64,

        /// Number of samples drawn from the smoothing distribution
        #[arg(short = 'n', long, help_heading = "Curve parameters", default_value_t = DEFAULT_NITER, value_parser = validate_niter)]
        niter: usize,

        /// Largest fold-change (exclusive) [default: floor(log10(number of reads))]
        #[arg(short, long, help_heading = "Curve parameters", value_parser = validate_max_fold)]
        max_fold: Option<f64>,

        /// Seed for the smoothing draws, for reproducible curves
        #[arg(long, help_heading = "Curve parameters")]
        seed: Option<u64>,
    },

    /// Group UMIs by genomic position, optionally masking regions
    UmiGroup {
        /// Filtered UMI table (chr, pos, seq, qual)
        #[arg(value_parser = clap::value_parser!(PathBuf))]
        input: PathBuf,

        /// Output directory
        #[arg(short = 'o', long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
        out_dir: PathBuf,

        /// Length of the UMIs in nt
        #[arg(short, long, value_parser = validate_umi_length)]
        umi_length: usize,

        /// Table of regions to mask (header line; chr, name, start, end)
        #[arg(short = 'm', long, value_parser = clap::value_parser!(PathBuf))]
        mask_file: Option<PathBuf>,
    },

    /// Bin the genome and sum bed scores into bins by region mid-point
    Bin {
        /// GPSeq condition bed files, binned against shared chromosome sizes
        #[arg(required = true, num_args = 1.., value_parser = clap::value_parser!(PathBuf))]
        beds: Vec<PathBuf>,

        /// Output directory
        #[arg(short = 'o', long, help_heading = "Output", value_parser = clap::value_parser!(PathBuf))]
        out_dir: PathBuf,

        /// Bin size in bp
        #[arg(short = 'b', long, help_heading = "Binning parameters", default_value_t = DEFAULT_BIN_SIZE, value_parser = validate_bin_size)]
        bin_size: u64,

        /// Bin step as a fraction of the bin size (1 for non-overlapping bins)
        #[arg(short = 's', long, help_heading = "Binning parameters", default_value_t = DEFAULT_BIN_STEP, value_parser = validate_bin_step)]
        bin_step: f64,

        /// One bin per chromosome instead of sliding bins
        #[arg(long, help_heading = "Binning parameters", default_value_t = false, conflicts_with_all = ["bin_size", "bin_step"])]
        chr_wide: bool,
    },

    /// Compare a centrality ranking with shuffled replicates (Kendall tau distance)
    RankDistance {
        /// Original ranking table
        #[arg(value_parser = clap::value_parser!(PathBuf))]
        original: PathBuf,

        /// Directory of shuffled ranking tables
        #[arg(value_parser = clap::value_parser!(PathBuf))]
        shuffled_dir: PathBuf,

        /// Output table
        #[arg(value_parser = clap::value_parser!(PathBuf))]
        out_file: PathBuf,

        /// Percentage of reshuffled reads, selects files named `*<perc>perc.recap.txt`
        #[arg(short, long, default_value_t = DEFAULT_PERC)]
        perc: u32,
    },
}

fn validate_threads(threads: &str) -> Result<usize, String> {
    let threads: usize = threads
        .parse()
        .map_err(|_| format!("`{threads}` isn't a valid value"))?;

    if !(1..=1024).contains(&threads) {
        return Err("Threads must be in the range [1, 1024]".to_string());
    }

    Ok(threads)
}

fn positive_f64(value: &str, name: &str) -> Result<f64, String> {
    let v: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` isn't a valid {name}"))?;

    if !v.is_finite() || v <= 0.0 {
        return Err(format!("{name} must be a positive number"));
    }

    Ok(v)
}

fn validate_step(step: &str) -> Result<f64, String> {
    positive_f64(step, "step")
}

fn validate_max_fold(max_fold: &str) -> Result<f64, String> {
    positive_f64(max_fold, "maximum fold-change")
}

fn validate_niter(niter: &str) -> Result<usize, String> {
    let niter: usize = niter
        .parse()
        .map_err(|_| format!("`{niter}` isn't a valid number of samples"))?;

    if niter == 0 {
        return Err("Number of samples must be at least 1".to_string());
    }

    Ok(niter)
}

fn validate_umi_length(umi_length: &str) -> Result<usize, String> {
    let umi_length: usize = umi_length
        .parse()
        .map_err(|_| format!("`{umi_length}` isn't a valid UMI length"))?;

    if umi_length == 0 {
        return Err("UMI length must be a positive non-zero integer".to_string());
    }

    Ok(umi_length)
}

fn validate_bin_size(bin_size: &str) -> Result<u64, String> {
    let bin_size: u64 = bin_size
        .parse()
        .map_err(|_| format!("`{bin_size}` isn't a valid bin size"))?;

    if bin_size == 0 {
        return Err("Bin size must be a positive non-zero integer".to_string());
    }

    Ok(bin_size)
}

fn validate_bin_step(bin_step: &str) -> Result<f64, String> {
    let bin_step = positive_f64(bin_step, "bin step")?;

    if bin_step > 1.0 {
        return Err("Bin step must be in the range (0, 1]".to_string());
    }

    Ok(bin_step)
}

fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .usage(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
        .header(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
        .literal(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .invalid(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .error(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .valid(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .placeholder(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_verify_cli() {
        Cli::command().debug_assert()
    }

    #[test]
    fn test_rarefaction_defaults() {
        let cli = Cli::try_parse_from(["gpseq", "rarefaction", "umi.txt", "-o", "out"]).unwrap();
        assert_eq!(cli.threads, 1);
        match cli.command {
            Commands::Rarefaction { step, niter, max_fold, seed, .. } => {
                assert_eq!(step, DEFAULT_STEP);
                assert_eq!(niter, DEFAULT_NITER);
                assert_eq!(max_fold, None);
                assert_eq!(seed, None);
            }
            _ => panic!("expected rarefaction command"),
        }
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(Cli::try_parse_from(["gpseq", "rarefaction", "umi.txt", "-o", "out", "--step", "0"]).is_err());
        assert!(Cli::try_parse_from(["gpseq", "rarefaction", "umi.txt", "-o", "out", "-n", "0"]).is_err());
        assert!(Cli::try_parse_from(["gpseq", "-t", "0", "rarefaction", "umi.txt", "-o", "out"]).is_err());
        assert!(Cli::try_parse_from(["gpseq", "umi-group", "reads.txt", "-o", "out", "-u", "0"]).is_err());
        assert!(Cli::try_parse_from(["gpseq", "bin", "c.bed", "-o", "out", "--bin-step", "1.5"]).is_err());
        assert!(Cli::try_parse_from(["gpseq", "bin", "-o", "out"]).is_err());
        assert!(Cli::try_parse_from(["gpseq", "bin", "c.bed", "-o", "out", "--chr-wide", "-b", "10"]).is_err());
    }

    #[test]
    fn test_bin_conditions() {
        let cli = Cli::try_parse_from(["gpseq", "bin", "c1.bed", "c2.bed", "-o", "out", "--chr-wide"]).unwrap();
        match cli.command {
            Commands::Bin { beds, bin_size, chr_wide, .. } => {
                assert_eq!(beds, vec![PathBuf::from("c1.bed"), PathBuf::from("c2.bed")]);
                assert_eq!(bin_size, DEFAULT_BIN_SIZE);
                assert!(chr_wide);
            }
            _ => panic!("expected bin command"),
        }
    }
}
