//! Grouping of UMIs by the genomic position of their read.
//!
//! Reads are given as a tab-separated table of chromosome, position, sequence and quality.
//! The UMI of a read is the prefix of its sequence (and quality string) of a fixed length.
//! Groups can be filtered against a set of masked regions before being written out.

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::io_utils::{create_writer, open_reader};

/// UMIs observed at a single genomic position.
#[derive(Clone, Debug, PartialEq)]
pub struct UmiGroup {
    pub chrom: String,
    pub pos: String,
    pub seqs: Vec<String>,
    pub quals: Vec<String>,
}

impl UmiGroup {
    /// Position truncated to an integer, accepting float notation such as `1.5e3`.
    pub fn position(&self) -> Result<i64> {
        let pos: f64 = self
            .pos
            .parse()
            .with_context(|| format!("`{}` isn't a valid position on {}", self.pos, self.chrom))?;

        Ok(pos.trunc() as i64)
    }
}

/// Numeric label for the sex chromosomes, other labels are kept as is.
pub fn chrom_code(chrom: &str) -> &str {
    match chrom {
        "X" => "23",
        "Y" => "24",
        _ => chrom,
    }
}

fn umi_prefix(s: &str, umi_length: usize) -> String {
    s.chars().take(umi_length).collect()
}

/// Group UMIs by (chromosome, position), keeping groups in order of first appearance.
pub fn group_umis<R: BufRead>(reader: R, umi_length: usize) -> Result<Vec<UmiGroup>> {
    let mut index: FxHashMap<(String, String), usize> = FxHashMap::default();
    let mut groups: Vec<UmiGroup> = Vec::new();

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 4 {
            bail!(
                "Line {}: expected at least 4 tab-separated columns (chr, pos, seq, qual).",
                line_idx + 1
            );
        }

        let seq = umi_prefix(fields[2], umi_length);
        let qual = umi_prefix(fields[3], umi_length);

        let key = (fields[0].to_string(), fields[1].to_string());
        match index.get(&key) {
            Some(&idx) => {
                groups[idx].seqs.push(seq);
                groups[idx].quals.push(qual);
            }
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(UmiGroup {
                    chrom: key.0,
                    pos: key.1,
                    seqs: vec![seq],
                    quals: vec![qual],
                });
            }
        }
    }

    Ok(groups)
}

/// Closed intervals to be masked, per chromosome.
#[derive(Clone, Debug, Default)]
pub struct MaskRegions {
    regions: FxHashMap<String, Vec<(i64, i64)>>,
}

impl MaskRegions {
    /// Parse masked regions; the first line is a header and columns 1, 3 and 4 hold
    /// the chromosome, start and end.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut regions: FxHashMap<String, Vec<(i64, i64)>> = FxHashMap::default();

        for (line_idx, line) in reader.lines().enumerate().skip(1) {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 4 {
                bail!("Mask line {}: expected at least 4 tab-separated columns.", line_idx + 1);
            }

            let start: i64 = fields[2]
                .parse()
                .with_context(|| format!("Mask line {}: invalid start `{}`", line_idx + 1, fields[2]))?;
            let end: i64 = fields[3]
                .parse()
                .with_context(|| format!("Mask line {}: invalid end `{}`", line_idx + 1, fields[3]))?;

            regions.entry(fields[0].to_string()).or_default().push((start, end));
        }

        Ok(MaskRegions { regions })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_reader(open_reader(path)?)
            .with_context(|| format!("Failed to read mask file {}", path.display()))
    }

    /// Number of masked regions.
    pub fn len(&self) -> usize {
        self.regions.values().map(|r| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_masked(&self, chrom: &str, pos: i64) -> bool {
        self.regions
            .get(chrom)
            .is_some_and(|regions| regions.iter().any(|&(start, end)| start <= pos && pos <= end))
    }
}

/// Drop groups located inside masked regions, returning the kept groups and the number masked.
pub fn mask_groups(groups: Vec<UmiGroup>, mask: &MaskRegions) -> Result<(Vec<UmiGroup>, usize)> {
    let mut kept = Vec::with_capacity(groups.len());
    let mut num_masked = 0;
    for group in groups {
        if mask.is_masked(&group.chrom, group.position()?) {
            num_masked += 1;
        } else {
            kept.push(group);
        }
    }

    Ok((kept, num_masked))
}

/// Write groups as chr, pos, space separated UMI sequences and qualities.
pub fn write_groups<W: Write>(writer: &mut W, groups: &[UmiGroup]) -> Result<()> {
    for group in groups {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            chrom_code(&group.chrom),
            group.pos,
            group.seqs.iter().join(" "),
            group.quals.iter().join(" ")
        )?;
    }

    Ok(())
}

pub fn write_groups_file(path: &Path, groups: &[UmiGroup]) -> Result<()> {
    let mut writer = create_writer(path)?;
    write_groups(&mut writer, groups)?;
    writer.flush()?;

    Ok(())
}
