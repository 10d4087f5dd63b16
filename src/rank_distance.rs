//! Robustness of centrality rankings under read shuffling.
//!
//! A ranking table holds one ranking per column (e.g. chromosomes ordered by estimated
//! centrality under a given metric). Each shuffled replicate is compared column by column
//! to the original table with the normalised Kendall tau distance.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use itertools::Itertools;
use log::warn;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::io_utils::{create_writer, open_reader};
use crate::progress::progress_bar_msg;

/// Rankings stored column-wise, keyed by the header names.
#[derive(Clone, Debug, PartialEq)]
pub struct RankingTable {
    columns: Vec<String>,
    rankings: Vec<Vec<String>>,
}

impl RankingTable {
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader.lines().enumerate();

        let columns: Vec<String> = match lines.next() {
            Some((_, header)) => header?.trim_end().split('\t').map(|c| c.to_string()).collect(),
            None => bail!("Ranking table is empty."),
        };

        let mut rankings: Vec<Vec<String>> = vec![Vec::new(); columns.len()];
        for (line_idx, line) in lines {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != columns.len() {
                bail!(
                    "Line {}: expected {} columns, found {}.",
                    line_idx + 1,
                    columns.len(),
                    fields.len()
                );
            }

            for (ranking, field) in rankings.iter_mut().zip(fields) {
                ranking.push(field.to_string());
            }
        }

        Ok(RankingTable { columns, rankings })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_reader(open_reader(path)?)
            .with_context(|| format!("Failed to read ranking table {}", path.display()))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn ranking(&self, column: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| self.rankings[idx].as_slice())
    }
}

/// Kendall tau distance between two rankings of the same elements, as the fraction of
/// discordant pairs: 0 for identical rankings, 1 for reversed ones.
pub fn kendall_tau_distance<T: AsRef<str>>(a: &[T], b: &[T]) -> Result<f64> {
    if a.len() != b.len() {
        bail!("The Kendall tau distance is not defined for rankings of different lengths.");
    }

    let a_set: FxHashSet<&str> = a.iter().map(|e| e.as_ref()).collect();
    let b_set: FxHashSet<&str> = b.iter().map(|e| e.as_ref()).collect();
    if a_set != b_set {
        bail!("The Kendall tau distance is not defined for rankings of different elements.");
    }

    let m = a.len();
    if m < 2 {
        return Ok(0.0);
    }

    // rank of each element of `b` within `a`, first occurrence wins
    let mut rank_in_a: FxHashMap<&str, usize> = FxHashMap::default();
    for (idx, e) in a.iter().enumerate() {
        rank_in_a.entry(e.as_ref()).or_insert(idx);
    }
    let ranked: Vec<usize> = b.iter().map(|e| rank_in_a[e.as_ref()]).collect();

    let discordant = ranked
        .iter()
        .tuple_combinations()
        .filter(|(x, y)| x > y)
        .count();

    Ok(discordant as f64 / (m * (m - 1)) as f64 * 2.0)
}

/// Distance of every column of `shuffled` to the same column of `original`.
///
/// Columns that cannot be compared are `None`.
pub fn compare_rankings(original: &RankingTable, shuffled: &RankingTable, label: &str) -> Vec<Option<f64>> {
    original
        .columns()
        .iter()
        .map(|column| {
            let Some(reference) = original.ranking(column) else {
                return None;
            };
            let Some(other) = shuffled.ranking(column) else {
                warn!("{}: column '{}' is missing.", label, column);
                return None;
            };

            match kendall_tau_distance(reference, other) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("{}: column '{}': {}", label, column, e);
                    None
                }
            }
        })
        .collect()
}

/// Files in `dir` holding shuffled rankings for the given percentage, sorted by name.
pub fn shuffled_files(dir: &Path, perc: u32) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}perc.recap.txt", perc);

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.file_name().is_some_and(|name| name.to_string_lossy().contains(&pattern)))
        .collect();
    paths.sort();

    Ok(paths)
}

/// Compare the original ranking table to every shuffled replicate.
pub fn rank_distances(original: &RankingTable, files: &[PathBuf]) -> Result<Vec<Vec<Option<f64>>>> {
    let progress_bar = progress_bar_msg(files.len() as u64);

    let mut rows = Vec::with_capacity(files.len());
    for path in files {
        let label = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        progress_bar.set_message(label.clone());

        let shuffled = RankingTable::from_file(path)?;
        rows.push(compare_rankings(original, &shuffled, &label));
        progress_bar.inc(1);
    }

    progress_bar.finish();

    Ok(rows)
}

pub fn write_distances<W: Write>(writer: &mut W, columns: &[String], rows: &[Vec<Option<f64>>]) -> Result<()> {
    writeln!(writer, "{}", columns.iter().join("\t"))?;
    for row in rows {
        let fields = row.iter().map(|d| match d {
            Some(d) => d.to_string(),
            None => "NA".to_string(),
        });
        writeln!(writer, "{}", fields.format("\t"))?;
    }

    Ok(())
}

pub fn write_distances_file(path: &Path, columns: &[String], rows: &[Vec<Option<f64>>]) -> Result<()> {
    let mut writer = create_writer(path)?;
    write_distances(&mut writer, columns, rows)?;
    writer.flush()?;

    Ok(())
}
