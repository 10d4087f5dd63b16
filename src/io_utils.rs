use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};

/// Open a file for buffered reading, naming the path on failure.
pub fn open_reader(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    Ok(BufReader::new(file))
}

/// Create a file for buffered writing, naming the path on failure.
pub fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    Ok(BufWriter::new(file))
}

/// True for bed header lines (`track`, `browser`) and comments.
pub fn is_bed_header(line: &str) -> bool {
    line.starts_with("track") || line.starts_with("browser") || line.starts_with('#')
}
