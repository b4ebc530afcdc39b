// Report output: the tab-separated prediction table and the optional
// single-label species file. The table header is written even when
// there are no rows so downstream pipeline steps never see a missing
// file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::prediction::PredictionRow;

pub const HEADER: [&str; 7] = [
    "Rank",
    "Taxon",
    "Genus",
    "Species",
    "Abbreviated",
    "Percentage",
    "Taxonomy",
];

fn create_with_parents(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            log::info!("Creating directory {}", parent.display());
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to open {} for writing", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Serialize the rows as TSV at `path`, creating parent directories as
/// needed.
pub fn write_table(rows: &[PredictionRow], path: &Path) -> Result<()> {
    let mut out = create_with_parents(path)?;
    writeln!(out, "{}", HEADER.join("\t"))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    for row in rows {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.rank, row.taxon, row.genus, row.species, row.abbreviated, row.support, row.taxonomy
        )
        .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    out.flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

/// Write a single matched label as the entire file content, overwriting
/// whatever was there.
pub fn write_label(label: &str, path: &Path) -> Result<()> {
    let mut out = create_with_parents(path)?;
    out.write_all(label.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    out.flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}
