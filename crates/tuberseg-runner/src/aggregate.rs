//! Merge per-subject tuber burden tables into one results file.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub const VOLUME_RESULTS_FILE: &str = "volume_results.txt";

const HEADER: &str = "Subject_ID\tT1_Volume_mm3\tT2_Volume_mm3\tFLAIR_Volume_mm3\tTotal_Volume_mm3\tGenerated_Timestamp";

/// Concatenate every `results/<subject>/volume_results.txt` into
/// `results/volume_results.txt`, in sorted subject order, keeping
/// exactly one header line. Returns how many per-subject files were
/// merged; none found is a warning, not an error.
pub fn aggregate_volume_results(results_dir: &Path) -> Result<usize> {
    info!("aggregating tuber burden results...");

    let sources = find_subject_tables(results_dir);
    if sources.is_empty() {
        warn!("no volume results found to aggregate");
        return Ok(0);
    }

    let mut merged = String::from(HEADER);
    merged.push('\n');
    for source in &sources {
        let raw = fs::read_to_string(source)
            .with_context(|| format!("failed to read {}", source.display()))?;
        for line in raw.lines() {
            // Each per-subject file repeats the header; drop it.
            if line.starts_with("Subject_ID") || line.trim().is_empty() {
                continue;
            }
            merged.push_str(line);
            merged.push('\n');
        }
    }

    let target = results_dir.join(VOLUME_RESULTS_FILE);
    fs::write(&target, merged).with_context(|| format!("failed to write {}", target.display()))?;
    info!("aggregated results from {} subject(s): {}", sources.len(), target.display());
    Ok(sources.len())
}

/// Per-subject tables sit one level down; the aggregate at the results
/// root is never picked up as an input.
fn find_subject_tables(results_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(results_dir)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == VOLUME_RESULTS_FILE)
        .map(|e| e.into_path())
        .collect()
}
