//! CSV logs and JSON manifests written by search and restore runs.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::algorithm::AlgorithmId;
use crate::error::Result;

pub const MANIFEST_NAME: &str = "manifest.json";
pub const RESTORE_MANIFEST_NAME: &str = "restore_manifest.json";
pub const RESTORE_LOG_NAME: &str = "restore_log.csv";

/// Local time in the log's `YYYY-MM-DD HH:MM:SS` form.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn iso_now() -> String {
    chrono::Local::now().to_rfc3339()
}

/// Append rows to a CSV file, writing the header only if the file is new.
pub fn append_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let fresh = !path.exists() || fs::metadata(path)?.len() == 0;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(fresh)
        .from_writer(file);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Replace `path` with a CSV of `rows`.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut f = fs::File::create(path)?;
    serde_json::to_writer_pretty(&mut f, value)?;
    Ok(())
}

/// One line of the per-run iteration CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRow {
    pub timestamp: String,
    pub iter: u32,
    pub copies: u32,
    pub container_bytes: u64,
    pub compressed_bytes: Option<u64>,
    pub reduction_pct: String,
    pub time_s: String,
    pub cross_entropy: Option<f64>,
    pub block_types: Option<String>,
    pub container_path: String,
    pub compressed_path: String,
}

/// Winning iteration as recorded in the search manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestSummary {
    pub iter: u32,
    pub copies: u32,
    pub original_bytes: u64,
    pub compressed_bytes: Option<u64>,
    pub reduction_pct: f64,
    pub time_s: f64,
    pub cross_entropy: Option<f64>,
    pub block_types: Option<String>,
    pub attempts: u32,
}

/// Immutable record of a finished search, written next to the final artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchManifest {
    pub created_at: String,
    pub input_file: String,
    pub input_sha256: String,
    pub algorithm: AlgorithmId,
    pub threshold_pct: f64,
    pub max_iters: u32,
    pub stop_reason: String,
    pub best: BestSummary,
    pub container_format: String,
    pub inner_files: Vec<String>,
}

/// Raw JSON of `dir/manifest.json`, if present and parseable.
///
/// Detection only needs a couple of fields and must tolerate manifests from
/// older runs, so this stays untyped.
pub fn sibling_manifest(artifact: &Path) -> Option<Value> {
    let dir = artifact.parent()?;
    let text = fs::read_to_string(dir.join(MANIFEST_NAME)).ok()?;
    serde_json::from_str(&text).ok()
}

/// One extracted file in the restore inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRow {
    pub timestamp: String,
    pub file: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub inferred_algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreManifest {
    pub run_at: String,
    pub input_final: PathBuf,
    pub detected_algorithm: AlgorithmId,
    pub stage1_container: PathBuf,
    pub extracted_count: usize,
    pub out_stage2: PathBuf,
    /// Whether every extracted file matched the search manifest's input hash.
    pub verified: Option<bool>,
    pub supported_algorithms: Vec<AlgorithmId>,
}
