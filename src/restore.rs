//! Two-stage restore: decompress the final artifact back into a raw
//! container, then unpack the container's entries.

use std::fs;
use std::path::PathBuf;

use indicatif::ProgressBar;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::adapter::{RawMetrics, Registry};
use crate::algorithm::AlgorithmId;
use crate::config::RestoreConfig;
use crate::container;
use crate::detect;
use crate::error::{RecompressError, Result};
use crate::report::{
    self, sibling_manifest, InventoryRow, RestoreManifest, RESTORE_LOG_NAME, RESTORE_MANIFEST_NAME,
};
use crate::timeout::estimate_from_size;

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub algorithm: AlgorithmId,
    pub stage1_container: PathBuf,
    pub stage1: RawMetrics,
    pub extracted: Vec<PathBuf>,
    pub inventory: Vec<InventoryRow>,
    pub verified: Option<bool>,
    pub manifest_path: PathBuf,
    pub inventory_path: PathBuf,
}

pub struct RestorePipeline<'a> {
    config: &'a RestoreConfig,
    registry: &'a Registry,
    progress: ProgressBar,
}

impl<'a> RestorePipeline<'a> {
    pub fn new(config: &'a RestoreConfig, registry: &'a Registry) -> Self {
        Self {
            config,
            registry,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn run(&self) -> Result<RestoreReport> {
        let input = &self.config.input;
        if !input.is_file() {
            return Err(RecompressError::MissingInput {
                path: input.clone(),
            });
        }
        let stage1_dir = self.config.stage1_dir();
        let stage2_dir = self.config.stage2_dir();
        fs::create_dir_all(&stage1_dir)?;
        fs::create_dir_all(&stage2_dir)?;

        // Stage 1: artifact -> raw container.
        let (algorithm, evidence) = detect::detect_with_evidence(input)?;
        info!(%algorithm, ?evidence, "[1/2] detected algorithm");
        let adapter = self.registry.get(algorithm)?;
        let raw_container = stage1_dir.join("container.bin");
        let timeout = estimate_from_size(
            fs::metadata(input)?.len(),
            self.config.timeout_base_secs,
            self.config.bytes_per_second_floor,
        );
        self.progress
            .set_message(format!("[1/2] {algorithm} -d (budget {}s)", timeout.as_secs()));
        let stage1 = adapter.decompress(input, &raw_container, timeout)?;
        if !raw_container.exists() {
            return Err(RecompressError::MissingOutputArtifact {
                algorithm,
                path: raw_container,
            });
        }
        info!(
            elapsed_s = stage1.elapsed_seconds,
            bytes = stage1.output_bytes,
            path = %raw_container.display(),
            "stage 1 complete"
        );

        // Stage 2: raw container -> files.
        self.progress.set_message("[2/2] unpacking container");
        let bytes = fs::read(&raw_container)?;
        if !container::sniff(&bytes) {
            return Err(RecompressError::MalformedContainer {
                path: raw_container,
                reason: "decompressed output does not start with a container header".into(),
            });
        }
        let extracted =
            container::unpack(&bytes, &stage2_dir).map_err(|e| e.at_path(&raw_container))?;
        drop(bytes);
        info!(count = extracted.len(), "[2/2] extracted files");

        let expected = sibling_manifest(input).and_then(|m| {
            m.get("input_sha256")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        });
        let mut inventory = Vec::with_capacity(extracted.len());
        for path in &extracted {
            let data = fs::read(path)?;
            let file = path
                .strip_prefix(&stage2_dir)
                .unwrap_or(path)
                .display()
                .to_string();
            inventory.push(InventoryRow {
                timestamp: report::timestamp(),
                inferred_algorithm: AlgorithmId::guess_from_name(&file)
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
                file,
                size_bytes: data.len() as u64,
                sha256: hex::encode(Sha256::digest(&data)),
            });
        }
        let verified = expected.map(|hash| inventory.iter().all(|row| row.sha256 == hash));
        if verified == Some(false) {
            warn!("restored files do not match the recorded input hash");
        }

        let inventory_path = self.config.out_dir.join(RESTORE_LOG_NAME);
        report::write_rows(&inventory_path, &inventory)?;

        let manifest = RestoreManifest {
            run_at: report::iso_now(),
            input_final: fs::canonicalize(input).unwrap_or_else(|_| input.clone()),
            detected_algorithm: algorithm,
            stage1_container: fs::canonicalize(&raw_container)
                .unwrap_or_else(|_| raw_container.clone()),
            extracted_count: extracted.len(),
            out_stage2: fs::canonicalize(&stage2_dir).unwrap_or_else(|_| stage2_dir.clone()),
            verified,
            supported_algorithms: self.registry.algorithms().collect(),
        };
        let manifest_path = self.config.out_dir.join(RESTORE_MANIFEST_NAME);
        report::write_json(&manifest_path, &manifest)?;
        self.progress.finish_and_clear();

        Ok(RestoreReport {
            algorithm,
            stage1_container: raw_container,
            stage1,
            extracted,
            inventory,
            verified,
            manifest_path,
            inventory_path,
        })
    }
}
