//! Iterative copy-count search.
//!
//! Iteration `i` packs `N = i` copies of the input, compresses the container
//! under the retry supervisor and keeps going while the reduction stays at or
//! above the threshold. The first violation stops the run; it is not a search
//! for a global optimum.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::adapter::{reduction_pct, Adapter, CompressionMetrics};
use crate::config::SearchConfig;
use crate::container::{self, FORMAT_DOC};
use crate::error::{RecompressError, Result};
use crate::io_utils::human_bytes;
use crate::report::{self, BestSummary, IterationRow, SearchManifest, MANIFEST_NAME};
use crate::retry::{RetryOutcome, RetrySupervisor};
use crate::telemetry::Sample;
use crate::timeout::TimeoutEstimator;

/// One row of search history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub copies: u32,
    pub container_bytes: u64,
    pub compressed_bytes: Option<u64>,
    pub reduction_pct: f64,
    pub elapsed_seconds: f64,
    /// Attempts the retry supervisor needed.
    pub attempts: u32,
    pub timeout_secs: u64,
    pub metrics: CompressionMetrics,
    pub container_path: PathBuf,
    pub compressed_path: PathBuf,
}

impl IterationRecord {
    fn to_row(&self) -> IterationRow {
        IterationRow {
            timestamp: report::timestamp(),
            iter: self.iteration,
            copies: self.copies,
            container_bytes: self.container_bytes,
            compressed_bytes: self.compressed_bytes,
            reduction_pct: format!("{:.4}", self.reduction_pct),
            time_s: format!("{:.4}", self.elapsed_seconds),
            cross_entropy: self.metrics.cross_entropy,
            block_types: self.metrics.block_types.clone(),
            container_path: self.container_path.display().to_string(),
            compressed_path: self.compressed_path.display().to_string(),
        }
    }
}

/// Mutable state of one run, owned by the loop.
///
/// The iteration counter is the loop variable itself; iteration `i` packs
/// `i` copies.
#[derive(Debug, Default)]
pub struct SearchState {
    pub best: Option<IterationRecord>,
    pub last_bytes_per_sec: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Reduction fell below the threshold.
    Threshold,
    /// Every retry timed out after at least one accepted iteration.
    RetriesExhausted,
    IterationCeiling,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Threshold => "threshold",
            StopReason::RetriesExhausted => "retries_exhausted",
            StopReason::IterationCeiling => "iteration_ceiling",
        })
    }
}

/// Everything a finished search produced.
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub best: Option<IterationRecord>,
    pub stop: StopReason,
    pub iterations: Vec<IterationRecord>,
    pub final_container: PathBuf,
    pub final_artifact: PathBuf,
    /// Absent when no iteration was ever accepted.
    pub manifest: Option<PathBuf>,
    pub csv_path: PathBuf,
}

/// Drives one search run with a fixed configuration and adapter.
pub struct SearchLoop<'a> {
    config: &'a SearchConfig,
    adapter: &'a dyn Adapter,
    estimator: TimeoutEstimator,
    supervisor: RetrySupervisor,
    progress: ProgressBar,
}

impl<'a> SearchLoop<'a> {
    pub fn new(config: &'a SearchConfig, adapter: &'a dyn Adapter) -> Self {
        Self {
            config,
            adapter,
            estimator: TimeoutEstimator::from_policy(&config.timeouts),
            supervisor: RetrySupervisor::from_policy(&config.timeouts),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    fn iteration_paths(&self, iteration: u32) -> (PathBuf, PathBuf, PathBuf) {
        let dir = self.config.work_dir.join(format!("iter_{iteration:03}"));
        let container = dir.join(format!("container_{iteration:03}.bin"));
        let compressed = dir.join(format!(
            "container_{iteration:03}.{}",
            self.adapter.algorithm().extension()
        ));
        (dir, container, compressed)
    }

    pub fn run(&self) -> Result<SearchReport> {
        self.config.validate()?;
        let input = &self.config.input;
        if !input.is_file() {
            return Err(RecompressError::MissingInput {
                path: input.clone(),
            });
        }
        fs::create_dir_all(&self.config.work_dir)?;
        fs::create_dir_all(&self.config.final_dir)?;

        let source = fs::read(input)?;
        let base_name = self.config.input_base_name();
        let csv_path = self.config.csv_path();
        let telemetry_path = self.config.work_dir.join("telemetry.csv");

        let mut state = SearchState::default();
        let mut history = Vec::new();
        let mut stop = StopReason::IterationCeiling;

        for iteration in 1..=self.config.max_iterations {
            let copies = iteration;
            let (dir, container_path, compressed_path) = self.iteration_paths(iteration);
            fs::create_dir_all(&dir)?;

            self.progress
                .set_message(format!("iter {iteration:03}: packing N={copies}"));
            let container_bytes = container::pack_file(&source, copies, &base_name, &container_path)?;
            let timeout = self.estimator.estimate(container_bytes, state.last_bytes_per_sec);

            self.progress.set_message(format!(
                "iter {iteration:03}: {} N={copies} ({}, budget {}s)",
                self.adapter.algorithm(),
                human_bytes(container_bytes),
                timeout.as_secs()
            ));
            let outcome = self
                .supervisor
                .compress(self.adapter, &container_path, &compressed_path, timeout)?;

            let (mut metrics, attempts, used_timeout) = match outcome {
                RetryOutcome::Succeeded {
                    value,
                    attempts,
                    timeout,
                } => (value, attempts, timeout),
                RetryOutcome::Exhausted {
                    attempts,
                    last_timeout,
                } => {
                    warn!(
                        copies,
                        attempts,
                        timeout_secs = last_timeout.as_secs(),
                        "every attempt timed out"
                    );
                    if state.best.is_none() {
                        return Err(RecompressError::RetriesExhausted {
                            copies,
                            attempts,
                            last_timeout_secs: last_timeout.as_secs(),
                        });
                    }
                    stop = StopReason::RetriesExhausted;
                    break;
                }
            };

            if !compressed_path.exists() {
                return Err(RecompressError::MissingOutputArtifact {
                    algorithm: self.adapter.algorithm(),
                    path: compressed_path,
                });
            }

            let samples: Vec<Sample> = std::mem::take(&mut metrics.samples);
            if !samples.is_empty() {
                report::append_rows(&telemetry_path, &samples)?;
            }

            let record = IterationRecord {
                iteration,
                copies,
                container_bytes,
                compressed_bytes: metrics.compressed_bytes,
                reduction_pct: reduction_pct(metrics.original_bytes, metrics.compressed_bytes),
                elapsed_seconds: metrics.elapsed_seconds,
                attempts,
                timeout_secs: used_timeout.as_secs(),
                metrics,
                container_path,
                compressed_path,
            };
            report::append_rows(&csv_path, &[record.to_row()])?;

            if let Some(bps) = record.metrics.throughput() {
                state.last_bytes_per_sec = Some(bps);
            }

            info!(
                iteration,
                copies,
                container = %human_bytes(container_bytes),
                compressed = %record.compressed_bytes.map(human_bytes).unwrap_or_else(|| "?".into()),
                reduction_pct = record.reduction_pct,
                elapsed_s = record.elapsed_seconds,
                "iteration done"
            );

            let accepted = record.reduction_pct >= self.config.threshold_pct;
            history.push(record.clone());
            if accepted {
                state.best = Some(record);
            } else {
                info!(
                    iteration,
                    reduction_pct = record.reduction_pct,
                    threshold_pct = self.config.threshold_pct,
                    "reduction below threshold, stopping"
                );
                stop = StopReason::Threshold;
                break;
            }
        }

        self.progress.finish_and_clear();
        self.finalize(state, history, stop, &source, csv_path)
    }

    fn finalize(
        &self,
        state: SearchState,
        iterations: Vec<IterationRecord>,
        stop: StopReason,
        source: &[u8],
        csv_path: PathBuf,
    ) -> Result<SearchReport> {
        let final_dir = &self.config.final_dir;
        let Some(best) = state.best else {
            // Nothing met the threshold; keep the first iteration as-is.
            warn!("no iteration reached the threshold, keeping the first one");
            let (_, container_path, compressed_path) = self.iteration_paths(1);
            let final_container = final_dir.join(file_name(&container_path));
            let final_artifact = final_dir.join(file_name(&compressed_path));
            fs::copy(&container_path, &final_container)?;
            fs::copy(&compressed_path, &final_artifact)?;
            return Ok(SearchReport {
                best: None,
                stop,
                iterations,
                final_container,
                final_artifact,
                manifest: None,
                csv_path,
            });
        };

        let stem = format!("final_container_iter_{:03}_N_{:04}", best.iteration, best.copies);
        let final_container = final_dir.join(format!("{stem}.bin"));
        let final_artifact = final_dir.join(format!("{stem}.{}", self.adapter.algorithm().extension()));
        fs::copy(&best.container_path, &final_container)?;
        fs::copy(&best.compressed_path, &final_artifact)?;

        let input_file = fs::canonicalize(&self.config.input).unwrap_or_else(|_| self.config.input.clone());
        let manifest = SearchManifest {
            created_at: report::iso_now(),
            input_file: input_file.display().to_string(),
            input_sha256: hex::encode(Sha256::digest(source)),
            algorithm: self.adapter.algorithm(),
            threshold_pct: self.config.threshold_pct,
            max_iters: self.config.max_iterations,
            stop_reason: stop.to_string(),
            best: BestSummary {
                iter: best.iteration,
                copies: best.copies,
                original_bytes: best.metrics.original_bytes,
                compressed_bytes: best.compressed_bytes,
                reduction_pct: best.reduction_pct,
                time_s: best.elapsed_seconds,
                cross_entropy: best.metrics.cross_entropy,
                block_types: best.metrics.block_types.clone(),
                attempts: best.attempts,
            },
            container_format: FORMAT_DOC.to_string(),
            inner_files: container::entry_names(best.copies, &self.config.input_base_name()),
        };
        let manifest_path = final_dir.join(MANIFEST_NAME);
        report::write_json(&manifest_path, &manifest)?;

        info!(
            iteration = best.iteration,
            copies = best.copies,
            reduction_pct = best.reduction_pct,
            stop = %stop,
            "search finalized"
        );
        Ok(SearchReport {
            best: Some(best),
            stop,
            iterations,
            final_container,
            final_artifact,
            manifest: Some(manifest_path),
            csv_path,
        })
    }
}

fn file_name(path: &Path) -> PathBuf {
    path.file_name().map(PathBuf::from).unwrap_or_default()
}
