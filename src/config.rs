use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::algorithm::AlgorithmId;
use crate::error::{RecompressError, Result};

/// Longest single budget a config may ask for: 30 days.
pub const MAX_BUDGET_SECS: u64 = 30 * 24 * 3600;
pub const MAX_RETRIES: u32 = 32;
pub const MAX_BACKOFF_MULTIPLIER: u32 = 16;

/// Timeout and retry parameters for compressor invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    /// Floor for every budget, in seconds.
    pub base_secs: u64,
    /// Added on top of every estimate.
    pub safety_margin_secs: u64,
    /// Fraction of the last observed throughput the next run is assumed to reach.
    pub slowdown_factor: f64,
    /// Total attempts per iteration, the first one included.
    pub retry_max: u32,
    pub backoff_multiplier: u32,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base_secs: 14_400,
            safety_margin_secs: 600,
            slowdown_factor: 0.30,
            retry_max: 6,
            backoff_multiplier: 2,
        }
    }
}

impl TimeoutPolicy {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_RETRIES).contains(&self.retry_max) {
            return Err(RecompressError::Config(format!(
                "retry_max must be between 1 and {MAX_RETRIES}, got {}",
                self.retry_max
            )));
        }
        if !(1..=MAX_BACKOFF_MULTIPLIER).contains(&self.backoff_multiplier) {
            return Err(RecompressError::Config(format!(
                "backoff_multiplier must be between 1 and {MAX_BACKOFF_MULTIPLIER}, got {}",
                self.backoff_multiplier
            )));
        }
        check_budget("base_secs", self.base_secs)?;
        check_budget("safety_margin_secs", self.safety_margin_secs)?;
        if !(self.slowdown_factor.is_finite() && self.slowdown_factor > 0.0) {
            return Err(RecompressError::Config(format!(
                "slowdown_factor must be positive, got {}",
                self.slowdown_factor
            )));
        }
        Ok(())
    }
}

fn check_budget(name: &str, secs: u64) -> Result<()> {
    if secs > MAX_BUDGET_SECS {
        return Err(RecompressError::Config(format!(
            "{name} must be at most {MAX_BUDGET_SECS}, got {secs}"
        )));
    }
    Ok(())
}

/// Everything one search run needs. One instance per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Already-compressed payload to replicate.
    pub input: PathBuf,
    pub algorithm: AlgorithmId,
    /// Compressor executable; the algorithm's default when absent.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// Signed: negative values keep accepting slight inflation.
    #[serde(default = "default_threshold")]
    pub threshold_pct: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_final_dir")]
    pub final_dir: PathBuf,
    /// Iteration log; defaults to `work_dir/recompress_<stem>_<algo>.csv`.
    #[serde(default)]
    pub csv_path: Option<PathBuf>,
    #[serde(default)]
    pub timeouts: TimeoutPolicy,
    /// Sample CPU and memory of each compressor run.
    #[serde(default)]
    pub telemetry: bool,
}

fn default_threshold() -> f64 {
    -3.0
}

fn default_max_iterations() -> u32 {
    300
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_final_dir() -> PathBuf {
    PathBuf::from("final")
}

impl SearchConfig {
    pub fn new(input: impl Into<PathBuf>, algorithm: AlgorithmId) -> Self {
        Self {
            input: input.into(),
            algorithm,
            binary: None,
            threshold_pct: default_threshold(),
            max_iterations: default_max_iterations(),
            work_dir: default_work_dir(),
            final_dir: default_final_dir(),
            csv_path: None,
            timeouts: TimeoutPolicy::default(),
            telemetry: false,
        }
    }

    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(RecompressError::Config("max_iterations must be at least 1".into()));
        }
        if !self.threshold_pct.is_finite() {
            return Err(RecompressError::Config("threshold_pct must be finite".into()));
        }
        self.timeouts.validate()
    }

    pub fn binary(&self) -> PathBuf {
        self.binary
            .clone()
            .unwrap_or_else(|| self.algorithm.default_binary())
    }

    /// File name stored in every container entry name.
    pub fn input_base_name(&self) -> String {
        self.input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string())
    }

    pub fn csv_path(&self) -> PathBuf {
        self.csv_path.clone().unwrap_or_else(|| {
            let stem = self
                .input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "input".to_string());
            self.work_dir
                .join(format!("recompress_{stem}_{}.csv", self.algorithm))
        })
    }
}

/// Parameters of one restore run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Final compressed artifact.
    pub input: PathBuf,
    #[serde(default = "default_restore_dir")]
    pub out_dir: PathBuf,
    #[serde(default = "default_restore_base")]
    pub timeout_base_secs: u64,
    /// Assumed worst-case decompression rate for the size-based budget.
    #[serde(default = "default_bytes_per_second_floor")]
    pub bytes_per_second_floor: u64,
    /// Executable overrides by algorithm.
    #[serde(default)]
    pub binaries: BTreeMap<AlgorithmId, PathBuf>,
}

fn default_restore_dir() -> PathBuf {
    PathBuf::from("restore_run")
}

fn default_restore_base() -> u64 {
    3600
}

fn default_bytes_per_second_floor() -> u64 {
    1000
}

impl RestoreConfig {
    pub fn new(input: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            out_dir: out_dir.into(),
            timeout_base_secs: default_restore_base(),
            bytes_per_second_floor: default_bytes_per_second_floor(),
            binaries: BTreeMap::new(),
        }
    }

    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_budget("timeout_base_secs", self.timeout_base_secs)?;
        if self.bytes_per_second_floor == 0 {
            return Err(RecompressError::Config(
                "bytes_per_second_floor must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn stage1_dir(&self) -> PathBuf {
        self.out_dir.join("stage1_raw")
    }

    pub fn stage2_dir(&self) -> PathBuf {
        self.out_dir.join("stage2_extracted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_long_running_profile() {
        let cfg = SearchConfig::new("data/log_huff.bin", AlgorithmId::Gmix);
        assert_eq!(cfg.threshold_pct, -3.0);
        assert_eq!(cfg.max_iterations, 300);
        assert_eq!(cfg.timeouts.retry_max, 6);
        assert_eq!(cfg.binary(), PathBuf::from("./gmix"));
        assert_eq!(cfg.input_base_name(), "log_huff.bin");
        assert_eq!(cfg.csv_path(), PathBuf::from("work/recompress_log_huff_gmix.csv"));
    }

    #[test]
    fn json_config_fills_defaults() {
        let cfg: SearchConfig =
            serde_json::from_str(r#"{"input": "gps_lzw.bin", "algorithm": "paq8px", "timeouts": {"retry_max": 2}}"#)
                .unwrap();
        assert_eq!(cfg.algorithm, AlgorithmId::Paq8px);
        assert_eq!(cfg.timeouts.retry_max, 2);
        assert_eq!(cfg.timeouts.base_secs, 14_400);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut cfg = SearchConfig::new("x", AlgorithmId::Bsc);
        cfg.max_iterations = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_budgets_rejected() {
        let mut policy = TimeoutPolicy {
            base_secs: u64::MAX,
            ..TimeoutPolicy::default()
        };
        assert!(policy.validate().is_err());

        policy.base_secs = MAX_BUDGET_SECS;
        assert!(policy.validate().is_ok());

        policy.safety_margin_secs = MAX_BUDGET_SECS + 1;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn runaway_retries_rejected() {
        let mut policy = TimeoutPolicy {
            retry_max: 1000,
            ..TimeoutPolicy::default()
        };
        assert!(policy.validate().is_err());

        policy.retry_max = MAX_RETRIES;
        assert!(policy.validate().is_ok());

        policy.backoff_multiplier = u32::MAX;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn restore_config_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restore.json");
        fs::write(
            &path,
            r#"{"input": "final/final_container_N_0007.gmix", "binaries": {"gmix": "/opt/gmix"}}"#,
        )
        .unwrap();

        let cfg = RestoreConfig::load(&path).unwrap();
        assert_eq!(cfg.out_dir, PathBuf::from("restore_run"));
        assert_eq!(cfg.timeout_base_secs, 3600);
        assert_eq!(cfg.bytes_per_second_floor, 1000);
        assert_eq!(cfg.binaries.get(&AlgorithmId::Gmix), Some(&PathBuf::from("/opt/gmix")));
        assert_eq!(cfg.stage2_dir(), PathBuf::from("restore_run/stage2_extracted"));
    }

    #[test]
    fn restore_config_rejects_zero_floor() {
        let mut cfg = RestoreConfig::new("a.gmix", "out");
        assert!(cfg.validate().is_ok());
        cfg.bytes_per_second_floor = 0;
        assert!(cfg.validate().is_err());
    }
}
