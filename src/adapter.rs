//! External compressor adapters.
//!
//! An [`Adapter`] is the {compress, decompress} capability of one tool. The
//! stock implementation, [`ExternalAdapter`], renders a command template,
//! runs it under a timeout and normalises the tool's console output into
//! [`CompressionMetrics`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::algorithm::AlgorithmId;
use crate::error::{RecompressError, Result};
use crate::log_parse::{self, ParsedLog};
use crate::process::{self, Completion};
use crate::telemetry::{Phase, ProcessObserver, Sample};

/// Normalised result of one compression run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionMetrics {
    pub original_bytes: u64,
    /// `None` when the tool left no output file and did not report a size.
    pub compressed_bytes: Option<u64>,
    pub elapsed_seconds: f64,
    pub cross_entropy: Option<f64>,
    pub block_types: Option<String>,
    #[serde(skip)]
    pub raw_log: String,
    #[serde(skip)]
    pub samples: Vec<Sample>,
}

impl CompressionMetrics {
    /// Fill whatever the log did not report from the filesystem and the
    /// measured wall time.
    pub fn from_log(parsed: ParsedLog, input: &Path, output: &Path, measured: Duration) -> Result<Self> {
        let original_bytes = match parsed.original_bytes {
            Some(n) => n,
            None => fs::metadata(input)?.len(),
        };
        let compressed_bytes = parsed
            .compressed_bytes
            .or_else(|| fs::metadata(output).ok().map(|m| m.len()));
        let elapsed_seconds = parsed
            .elapsed_seconds
            .unwrap_or_else(|| measured.as_secs_f64());
        Ok(Self {
            original_bytes,
            compressed_bytes,
            elapsed_seconds,
            cross_entropy: parsed.cross_entropy,
            block_types: parsed.block_types,
            raw_log: String::new(),
            samples: Vec::new(),
        })
    }

    /// Bytes per second for this run, when both sides are known.
    pub fn throughput(&self) -> Option<f64> {
        (self.elapsed_seconds > 0.0 && self.original_bytes > 0)
            .then(|| self.original_bytes as f64 / self.elapsed_seconds)
    }
}

/// Result of one decompression run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMetrics {
    pub elapsed_seconds: f64,
    pub output_bytes: Option<u64>,
    #[serde(skip)]
    pub raw_log: String,
}

/// `(1 - compressed / original) * 100`; zero when either side is unknown.
pub fn reduction_pct(original: u64, compressed: Option<u64>) -> f64 {
    match compressed {
        Some(c) if original > 0 && c > 0 => (1.0 - c as f64 / original as f64) * 100.0,
        _ => 0.0,
    }
}

pub trait Adapter {
    fn algorithm(&self) -> AlgorithmId;

    /// Compress `input` into `output` within `timeout`.
    ///
    /// A timeout comes back as [`RecompressError::AdapterTimeout`]; a
    /// non-zero exit as [`RecompressError::AdapterHardFailure`].
    fn compress(&self, input: &Path, output: &Path, timeout: Duration) -> Result<CompressionMetrics>;

    fn decompress(&self, input: &Path, output: &Path, timeout: Duration) -> Result<RawMetrics>;
}

/// Executable plus argument template containing `{inp}` and `{out}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Adapter driving a real compressor binary.
#[derive(Clone)]
pub struct ExternalAdapter {
    algorithm: AlgorithmId,
    compress_cmd: CommandTemplate,
    decompress_cmd: CommandTemplate,
    observer: Option<Arc<dyn ProcessObserver>>,
}

impl ExternalAdapter {
    /// Stock command shapes for `algorithm`, using `binary` for both directions.
    pub fn standard(algorithm: AlgorithmId, binary: impl Into<PathBuf>) -> Self {
        let binary = binary.into();
        Self {
            algorithm,
            compress_cmd: CommandTemplate::new(binary.clone(), algorithm.compress_args()),
            decompress_cmd: CommandTemplate::new(binary, algorithm.decompress_args()),
            observer: None,
        }
    }

    pub fn with_commands(algorithm: AlgorithmId, compress: CommandTemplate, decompress: CommandTemplate) -> Self {
        Self {
            algorithm,
            compress_cmd: compress,
            decompress_cmd: decompress,
            observer: None,
        }
    }

    /// Attach a telemetry sampler to every compression this adapter runs.
    pub fn with_observer(mut self, observer: Arc<dyn ProcessObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn compress_command(&self) -> &CommandTemplate {
        &self.compress_cmd
    }

    pub fn decompress_command(&self) -> &CommandTemplate {
        &self.decompress_cmd
    }

    fn invoke(
        &self,
        template: &CommandTemplate,
        input: &Path,
        output: &Path,
        timeout: Duration,
        phase: Option<Phase>,
    ) -> Result<process::Finished> {
        // Some tools prompt before overwriting; never give them the chance.
        if output.exists() {
            fs::remove_file(output)?;
        }
        let args = process::render_args(&template.args, input, output);
        let observer = match (&self.observer, phase) {
            (Some(o), Some(phase)) => Some((o.as_ref(), phase)),
            _ => None,
        };
        match process::run_with_timeout(&template.program, &args, timeout, observer)? {
            Completion::TimedOut { output: text, .. } => Err(RecompressError::AdapterTimeout {
                algorithm: self.algorithm,
                input: input.to_path_buf(),
                timeout_secs: timeout.as_secs(),
                output: text,
            }),
            Completion::Finished(done) if !done.success => Err(RecompressError::AdapterHardFailure {
                algorithm: self.algorithm,
                program: template.program.clone(),
                code: done.code,
                output: done.output,
            }),
            Completion::Finished(done) => Ok(done),
        }
    }
}

impl Adapter for ExternalAdapter {
    fn algorithm(&self) -> AlgorithmId {
        self.algorithm
    }

    fn compress(&self, input: &Path, output: &Path, timeout: Duration) -> Result<CompressionMetrics> {
        let done = self.invoke(&self.compress_cmd, input, output, timeout, Some(Phase::Compress))?;
        let parsed = log_parse::parse(self.algorithm, &done.output);
        if parsed.original_bytes.is_none() || parsed.elapsed_seconds.is_none() {
            debug!(algorithm = %self.algorithm, "log incomplete, using measured values");
        }
        let mut metrics = CompressionMetrics::from_log(parsed, input, output, done.elapsed)?;
        metrics.raw_log = done.output;
        metrics.samples = done.samples;
        Ok(metrics)
    }

    fn decompress(&self, input: &Path, output: &Path, timeout: Duration) -> Result<RawMetrics> {
        let done = self.invoke(&self.decompress_cmd, input, output, timeout, None)?;
        Ok(RawMetrics {
            elapsed_seconds: done.elapsed.as_secs_f64(),
            output_bytes: fs::metadata(output).ok().map(|m| m.len()),
            raw_log: done.output,
        })
    }
}

/// Adapters by algorithm. New tools are added by registering a variant.
#[derive(Default)]
pub struct Registry {
    adapters: BTreeMap<AlgorithmId, Box<dyn Adapter>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every supported algorithm with its default binary path, overridden by
    /// `binaries` where given.
    pub fn standard(binaries: &BTreeMap<AlgorithmId, PathBuf>) -> Self {
        let mut registry = Self::new();
        for algorithm in AlgorithmId::ALL {
            let binary = binaries
                .get(&algorithm)
                .cloned()
                .unwrap_or_else(|| algorithm.default_binary());
            registry.register(Box::new(ExternalAdapter::standard(algorithm, binary)));
        }
        registry
    }

    /// Insert or replace the adapter for its algorithm.
    pub fn register(&mut self, adapter: Box<dyn Adapter>) {
        self.adapters.insert(adapter.algorithm(), adapter);
    }

    pub fn get(&self, algorithm: AlgorithmId) -> Result<&dyn Adapter> {
        self.adapters
            .get(&algorithm)
            .map(|a| a.as_ref())
            .ok_or(RecompressError::NoAdapter(algorithm))
    }

    pub fn algorithms(&self) -> impl Iterator<Item = AlgorithmId> + '_ {
        self.adapters.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduction_handles_unknown_and_inflation() {
        assert_eq!(reduction_pct(100, Some(75)), 25.0);
        assert!((reduction_pct(100, Some(104)) + 4.0).abs() < 1e-9);
        assert_eq!(reduction_pct(100, None), 0.0);
        assert_eq!(reduction_pct(0, Some(10)), 0.0);
    }

    #[test]
    fn standard_templates_per_tool() {
        let paq = ExternalAdapter::standard(AlgorithmId::Paq8px, "./paq8px");
        assert_eq!(paq.compress_command().args, vec!["-8", "{inp}", "{out}"]);
        let bsc = ExternalAdapter::standard(AlgorithmId::Bsc, "./bsc-m03");
        assert_eq!(bsc.compress_command().args, vec!["e", "{inp}", "{out}"]);
        assert_eq!(bsc.decompress_command().args, vec!["d", "{inp}", "{out}"]);
    }

    #[test]
    fn registry_overrides_binaries() {
        let mut bins = BTreeMap::new();
        bins.insert(AlgorithmId::Gmix, PathBuf::from("/opt/gmix"));
        let registry = Registry::standard(&bins);
        assert_eq!(registry.algorithms().count(), 5);
        assert_eq!(registry.get(AlgorithmId::Gmix).unwrap().algorithm(), AlgorithmId::Gmix);
    }

    #[test]
    fn fallback_uses_file_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");
        fs::write(&input, vec![0u8; 40]).unwrap();
        fs::write(&output, vec![0u8; 10]).unwrap();
        let m = CompressionMetrics::from_log(
            ParsedLog::default(),
            &input,
            &output,
            Duration::from_millis(1500),
        )
        .unwrap();
        assert_eq!(m.original_bytes, 40);
        assert_eq!(m.compressed_bytes, Some(10));
        assert_eq!(m.elapsed_seconds, 1.5);
    }
}
