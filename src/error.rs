use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::algorithm::AlgorithmId;

#[derive(Error, Debug)]
pub enum RecompressError {
    /// Input file absent; raised before any work is done.
    #[error("input file not found: {}", path.display())]
    MissingInput { path: PathBuf },

    /// External tool exited with a non-zero status.
    #[error("{algorithm} failed (program {}, exit status {}):\n{output}", program.display(), exit_label(*code))]
    AdapterHardFailure {
        algorithm: AlgorithmId,
        program: PathBuf,
        code: Option<i32>,
        output: String,
    },

    /// External tool did not finish inside its budget. Retryable.
    #[error("{algorithm} timed out after {timeout_secs}s on {}", input.display())]
    AdapterTimeout {
        algorithm: AlgorithmId,
        input: PathBuf,
        timeout_secs: u64,
        output: String,
    },

    /// Every retry timed out.
    #[error("N={copies} exceeded {last_timeout_secs}s after {attempts} attempts")]
    RetriesExhausted {
        copies: u32,
        attempts: u32,
        last_timeout_secs: u64,
    },

    /// Tool exited cleanly but left no output file behind.
    #[error("{algorithm} exited successfully but did not produce {}", path.display())]
    MissingOutputArtifact { algorithm: AlgorithmId, path: PathBuf },

    #[error("cannot infer the algorithm for '{}' (tried sibling manifest.json, suffixes [{}], name patterns)", path.display(), suffixes.join(", "))]
    UnresolvableAlgorithm { path: PathBuf, suffixes: Vec<String> },

    /// Bytes do not follow the container layout.
    #[error("malformed container {}: {reason}", path.display())]
    MalformedContainer { path: PathBuf, reason: String },

    /// Program could not be started at all.
    #[error("failed to start {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no adapter registered for {0}")]
    NoAdapter(AlgorithmId),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Propagated I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RecompressError {
    /// Only a timeout may be retried; every other failure is fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecompressError::AdapterTimeout { .. })
    }

    /// Attach the offending file to a container error raised on raw bytes.
    pub fn at_path(self, at: &Path) -> Self {
        match self {
            RecompressError::MalformedContainer { reason, .. } => {
                RecompressError::MalformedContainer {
                    path: at.to_path_buf(),
                    reason,
                }
            }
            other => other,
        }
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "killed by signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, RecompressError>;
