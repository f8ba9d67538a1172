#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use recompress::{Adapter, AlgorithmId, CompressionMetrics, RawMetrics, RecompressError, Result};

/// What the scripted compressor does on its next call.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Write an output this many percent smaller than the input.
    Reduce(f64),
    Timeout,
    Fail,
    /// Exit cleanly without writing anything.
    NoOutput,
}

/// In-process stand-in for an external compressor.
///
/// Compression follows a fixed script; decompression copies the input
/// through unchanged.
pub struct ScriptedAdapter {
    algorithm: AlgorithmId,
    steps: RefCell<VecDeque<Step>>,
    pub calls: Cell<u32>,
    pub budgets: RefCell<Vec<Duration>>,
}

impl ScriptedAdapter {
    pub fn new(algorithm: AlgorithmId, steps: &[Step]) -> Self {
        Self {
            algorithm,
            steps: RefCell::new(steps.iter().copied().collect()),
            calls: Cell::new(0),
            budgets: RefCell::new(Vec::new()),
        }
    }

    pub fn passthrough(algorithm: AlgorithmId) -> Self {
        Self::new(algorithm, &[])
    }
}

impl Adapter for ScriptedAdapter {
    fn algorithm(&self) -> AlgorithmId {
        self.algorithm
    }

    fn compress(&self, input: &Path, output: &Path, timeout: Duration) -> Result<CompressionMetrics> {
        self.calls.set(self.calls.get() + 1);
        self.budgets.borrow_mut().push(timeout);
        let original = fs::metadata(input)?.len();
        let step = self
            .steps
            .borrow_mut()
            .pop_front()
            .expect("script ran out of steps");
        let compressed = match step {
            Step::Reduce(pct) => {
                let size = (original as f64 * (1.0 - pct / 100.0)).round() as usize;
                fs::write(output, vec![0x5a; size])?;
                Some(size as u64)
            }
            Step::Timeout => {
                return Err(RecompressError::AdapterTimeout {
                    algorithm: self.algorithm,
                    input: input.to_path_buf(),
                    timeout_secs: timeout.as_secs(),
                    output: String::new(),
                })
            }
            Step::Fail => {
                return Err(RecompressError::AdapterHardFailure {
                    algorithm: self.algorithm,
                    program: PathBuf::from("scripted"),
                    code: Some(2),
                    output: "unsupported input".into(),
                })
            }
            Step::NoOutput => None,
        };
        Ok(CompressionMetrics {
            original_bytes: original,
            compressed_bytes: compressed,
            elapsed_seconds: 0.5,
            cross_entropy: None,
            block_types: None,
            raw_log: String::new(),
            samples: Vec::new(),
        })
    }

    fn decompress(&self, input: &Path, output: &Path, _timeout: Duration) -> Result<RawMetrics> {
        let n = fs::copy(input, output)?;
        Ok(RawMetrics {
            elapsed_seconds: 0.1,
            output_bytes: Some(n),
            raw_log: String::new(),
        })
    }
}

/// Deterministic pseudo-random payload standing in for an already-compressed file.
pub fn payload(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}
