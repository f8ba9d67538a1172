//! Recursive recompression search for context-mixing compressors.
//!
//! An already-compressed payload is replicated `N` times into a simple
//! container and handed to an external compressor. `N` grows until the
//! compressor stops finding redundancy worth keeping. A matching restore
//! pipeline turns the final artifact back into the original copies.

pub mod adapter;
pub mod algorithm;
pub mod config;
pub mod container;
pub mod detect;
mod error;
pub mod io_utils;
pub mod log_parse;
pub mod logging;
pub mod process;
pub mod report;
pub mod restore;
pub mod retry;
pub mod search;
pub mod telemetry;
pub mod timeout;

pub use adapter::{reduction_pct, Adapter, CommandTemplate, CompressionMetrics, ExternalAdapter, RawMetrics, Registry};
pub use algorithm::AlgorithmId;
pub use config::{RestoreConfig, SearchConfig, TimeoutPolicy};
pub use container::{pack, sniff, unpack, Entry};
pub use detect::detect;
pub use error::{RecompressError, Result};
pub use restore::{RestorePipeline, RestoreReport};
pub use retry::{RetryOutcome, RetrySupervisor};
pub use search::{IterationRecord, SearchLoop, SearchReport, StopReason};
pub use timeout::TimeoutEstimator;
