use std::fmt;
use std::io;
use std::path::Path;

use crate::error::RecompressError;

#[derive(Debug)]
pub struct CliError {
    pub msg: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.msg.fmt(f)
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Format a user friendly I/O error message with suggestions.
pub fn format_io_error(operation: &str, path: &Path, err: &io::Error) -> String {
    use io::ErrorKind::*;
    let suggestion = match err.kind() {
        NotFound => "Check that the file exists and the path is correct.",
        PermissionDenied => "Check permissions or run as a different user.",
        UnexpectedEof => "File appears truncated or corrupted.",
        WriteZero => "Disk may be full. Free up space and try again.",
        Other if err.raw_os_error() == Some(28) => "Disk may be full. Free up space and try again.",
        _ => "Check permissions or free up disk space.",
    };
    format!(
        "Error {} '{}': {}. {}",
        operation,
        path.display(),
        err,
        suggestion
    )
}

/// Convert an I/O error into a CLI error with context.
pub fn io_cli_error(operation: &str, path: &Path, err: io::Error) -> CliError {
    CliError {
        msg: format_io_error(operation, path, &err),
        source: Some(Box::new(err)),
    }
}

pub fn simple_cli_error(msg: &str) -> CliError {
    CliError {
        msg: msg.to_string(),
        source: None,
    }
}

/// Convert a library error into a CLI error with a hint.
pub fn recompress_cli_error(context: &str, err: RecompressError) -> CliError {
    CliError {
        msg: format!("{}: {}", context, cli_hint(&err)),
        source: Some(Box::new(err)),
    }
}

/// Return an actionable hint for an error variant.
pub fn cli_hint(err: &RecompressError) -> String {
    use crate::error::RecompressError::*;
    match err {
        MissingInput { .. } => format!("{err}. Check the input path."),
        AdapterHardFailure { .. } => format!("{err}\nThe compressor rejected its input; see its output above."),
        AdapterTimeout { .. } => format!("{err}. Raise timeouts.base_secs or check the machine load."),
        RetriesExhausted { .. } => format!("{err}. Every retry timed out; raise timeouts.base_secs or retry_max."),
        MissingOutputArtifact { .. } => format!("{err}. Check the command template and free disk space."),
        UnresolvableAlgorithm { .. } => format!("{err}. Give the file a known suffix or keep its manifest.json beside it."),
        MalformedContainer { .. } => format!("{err}. Verify the artifact was produced by a search run."),
        Spawn { program, .. } => format!("{err}. Check that {} exists and is executable.", program.display()),
        NoAdapter(_) => format!("{err}. This is a bug."),
        Config(_) => format!("{err}. Invalid configuration."),
        Io(_) | Csv(_) | Json(_) => err.to_string(),
    }
}

/// Size with a binary unit, two decimals: `1536` -> `1.50 KB`.
pub fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
