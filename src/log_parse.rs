//! Best-effort scraping of compressor console output.
//!
//! Output formats drift between builds, so every field is optional and a miss
//! is never an error: callers fill the gaps from file sizes and wall time.

use std::sync::LazyLock;

use regex::Regex;

use crate::algorithm::AlgorithmId;

/// Fields recovered from a tool's combined stdout/stderr.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLog {
    pub original_bytes: Option<u64>,
    pub compressed_bytes: Option<u64>,
    pub elapsed_seconds: Option<f64>,
    pub cross_entropy: Option<f64>,
    pub block_types: Option<String>,
}

// "1860 bytes -> 69 bytes in 11.58 s."
static CM_SIZES: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+) bytes -> (\d+) bytes in ([\d.]+) s\.").ok());
static CM_ENTROPY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)cross entropy: ([\d.]+)").ok());

static PAQ_SIZES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)Compressed from\s+(\d+)\s+to\s+(\d+)\s+bytes",
        r"(?i)(\d+)\s*bytes?\s*->\s*(\d+)\s*bytes?",
        r"(\d+)\s*->\s*(\d+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});
static PAQ_TIME: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?i)Time\s+([\d.]+)\s*s(ec)?", r"(?i)in\s+([\d.]+)\s*s(ec)?"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// Dispatch to the parser for `algorithm`.
pub fn parse(algorithm: AlgorithmId, text: &str) -> ParsedLog {
    match algorithm {
        AlgorithmId::Gmix | AlgorithmId::Cmix | AlgorithmId::Lstm => parse_cm(text),
        AlgorithmId::Paq8px => parse_paq8px(text),
        // bsc-m03 prints no statistics.
        AlgorithmId::Bsc => ParsedLog::default(),
    }
}

/// Parser for the cmix family (cmix, gmix, lstm-compress).
pub fn parse_cm(text: &str) -> ParsedLog {
    let mut parsed = ParsedLog::default();
    if let Some(caps) = CM_SIZES.as_ref().and_then(|rx| rx.captures(text)) {
        parsed.original_bytes = caps[1].parse().ok();
        parsed.compressed_bytes = caps[2].parse().ok();
        parsed.elapsed_seconds = caps[3].parse().ok();
    }
    parsed.cross_entropy = CM_ENTROPY
        .as_ref()
        .and_then(|rx| rx.captures(text))
        .and_then(|caps| caps[1].parse().ok());
    parsed.block_types = block_types(text);
    parsed
}

pub fn parse_paq8px(text: &str) -> ParsedLog {
    let mut parsed = ParsedLog::default();
    if let Some(caps) = PAQ_SIZES.iter().find_map(|rx| rx.captures(text)) {
        parsed.original_bytes = caps[1].parse().ok();
        parsed.compressed_bytes = caps[2].parse().ok();
    }
    parsed.elapsed_seconds = PAQ_TIME
        .iter()
        .find_map(|rx| rx.captures(text))
        .and_then(|caps| caps[1].parse().ok());
    parsed
}

fn block_types(text: &str) -> Option<String> {
    const PREFIX: &str = "detected block types:";
    text.lines().find_map(|line| {
        let trimmed = line.trim();
        let head = trimmed.get(..PREFIX.len())?;
        if head.eq_ignore_ascii_case(PREFIX) {
            Some(trimmed[PREFIX.len()..].trim().to_string())
        } else {
            None
        }
    })
}
