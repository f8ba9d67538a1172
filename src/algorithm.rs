//! Supported external compressors and the static facts about each one:
//! default executable, command templates, artifact suffixes and the
//! filename tokens used to recognise their output.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RecompressError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmId {
    Gmix,
    Paq8px,
    Bsc,
    Cmix,
    Lstm,
}

static CMIX_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?i)\bcmix\b").ok());
static GMIX_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?i)\bgmix\b").ok());
static BSC_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?i)\bbsc\b").ok());
static LSTM_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?i)lstm").ok());
static PAQ_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)paq8px|paq8|paq").ok());

/// Suffix table used by detection. Several suffixes may map to one algorithm.
pub const SUFFIXES: &[(&str, AlgorithmId)] = &[
    (".cmix", AlgorithmId::Cmix),
    (".gmix", AlgorithmId::Gmix),
    (".bsc", AlgorithmId::Bsc),
    (".lstm", AlgorithmId::Lstm),
    (".paq8", AlgorithmId::Paq8px),
    (".paq8px", AlgorithmId::Paq8px),
    (".paq", AlgorithmId::Paq8px),
];

impl AlgorithmId {
    pub const ALL: [AlgorithmId; 5] = [
        AlgorithmId::Cmix,
        AlgorithmId::Gmix,
        AlgorithmId::Bsc,
        AlgorithmId::Lstm,
        AlgorithmId::Paq8px,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AlgorithmId::Gmix => "gmix",
            AlgorithmId::Paq8px => "paq8px",
            AlgorithmId::Bsc => "bsc",
            AlgorithmId::Cmix => "cmix",
            AlgorithmId::Lstm => "lstm",
        }
    }

    /// Extension given to compressed artifacts, without the dot.
    pub fn extension(self) -> &'static str {
        self.as_str()
    }

    pub fn default_binary(self) -> PathBuf {
        PathBuf::from(match self {
            AlgorithmId::Gmix => "./gmix",
            AlgorithmId::Paq8px => "./paq8px",
            AlgorithmId::Bsc => "./bsc-m03",
            AlgorithmId::Cmix => "./cmix",
            AlgorithmId::Lstm => "./lstm-compress",
        })
    }

    /// Argument template for compression. `{inp}` and `{out}` are substituted.
    pub fn compress_args(self) -> &'static [&'static str] {
        match self {
            AlgorithmId::Gmix | AlgorithmId::Cmix | AlgorithmId::Lstm => &["-c", "{inp}", "{out}"],
            AlgorithmId::Paq8px => &["-8", "{inp}", "{out}"],
            AlgorithmId::Bsc => &["e", "{inp}", "{out}"],
        }
    }

    pub fn decompress_args(self) -> &'static [&'static str] {
        match self {
            AlgorithmId::Bsc => &["d", "{inp}", "{out}"],
            _ => &["-d", "{inp}", "{out}"],
        }
    }

    /// Pattern matching the algorithm's characteristic token inside a filename.
    pub fn name_pattern(self) -> Option<&'static Regex> {
        let pattern = match self {
            AlgorithmId::Cmix => &CMIX_NAME,
            AlgorithmId::Gmix => &GMIX_NAME,
            AlgorithmId::Bsc => &BSC_NAME,
            AlgorithmId::Lstm => &LSTM_NAME,
            AlgorithmId::Paq8px => &PAQ_NAME,
        };
        pattern.as_ref()
    }

    /// Best-effort guess from a bare filename using the name tokens, tried in
    /// the fixed order of [`AlgorithmId::ALL`].
    pub fn guess_from_name(name: &str) -> Option<AlgorithmId> {
        AlgorithmId::ALL
            .into_iter()
            .find(|algo| algo.name_pattern().is_some_and(|rx| rx.is_match(name)))
    }

    pub fn known_suffixes() -> Vec<String> {
        SUFFIXES.iter().map(|(s, _)| s.to_string()).collect()
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmId {
    type Err = RecompressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        AlgorithmId::ALL
            .into_iter()
            .find(|a| a.as_str() == wanted)
            .ok_or_else(|| {
                RecompressError::Config(format!(
                    "unknown algorithm '{s}', expected one of: gmix, paq8px, bsc, cmix, lstm"
                ))
            })
    }
}
