//! Work out which compressor produced a final artifact.
//!
//! Priority, first hit wins: sibling `manifest.json`, longest known suffix,
//! filename token.

use std::path::Path;

use tracing::debug;

use crate::algorithm::{AlgorithmId, SUFFIXES};
use crate::error::{RecompressError, Result};
use crate::report::sibling_manifest;

/// How an algorithm was recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    Manifest,
    Suffix,
    NamePattern,
}

pub fn detect(artifact: &Path) -> Result<AlgorithmId> {
    detect_with_evidence(artifact).map(|(algo, _)| algo)
}

pub fn detect_with_evidence(artifact: &Path) -> Result<(AlgorithmId, Evidence)> {
    if let Some(algo) = from_manifest(artifact) {
        return Ok((algo, Evidence::Manifest));
    }
    if let Some(algo) = from_suffix(artifact) {
        return Ok((algo, Evidence::Suffix));
    }
    if let Some(algo) = from_name(artifact) {
        return Ok((algo, Evidence::NamePattern));
    }
    Err(RecompressError::UnresolvableAlgorithm {
        path: artifact.to_path_buf(),
        suffixes: AlgorithmId::known_suffixes(),
    })
}

/// `algorithm` field of a sibling manifest, if it names a supported tool.
pub fn from_manifest(artifact: &Path) -> Option<AlgorithmId> {
    let manifest = sibling_manifest(artifact)?;
    let declared = manifest.get("algorithm")?.as_str()?;
    match declared.parse() {
        Ok(algo) => Some(algo),
        Err(_) => {
            debug!(declared, "manifest names an unsupported algorithm");
            None
        }
    }
}

/// Longest known suffix the path ends with, compared case-insensitively.
pub fn from_suffix(artifact: &Path) -> Option<AlgorithmId> {
    let lowered = artifact.to_string_lossy().to_lowercase();
    let mut table: Vec<_> = SUFFIXES.to_vec();
    table.sort_by_key(|(suffix, _)| std::cmp::Reverse(suffix.len()));
    table
        .into_iter()
        .find(|(suffix, _)| lowered.ends_with(suffix))
        .map(|(_, algo)| algo)
}

pub fn from_name(artifact: &Path) -> Option<AlgorithmId> {
    let name = artifact.file_name()?.to_string_lossy();
    AlgorithmId::guess_from_name(&name)
}
