//! Identity gallery: every known identity and its reference embeddings.
//!
//! A gallery is immutable once built. Training produces a brand-new one and
//! the store swaps it in whole.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Persisted blob format understood by [`Gallery::load`].
pub const GALLERY_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("corrupt gallery: {0}")]
    Corrupt(String),
    #[error("unsupported gallery format version {found} (this build reads version {})", GALLERY_FORMAT_VERSION)]
    VersionMismatch { found: u32 },
    #[error("gallery encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct Header {
    format_version: u32,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Blob {
    #[allow(dead_code)]
    format_version: u32,
    identities: BTreeMap<String, Vec<Embedding>>,
}

#[derive(Serialize)]
struct BlobRef<'a> {
    format_version: u32,
    identities: &'a BTreeMap<String, Vec<Embedding>>,
}

/// Identity → ordered reference embeddings. Identities iterate in
/// lexicographic order, references in the order they were captured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    identities: BTreeMap<String, Vec<Embedding>>,
}

impl Gallery {
    /// Build a gallery, rejecting empty identity names and identities without references.
    pub fn new(identities: BTreeMap<String, Vec<Embedding>>) -> Result<Self, GalleryError> {
        for (identity, refs) in &identities {
            if identity.is_empty() {
                return Err(GalleryError::Corrupt("empty identity name".into()));
            }
            if refs.is_empty() {
                return Err(GalleryError::Corrupt(format!(
                    "identity {identity:?} has no reference vectors"
                )));
            }
        }
        Ok(Self { identities })
    }

    /// Wrap references the caller has already grouped and checked.
    pub(crate) fn from_validated(identities: BTreeMap<String, Vec<Embedding>>) -> Self {
        debug_assert!(identities
            .iter()
            .all(|(id, refs)| !id.is_empty() && !refs.is_empty()));
        Self { identities }
    }

    /// Decode a persisted blob. The format tag is checked before the body so
    /// a newer layout is never half-parsed.
    pub fn load(bytes: &[u8]) -> Result<Self, GalleryError> {
        let header: Header = serde_json::from_slice(bytes)
            .map_err(|e| GalleryError::Corrupt(format!("unreadable header: {e}")))?;
        if header.format_version != GALLERY_FORMAT_VERSION {
            return Err(GalleryError::VersionMismatch {
                found: header.format_version,
            });
        }
        let blob: Blob = serde_json::from_slice(bytes)
            .map_err(|e| GalleryError::Corrupt(e.to_string()))?;
        Self::new(blob.identities)
    }

    /// Encode to the persisted blob. Unchanged galleries encode to identical bytes.
    pub fn save(&self) -> Result<Vec<u8>, GalleryError> {
        Ok(serde_json::to_vec(&BlobRef {
            format_version: GALLERY_FORMAT_VERSION,
            identities: &self.identities,
        })?)
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Total reference vectors across all identities.
    pub fn reference_count(&self) -> usize {
        self.identities.values().map(Vec::len).sum()
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.identities.keys().map(String::as_str)
    }

    pub fn references(&self, identity: &str) -> Option<&[Embedding]> {
        self.identities.get(identity).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Embedding])> {
        self.identities
            .iter()
            .map(|(id, refs)| (id.as_str(), refs.as_slice()))
    }
}
