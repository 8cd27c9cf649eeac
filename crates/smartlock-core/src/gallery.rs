//! Enrolled gallery: named face signatures loaded once per session.

use crate::types::Signature;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const GALLERY_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("gallery data is corrupt: {0}")]
    CorruptData(String),
}

/// One enrolled identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub name: String,
    pub signature: Signature,
}

/// On-disk layout of the gallery file.
#[derive(Serialize, Deserialize)]
struct GalleryFile {
    version: u32,
    faces: Vec<GalleryEntry>,
}

/// Ordered, name-unique set of enrolled signatures.
///
/// Enumeration order is the order in which each name first appeared. A
/// repeated name replaces the earlier signature without moving it, so the
/// first-match policy sees the same ordering the enrollment tool produced.
#[derive(Debug, Clone, Default)]
pub struct SignatureStore {
    entries: Vec<GalleryEntry>,
}

impl SignatureStore {
    /// Build a store from `(name, signature)` pairs.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, GalleryError>
    where
        I: IntoIterator<Item = (S, Signature)>,
        S: Into<String>,
    {
        let mut store = Self::default();
        for (name, signature) in entries {
            store.insert(GalleryEntry {
                name: name.into(),
                signature,
            })?;
        }
        Ok(store)
    }

    /// Load the gallery file at `path`.
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let raw = std::fs::read(path).map_err(|source| GalleryError::StorageUnavailable {
            path: path.to_path_buf(),
            source,
        })?;

        let file: GalleryFile = serde_json::from_slice(&raw)
            .map_err(|e| GalleryError::CorruptData(format!("{}: {e}", path.display())))?;

        if file.version != GALLERY_VERSION {
            return Err(GalleryError::CorruptData(format!(
                "unsupported gallery version {} (expected {GALLERY_VERSION})",
                file.version
            )));
        }

        let mut store = Self::default();
        for entry in file.faces {
            store.insert(entry)?;
        }

        tracing::info!(
            path = %path.display(),
            count = store.len(),
            names = ?store.names().collect::<Vec<_>>(),
            "loaded gallery"
        );

        Ok(store)
    }

    fn insert(&mut self, entry: GalleryEntry) -> Result<(), GalleryError> {
        if entry.name.trim().is_empty() {
            return Err(GalleryError::CorruptData("entry with empty name".into()));
        }
        if let Some(dim) = self.dimension() {
            if entry.signature.dimension() != dim {
                return Err(GalleryError::CorruptData(format!(
                    "signature for {:?} has {} components, gallery uses {dim}",
                    entry.name,
                    entry.signature.dimension()
                )));
            }
        }

        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => {
                tracing::warn!(name = %entry.name, "duplicate gallery name; later signature wins");
                existing.signature = entry.signature;
            }
            None => self.entries.push(entry),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = &GalleryEntry> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Signature> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.signature)
    }

    /// Signature dimension shared by every entry, `None` when empty.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.signature.dimension())
    }
}
