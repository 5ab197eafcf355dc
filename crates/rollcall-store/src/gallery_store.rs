//! The process-wide gallery, persisted as one blob.
//!
//! Readers take an `Arc<Gallery>` snapshot and keep it for as long as a
//! classification runs. Replacement writes the new blob to disk first and
//! only then swaps the snapshot, so a reader sees the old gallery or the new
//! one and never anything in between.

use crate::fsio;
use rollcall_core::{Gallery, GalleryError, TrainOutcome, Trainer, TrainingSample};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("gallery {path}: {source}")]
    Gallery { path: PathBuf, source: GalleryError },
    #[error("gallery I/O on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

pub struct GalleryStore {
    path: PathBuf,
    current: RwLock<Arc<Gallery>>,
    /// Serializes writers so disk and memory always agree on the latest gallery.
    writer: Mutex<()>,
}

impl GalleryStore {
    /// Load the gallery at `path`. A missing file means "not trained yet" and
    /// yields an empty gallery; an unreadable one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let gallery = match read_gallery(&path)? {
            Some(g) => {
                tracing::info!(
                    path = %path.display(),
                    identities = g.len(),
                    references = g.reference_count(),
                    "gallery loaded"
                );
                g
            }
            None => {
                tracing::warn!(path = %path.display(), "no gallery on disk; train first");
                Gallery::default()
            }
        };
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(gallery)),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The gallery as of now. Later replacements do not affect it.
    pub fn snapshot(&self) -> Arc<Gallery> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// Persist `gallery` and make it current.
    pub fn replace(&self, gallery: Gallery) -> Result<Arc<Gallery>, StoreError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let bytes = gallery.save().map_err(|source| StoreError::Gallery {
            path: self.path.clone(),
            source,
        })?;
        fsio::write_atomic(&self.path, &bytes).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        let gallery = Arc::new(gallery);
        self.swap(Arc::clone(&gallery));
        tracing::info!(
            path = %self.path.display(),
            identities = gallery.len(),
            references = gallery.reference_count(),
            "gallery replaced"
        );
        Ok(gallery)
    }

    /// Re-read the blob from disk. On failure the current gallery stays in place.
    pub fn reload(&self) -> Result<Arc<Gallery>, StoreError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let gallery = Arc::new(read_gallery(&self.path)?.unwrap_or_default());
        self.swap(Arc::clone(&gallery));
        tracing::info!(identities = gallery.len(), "gallery reloaded");
        Ok(gallery)
    }

    /// Build a new gallery from `samples` and persist it if anything was
    /// trainable. Otherwise the previous gallery is left untouched.
    pub fn train<I>(&self, trainer: &Trainer, samples: I) -> Result<TrainOutcome, StoreError>
    where
        I: IntoIterator<Item = TrainingSample>,
    {
        let outcome = trainer.build(samples);
        match &outcome {
            TrainOutcome::Trained(report) => {
                self.replace(report.gallery.clone())?;
            }
            TrainOutcome::NoTrainableIdentities(_) => {
                tracing::warn!(path = %self.path.display(), "nothing to train; keeping previous gallery");
            }
        }
        Ok(outcome)
    }

    fn swap(&self, gallery: Arc<Gallery>) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = gallery;
    }
}

fn read_gallery(path: &Path) -> Result<Option<Gallery>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Gallery::load(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Gallery {
            path: path.to_path_buf(),
            source,
        })
}
