//! Nearest-reference classification of probe embeddings.

use crate::gallery::Gallery;
use crate::metric::{self, Metric, VectorError};
use crate::types::{Embedding, FaceProbe, MatchResult, Verdict};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("invalid probe: {0}")]
    InvalidProbe(#[from] VectorError),
}

/// Strategy for classifying a probe embedding against a gallery.
pub trait Matcher {
    /// Classify one probe. `threshold` is exclusive: a best distance equal to
    /// it is reported as unknown.
    fn classify(
        &self,
        probe: &Embedding,
        gallery: &Gallery,
        threshold: f32,
    ) -> Result<Verdict, ClassifyError>;

    /// Classify every face of a frame independently, in input order.
    fn classify_faces(
        &self,
        faces: &[FaceProbe],
        gallery: &Gallery,
        threshold: f32,
    ) -> Vec<Result<MatchResult, ClassifyError>> {
        faces
            .iter()
            .map(|face| {
                self.classify(&face.embedding, gallery, threshold)
                    .map(|verdict| MatchResult {
                        location: face.location,
                        verdict,
                    })
            })
            .collect()
    }
}

/// Brute-force matcher: compares the probe with every reference vector.
///
/// Identities are visited in lexicographic order and references in storage
/// order. Only a strictly smaller distance replaces the current best, so ties
/// go to whichever reference was visited first.
#[derive(Debug, Clone, Copy)]
pub struct LinearMatcher {
    metric: Metric,
    vector_dim: usize,
}

impl LinearMatcher {
    pub fn new(metric: Metric, vector_dim: usize) -> Self {
        Self { metric, vector_dim }
    }

    pub fn vector_dim(&self) -> usize {
        self.vector_dim
    }
}

impl Matcher for LinearMatcher {
    fn classify(
        &self,
        probe: &Embedding,
        gallery: &Gallery,
        threshold: f32,
    ) -> Result<Verdict, ClassifyError> {
        metric::check_vector(&probe.values, self.vector_dim)?;

        let mut best_distance = f32::INFINITY;
        let mut best_identity: Option<&str> = None;
        let mut skipped = 0usize;

        for (identity, references) in gallery.iter() {
            for (index, reference) in references.iter().enumerate() {
                match self.metric.distance(&probe.values, &reference.values) {
                    Ok(distance) => {
                        if distance < best_distance {
                            best_distance = distance;
                            best_identity = Some(identity);
                        }
                    }
                    Err(err) => {
                        skipped += 1;
                        tracing::warn!(
                            identity,
                            index,
                            error = %err,
                            "skipping incomparable reference vector"
                        );
                    }
                }
            }
        }

        tracing::debug!(
            best = ?best_identity,
            distance = best_distance,
            threshold,
            skipped,
            "gallery scan complete"
        );

        Ok(match best_identity {
            Some(identity) if best_distance < threshold => Verdict::Recognized {
                identity: identity.to_string(),
                distance: best_distance,
            },
            _ => Verdict::Unknown {
                distance: best_distance,
            },
        })
    }
}
