//! Builds a fresh [`Gallery`] from labelled embedding samples.

use crate::gallery::Gallery;
use crate::metric::{self, VectorError};
use crate::types::Embedding;
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a sample could not contribute a reference vector.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleError {
    /// The embedding model (or whatever fed it) failed for this sample.
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error(transparent)]
    Vector(#[from] VectorError),
}

/// One labelled training input. Upstream failures travel as `Err`.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub identity: String,
    pub embedding: Result<Embedding, SampleError>,
}

impl TrainingSample {
    pub fn encoded(identity: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            identity: identity.into(),
            embedding: Ok(embedding),
        }
    }

    pub fn failed(identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            embedding: Err(SampleError::Encode(reason.into())),
        }
    }
}

/// What a training run produced and what it had to leave out.
#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    pub gallery: Gallery,
    /// Accepted reference vectors per identity.
    pub encoded: BTreeMap<String, usize>,
    /// Rejected samples per identity (including identities that kept some).
    pub rejected: BTreeMap<String, usize>,
    /// Identities that ended up with no usable sample, sorted.
    pub skipped_identities: Vec<String>,
}

impl TrainingReport {
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

/// Result of [`Trainer::build`]. Producing zero identities is an outcome,
/// not an error, so callers can tell it apart from a failed run.
#[derive(Debug, Clone)]
pub enum TrainOutcome {
    Trained(TrainingReport),
    NoTrainableIdentities(TrainingReport),
}

impl TrainOutcome {
    pub fn report(&self) -> &TrainingReport {
        match self {
            TrainOutcome::Trained(r) | TrainOutcome::NoTrainableIdentities(r) => r,
        }
    }

    pub fn into_report(self) -> TrainingReport {
        match self {
            TrainOutcome::Trained(r) | TrainOutcome::NoTrainableIdentities(r) => r,
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, TrainOutcome::Trained(_))
    }
}

/// Groups samples by identity into a new gallery.
#[derive(Debug, Clone, Copy)]
pub struct Trainer {
    vector_dim: usize,
}

impl Trainer {
    pub fn new(vector_dim: usize) -> Self {
        Self { vector_dim }
    }

    /// Build a gallery from `samples`, in order. Each identity keeps its
    /// accepted vectors in input order; identities with none are skipped.
    pub fn build<I>(&self, samples: I) -> TrainOutcome
    where
        I: IntoIterator<Item = TrainingSample>,
    {
        let mut grouped: BTreeMap<String, Vec<Embedding>> = BTreeMap::new();
        let mut rejected: BTreeMap<String, usize> = BTreeMap::new();
        let mut seen: Vec<String> = Vec::new();

        for sample in samples {
            if sample.identity.is_empty() {
                tracing::warn!("dropping sample with empty identity");
                continue;
            }
            if !seen.contains(&sample.identity) {
                seen.push(sample.identity.clone());
            }

            let accepted = sample.embedding.and_then(|e| {
                metric::check_vector(&e.values, self.vector_dim)?;
                Ok(e)
            });

            match accepted {
                Ok(embedding) => grouped
                    .entry(sample.identity)
                    .or_default()
                    .push(embedding),
                Err(err) => {
                    tracing::warn!(identity = %sample.identity, error = %err, "sample rejected");
                    *rejected.entry(sample.identity).or_default() += 1;
                }
            }
        }

        let mut skipped_identities: Vec<String> = seen
            .into_iter()
            .filter(|id| !grouped.contains_key(id))
            .collect();
        skipped_identities.sort();
        for identity in &skipped_identities {
            tracing::warn!(%identity, "no usable samples; identity skipped");
        }

        let encoded: BTreeMap<String, usize> = grouped
            .iter()
            .map(|(id, refs)| (id.clone(), refs.len()))
            .collect();
        for (identity, count) in &encoded {
            tracing::info!(%identity, count, "identity encoded");
        }

        // Empty identities are dropped above and every group holds at least one vector.
        let gallery = Gallery::from_validated(grouped);

        let report = TrainingReport {
            gallery,
            encoded,
            rejected,
            skipped_identities,
        };

        if report.gallery.is_empty() {
            tracing::warn!(
                rejected = report.rejected_total(),
                "no trainable identities"
            );
            TrainOutcome::NoTrainableIdentities(report)
        } else {
            tracing::info!(
                identities = report.gallery.len(),
                references = report.gallery.reference_count(),
                rejected = report.rejected_total(),
                "gallery built"
            );
            TrainOutcome::Trained(report)
        }
    }
}
