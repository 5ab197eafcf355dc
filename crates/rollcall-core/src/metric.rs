//! Distance primitives over fixed-length embedding vectors.
//!
//! All sums run left to right in `f64`, so the same pair of vectors always
//! yields the same bits. Fixture-based tests depend on this.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VectorError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("degenerate vector: norm is zero or not finite")]
    DegenerateVector,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown distance metric: {0:?} (supported: \"cosine\")")]
pub struct UnknownMetric(pub String);

/// Distance metric used to compare a probe with reference vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
}

impl Metric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
        match self {
            Metric::Cosine => cosine_distance(a, b),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            _ => Err(UnknownMetric(s.to_string())),
        }
    }
}

/// Cosine distance `1 - (a·b) / (‖a‖·‖b‖)`, clamped to `[0, 2]`.
///
/// Fails with [`VectorError::DimensionMismatch`] when the lengths differ and
/// with [`VectorError::DegenerateVector`] when either vector has no direction.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if !is_usable_norm(norm_a) || !is_usable_norm(norm_b) {
        return Err(VectorError::DegenerateVector);
    }

    // sqrt of the product (not product of sqrts) keeps distance(a, a) at exactly 0.
    let similarity = dot / (norm_a * norm_b).sqrt();
    Ok((1.0 - similarity).clamp(0.0, 2.0) as f32)
}

/// Check that `values` has the configured dimension and a usable direction.
pub fn check_vector(values: &[f32], vector_dim: usize) -> Result<(), VectorError> {
    if values.len() != vector_dim {
        return Err(VectorError::DimensionMismatch {
            expected: vector_dim,
            got: values.len(),
        });
    }
    let norm_sq: f64 = values.iter().map(|&v| f64::from(v) * f64::from(v)).sum();
    if !is_usable_norm(norm_sq) {
        return Err(VectorError::DegenerateVector);
    }
    Ok(())
}

fn is_usable_norm(norm_sq: f64) -> bool {
    norm_sq > 0.0 && norm_sq.is_finite()
}
