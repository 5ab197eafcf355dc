use crate::matcher::LinearMatcher;
use crate::metric::Metric;
use crate::trainer::Trainer;
use serde::{Deserialize, Serialize};

/// Default acceptance threshold in cosine-distance units (VGG-Face calibration).
pub const DEFAULT_THRESHOLD: f32 = 0.40;

/// Default embedding width (VGG-Face descriptor).
pub const DEFAULT_VECTOR_DIM: usize = 2622;

/// Model-dependent matching parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum distance (exclusive) at which a probe is accepted.
    pub threshold: f32,
    /// Length every probe and reference must have.
    pub vector_dim: usize,
    pub metric: Metric,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            vector_dim: DEFAULT_VECTOR_DIM,
            metric: Metric::Cosine,
        }
    }
}

impl EngineConfig {
    pub fn matcher(&self) -> LinearMatcher {
        LinearMatcher::new(self.metric, self.vector_dim)
    }

    pub fn trainer(&self) -> Trainer {
        Trainer::new(self.vector_dim)
    }
}
