//! rollcall-core: Face embedding matching engine.
//!
//! Classifies probe embeddings against a gallery of known identities by
//! brute-force cosine distance, and builds galleries from labelled samples.
//! Detection and embedding extraction happen outside this crate.

pub mod config;
pub mod gallery;
pub mod matcher;
pub mod metric;
pub mod trainer;
pub mod types;

pub use config::EngineConfig;
pub use gallery::{Gallery, GalleryError};
pub use matcher::{ClassifyError, LinearMatcher, Matcher};
pub use metric::{Metric, VectorError};
pub use trainer::{SampleError, TrainOutcome, Trainer, TrainingReport, TrainingSample};
pub use types::{BoundingBox, Embedding, FaceProbe, MatchResult, Verdict};
