use crate::metric::{self, VectorError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pixel rectangle of a detected face, in `face_recognition` order.
///
/// Always satisfies `top < bottom` and `left < right`; deserialization
/// rejects boxes that do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBoundingBox")]
pub struct BoundingBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

#[derive(Deserialize)]
struct RawBoundingBox {
    top: i32,
    right: i32,
    bottom: i32,
    left: i32,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("bounding box must satisfy top < bottom and left < right")]
pub struct InvalidBoundingBox;

impl TryFrom<RawBoundingBox> for BoundingBox {
    type Error = InvalidBoundingBox;

    fn try_from(raw: RawBoundingBox) -> Result<Self, Self::Error> {
        BoundingBox::new(raw.top, raw.right, raw.bottom, raw.left).ok_or(InvalidBoundingBox)
    }
}

impl BoundingBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Option<Self> {
        (top < bottom && left < right).then_some(Self {
            top,
            right,
            bottom,
            left,
        })
    }

    /// Build from a detector's `(x, y, width, height)` rectangle.
    pub fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Option<Self> {
        Self::new(y, x.checked_add(width)?, y.checked_add(height)?, x)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Face embedding vector produced by an external model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine distance in [0, 2]. Lower = more similar.
    pub fn distance(&self, other: &Embedding) -> Result<f32, VectorError> {
        metric::cosine_distance(&self.values, &other.values)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// One detected face: where it is, and what the embedding model made of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceProbe {
    pub location: BoundingBox,
    pub embedding: Embedding,
}

/// Outcome of classifying one probe against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Recognized { identity: String, distance: f32 },
    /// `distance` is `+inf` when nothing in the gallery was comparable.
    Unknown { distance: f32 },
}

impl Verdict {
    pub fn distance(&self) -> f32 {
        match self {
            Verdict::Recognized { distance, .. } | Verdict::Unknown { distance } => *distance,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            Verdict::Recognized { identity, .. } => Some(identity),
            Verdict::Unknown { .. } => None,
        }
    }

    /// `1 - distance` for a recognized face. Informational only.
    pub fn confidence(&self) -> Option<f32> {
        match self {
            Verdict::Recognized { distance, .. } => Some(1.0 - distance),
            Verdict::Unknown { .. } => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, Verdict::Recognized { .. })
    }
}

/// A verdict annotated with the face it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub location: BoundingBox,
    pub verdict: Verdict,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_ordering() {
        assert!(BoundingBox::new(10, 50, 60, 20).is_some());
        assert!(BoundingBox::new(60, 50, 10, 20).is_none());
        assert!(BoundingBox::new(10, 20, 60, 20).is_none());
    }

    #[test]
    fn test_bounding_box_from_xywh() {
        let b = BoundingBox::from_xywh(20, 10, 30, 50).unwrap();
        assert_eq!(b, BoundingBox { top: 10, right: 50, bottom: 60, left: 20 });
        assert_eq!(b.width(), 30);
        assert_eq!(b.height(), 50);
        assert!(BoundingBox::from_xywh(0, 0, 0, 10).is_none());
        assert!(BoundingBox::from_xywh(i32::MAX, 0, 1, 1).is_none());
    }

    #[test]
    fn test_bounding_box_deserialize_rejects_inverted() {
        let ok: BoundingBox =
            serde_json::from_str(r#"{"top":1,"right":9,"bottom":5,"left":2}"#).unwrap();
        assert_eq!(ok.height(), 4);
        let bad = serde_json::from_str::<BoundingBox>(r#"{"top":5,"right":9,"bottom":1,"left":2}"#);
        let err = bad.unwrap_err().to_string();
        assert!(err.contains("top < bottom and left < right"), "{err}");
    }

    #[test]
    fn test_invalid_bounding_box_is_an_error() {
        let err: Box<dyn std::error::Error> = Box::new(InvalidBoundingBox);
        assert_eq!(
            err.to_string(),
            "bounding box must satisfy top < bottom and left < right"
        );
    }

    #[test]
    fn test_embedding_is_a_plain_array() {
        let e: Embedding = serde_json::from_str("[0.5, -1.0, 2.0]").unwrap();
        assert_eq!(e.dim(), 3);
        assert_eq!(serde_json::to_string(&e).unwrap(), "[0.5,-1.0,2.0]");
    }

    #[test]
    fn test_verdict_accessors() {
        let hit = Verdict::Recognized { identity: "alice".into(), distance: 0.25 };
        assert_eq!(hit.identity(), Some("alice"));
        assert_eq!(hit.confidence(), Some(0.75));
        assert!(hit.is_recognized());

        let miss = Verdict::Unknown { distance: 0.9 };
        assert_eq!(miss.identity(), None);
        assert_eq!(miss.confidence(), None);
        assert_eq!(miss.distance(), 0.9);
    }

    #[test]
    fn test_verdict_json_shape() {
        let hit = Verdict::Recognized { identity: "bob".into(), distance: 0.5 };
        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["kind"], "recognized");
        assert_eq!(json["identity"], "bob");
    }
}
