//! FaceMatcher types

use serde::{Deserialize, Serialize};

/// Label used by recognizers for faces with no enrolled match
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// `true` for the unknown sentinel (any ASCII case)
pub fn is_unknown(identity: &str) -> bool {
    identity.eq_ignore_ascii_case(UNKNOWN_IDENTITY)
}

/// Face bounding box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

/// One recognized (or unknown) face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub bbox: BoundingBox,
    pub identity: String,
    /// Similarity, higher means more confident
    pub score: f32,
}

impl FaceMatch {
    pub fn is_known(&self) -> bool {
        !self.identity.is_empty() && !is_unknown(&self.identity)
    }
}

/// Face entry as returned by the recognition service
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RecognizedFace {
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
    pub label: String,
    pub score: f32,
}

impl From<RecognizedFace> for FaceMatch {
    fn from(face: RecognizedFace) -> Self {
        Self {
            bbox: BoundingBox::from(face.bbox),
            identity: face.label,
            score: face.score,
        }
    }
}

/// Recognition service response
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RecognizeResponse {
    #[serde(default)]
    pub faces: Vec<RecognizedFace>,
}
