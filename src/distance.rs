//! Distance metrics for vector similarity.
//!
//! Every metric produces a [`Similarity`] pair: a score where higher means
//! more similar, and the raw distance the score was derived from.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Distance metric for similarity calculations.
///
/// - **Cosine**: angle between vectors, magnitude-blind. Best for text
///   embeddings.
/// - **Euclidean**: straight-line (L2) distance, magnitude-sensitive.
/// - **DotProduct**: alignment including magnitude; assumes pre-normalised
///   vectors.
/// - **Manhattan**: L1 distance, robust to outliers.
/// - **Hamming**: count of unequal components, for quantised vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine similarity; `score = (a·b)/(‖a‖·‖b‖)`, `distance = 1 − score`.
    #[default]
    Cosine,
    /// Euclidean (L2); `distance = √Σ(aᵢ−bᵢ)²`, `score = 1/(1+distance)`.
    Euclidean,
    /// Dot product; `score = a·b`, `distance = −score`.
    DotProduct,
    /// Manhattan (L1); `distance = Σ|aᵢ−bᵢ|`, `score = 1/(1+distance)`.
    Manhattan,
    /// Hamming; `distance = |{i : aᵢ ≠ bᵢ}|`, `score = 1/(1+distance)`.
    Hamming,
}

/// A scored comparison of two vectors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Similarity {
    /// Similarity score; higher means more similar.
    pub score: f32,
    /// Raw distance; lower means more similar.
    pub distance: f32,
}

impl DistanceMetric {
    /// Compare two vectors under this metric.
    ///
    /// Returns `None` when the vectors have different lengths; callers skip
    /// such candidates rather than erroring.
    pub fn compare(&self, a: &[f32], b: &[f32]) -> Option<Similarity> {
        if a.len() != b.len() {
            return None;
        }
        Some(match self {
            DistanceMetric::Cosine => {
                let (dot, norm_a, norm_b) = dot_and_norms(a, b);
                let denom = (norm_a * norm_b).sqrt();
                let score = if denom == 0.0 { 0.0 } else { dot / denom };
                Similarity {
                    score,
                    distance: 1.0 - score,
                }
            }
            DistanceMetric::DotProduct => {
                let (dot, _, _) = dot_and_norms(a, b);
                Similarity {
                    score: dot,
                    distance: -dot,
                }
            }
            DistanceMetric::Euclidean => {
                let distance = euclidean(a, b);
                Similarity {
                    score: 1.0 / (1.0 + distance),
                    distance,
                }
            }
            DistanceMetric::Manhattan => {
                let distance = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
                Similarity {
                    score: 1.0 / (1.0 + distance),
                    distance,
                }
            }
            DistanceMetric::Hamming => {
                let distance = a.iter().zip(b).filter(|(x, y)| x != y).count() as f32;
                Similarity {
                    score: 1.0 / (1.0 + distance),
                    distance,
                }
            }
        })
    }

    /// True when higher raw values mean more similar (no transform applied).
    pub fn is_similarity_based(&self) -> bool {
        matches!(self, DistanceMetric::Cosine | DistanceMetric::DotProduct)
    }

    /// The canonical metric name.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::DotProduct => "dot_product",
            DistanceMetric::Manhattan => "manhattan",
            DistanceMetric::Hamming => "hamming",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" | "cos" => Ok(DistanceMetric::Cosine),
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "dot" | "dot_product" | "dotproduct" | "inner" => Ok(DistanceMetric::DotProduct),
            "manhattan" | "l1" => Ok(DistanceMetric::Manhattan),
            "hamming" => Ok(DistanceMetric::Hamming),
            _ => Err(format!("unknown distance metric: {s}")),
        }
    }
}

/// Dot product and squared norms in a single pass, unrolled by four.
#[inline]
fn dot_and_norms(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    let mut chunks_a = a.chunks_exact(4);
    let mut chunks_b = b.chunks_exact(4);
    for (ca, cb) in chunks_a.by_ref().zip(chunks_b.by_ref()) {
        dot += ca[0] * cb[0] + ca[1] * cb[1] + ca[2] * cb[2] + ca[3] * cb[3];
        norm_a += ca[0] * ca[0] + ca[1] * ca[1] + ca[2] * ca[2] + ca[3] * ca[3];
        norm_b += cb[0] * cb[0] + cb[1] * cb[1] + cb[2] * cb[2] + cb[3] * cb[3];
    }
    for (x, y) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    (dot, norm_a, norm_b)
}

/// Euclidean distance, unrolled by four.
#[inline]
fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;

    let mut chunks_a = a.chunks_exact(4);
    let mut chunks_b = b.chunks_exact(4);
    for (ca, cb) in chunks_a.by_ref().zip(chunks_b.by_ref()) {
        let d0 = ca[0] - cb[0];
        let d1 = ca[1] - cb[1];
        let d2 = ca[2] - cb[2];
        let d3 = ca[3] - cb[3];
        sum += d0 * d0 + d1 * d1 + d2 * d2 + d3 * d3;
    }
    for (x, y) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        let d = x - y;
        sum += d * d;
    }

    sum.sqrt()
}
