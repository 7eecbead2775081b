//! Distance metrics and the match decision.
//!
//! All arithmetic is `f64`. A match is `distance <= threshold`; smaller
//! distances mean more similar faces under every metric.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("embedding length mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("embedding has zero norm or is out of range")]
    DegenerateEmbedding,
}

/// Distance metric used to compare two embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`, in [0, 2].
    #[serde(rename = "cosine")]
    Cosine,
    /// Plain Euclidean distance on the raw vectors.
    #[serde(rename = "euclidean")]
    Euclidean,
    /// Euclidean distance between the L2-normalised vectors, in [0, 2].
    #[serde(rename = "euclidean_l2")]
    EuclideanL2,
}

impl DistanceMetric {
    pub const ALL: [DistanceMetric; 3] = [
        DistanceMetric::Cosine,
        DistanceMetric::Euclidean,
        DistanceMetric::EuclideanL2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown distance metric {s:?} (expected cosine, euclidean or euclidean_l2)"))
    }
}

/// Outcome of comparing a probe embedding against a reference.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub matched: bool,
    pub distance: f64,
    pub threshold: f64,
    pub metric: DistanceMetric,
}

/// Compute the distance between two embeddings under `metric`.
///
/// Vectors are rescaled by their largest component before any products are
/// summed, so finite inputs of any magnitude neither overflow nor underflow.
/// A distance that still comes out non-finite is an error, never a value.
/// Always walks every dimension; there is no early exit on partial sums.
pub fn distance(a: &Embedding, b: &Embedding, metric: DistanceMetric) -> Result<f64, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let (a, b) = (a.values(), b.values());
    let (max_a, max_b) = (max_abs(a), max_abs(b));

    let d = match metric {
        DistanceMetric::Euclidean => {
            let scale = max_a.max(max_b);
            if scale == 0.0 {
                return Ok(0.0);
            }
            let mut sq_diff = 0.0f64;
            for (x, y) in a.iter().zip(b) {
                let diff = x / scale - y / scale;
                sq_diff += diff * diff;
            }
            sq_diff.sqrt() * scale
        }
        DistanceMetric::Cosine | DistanceMetric::EuclideanL2 => {
            if max_a == 0.0 || max_b == 0.0 {
                return Err(SimilarityError::DegenerateEmbedding);
            }
            let mut dot = 0.0f64;
            let mut norm_a = 0.0f64;
            let mut norm_b = 0.0f64;
            for (x, y) in a.iter().zip(b) {
                let (x, y) = (x / max_a, y / max_b);
                dot += x * y;
                norm_a += x * x;
                norm_b += y * y;
            }
            // Both norms are at least 1 after rescaling.
            let cos = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
            if metric == DistanceMetric::Cosine {
                1.0 - cos
            } else {
                // |a^ - b^|^2 = 2 - 2cos
                (2.0 - 2.0 * cos).max(0.0).sqrt()
            }
        }
    };

    if d.is_finite() {
        Ok(d)
    } else {
        Err(SimilarityError::DegenerateEmbedding)
    }
}

fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0f64, |m, v| m.max(v.abs()))
}

/// The match decision: at or below the threshold is the same identity.
pub fn is_match(distance: f64, threshold: f64) -> bool {
    distance <= threshold
}

/// Compare `probe` against `reference` and apply `threshold`.
pub fn verify(
    probe: &Embedding,
    reference: &Embedding,
    metric: DistanceMetric,
    threshold: f64,
) -> Result<VerificationResult, SimilarityError> {
    let distance = distance(probe, reference, metric)?;
    Ok(VerificationResult {
        matched: is_match(distance, threshold),
        distance,
        threshold,
        metric,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f64]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_cosine_identical_is_zero() {
        let a = emb(&[0.3, -1.2, 4.5, 0.01]);
        assert!(distance(&a, &a, DistanceMetric::Cosine).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        let c = emb(&[-1.0, 0.0]);
        assert!((distance(&a, &b, DistanceMetric::Cosine).unwrap() - 1.0).abs() < 1e-12);
        assert!((distance(&a, &c, DistanceMetric::Cosine).unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_scale_invariant() {
        let a = emb(&[1.0, 2.0, 3.0]);
        let b = emb(&[10.0, 20.0, 30.0]);
        assert!(distance(&a, &b, DistanceMetric::Cosine).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_distance_symmetric() {
        let a = emb(&[0.2, 0.7, -0.1, 3.0]);
        let b = emb(&[1.5, -0.4, 0.9, 0.3]);
        for metric in DistanceMetric::ALL {
            let ab = distance(&a, &b, metric).unwrap();
            let ba = distance(&b, &a, metric).unwrap();
            assert_eq!(ab, ba, "{metric} not symmetric");
        }
    }

    #[test]
    fn test_euclidean() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[3.0, 4.0]);
        assert!((distance(&a, &b, DistanceMetric::Euclidean).unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_euclidean_l2_matches_normalised_vectors() {
        let a = emb(&[2.0, 0.0]);
        let b = emb(&[0.0, 5.0]);
        let d = distance(&a, &b, DistanceMetric::EuclideanL2).unwrap();
        assert!((d - 2f64.sqrt()).abs() < 1e-12);
        assert!(distance(&a, &a, DistanceMetric::EuclideanL2).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let a = emb(&[1.0, 2.0]);
        let b = emb(&[1.0, 2.0, 3.0]);
        for metric in DistanceMetric::ALL {
            assert_eq!(
                distance(&a, &b, metric),
                Err(SimilarityError::DimensionMismatch { left: 2, right: 3 })
            );
        }
    }

    #[test]
    fn test_zero_norm_is_degenerate() {
        let zero = emb(&[0.0, 0.0, 0.0]);
        let a = emb(&[1.0, 0.0, 0.0]);
        assert_eq!(
            distance(&zero, &a, DistanceMetric::Cosine),
            Err(SimilarityError::DegenerateEmbedding)
        );
        assert_eq!(
            distance(&a, &zero, DistanceMetric::EuclideanL2),
            Err(SimilarityError::DegenerateEmbedding)
        );
        // Euclidean never divides by the norm.
        assert!((distance(&zero, &a, DistanceMetric::Euclidean).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_huge_scaled_copy_is_identical() {
        let a = emb(&[0.3, -1.2, 4.5, 0.01]);
        let huge = emb(&a.values().iter().map(|v| v * 1e200).collect::<Vec<_>>());
        assert!(distance(&a, &huge, DistanceMetric::Cosine).unwrap().abs() < 1e-12);
        assert!(distance(&a, &huge, DistanceMetric::EuclideanL2).unwrap().abs() < 1e-6);
        assert!(verify(&a, &huge, DistanceMetric::Cosine, 0.4).unwrap().matched);
    }

    #[test]
    fn test_extreme_magnitudes_against_self() {
        let huge = emb(&[1e300, -2e300, 3e300]);
        let tiny = emb(&[1e-170, -2e-170, 3e-170]);
        for metric in DistanceMetric::ALL {
            let d = distance(&huge, &huge, metric).unwrap();
            assert!(d.is_finite() && d.abs() < 1e-6, "{metric}: {d}");
            let d = distance(&tiny, &tiny, metric).unwrap();
            assert!(d.is_finite() && d.abs() < 1e-6, "{metric}: {d}");
        }
    }

    #[test]
    fn test_tiny_vector_is_not_degenerate() {
        let tiny = emb(&[1e-170, 0.0, 0.0]);
        let a = emb(&[1.0, 0.0, 0.0]);
        assert!(distance(&tiny, &a, DistanceMetric::Cosine).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_euclidean_overflow_is_an_error() {
        let a = emb(&[1e308, -1e308]);
        let b = emb(&[-1e308, 1e308]);
        assert_eq!(
            distance(&a, &b, DistanceMetric::Euclidean),
            Err(SimilarityError::DegenerateEmbedding)
        );
        let huge = emb(&[1e300, 1e300]);
        let d = distance(&huge, &emb(&[0.0, 0.0]), DistanceMetric::Euclidean).unwrap();
        assert!((d / 1e300 - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_is_match_boundary_inclusive() {
        assert!(is_match(0.4, 0.4));
        assert!(is_match(0.0, 0.4));
        assert!(!is_match(0.400001, 0.4));
    }

    #[test]
    fn test_verify_threshold_decision() {
        let probe = emb(&[1.0, 0.1, 0.0]);
        let same = emb(&[0.9, 0.12, 0.01]);
        let other = emb(&[0.0, 0.2, 1.0]);

        let hit = verify(&probe, &same, DistanceMetric::Cosine, 0.3).unwrap();
        assert!(hit.matched);
        assert_eq!(hit.metric, DistanceMetric::Cosine);
        assert_eq!(hit.threshold, 0.3);

        let miss = verify(&probe, &other, DistanceMetric::Cosine, 0.3).unwrap();
        assert!(!miss.matched);
        assert!(miss.distance > 0.3);
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("cosine".parse::<DistanceMetric>(), Ok(DistanceMetric::Cosine));
        assert_eq!(" Euclidean_L2 ".parse::<DistanceMetric>(), Ok(DistanceMetric::EuclideanL2));
        assert!("manhattan".parse::<DistanceMetric>().is_err());
        assert_eq!(DistanceMetric::EuclideanL2.to_string(), "euclidean_l2");
    }
}
