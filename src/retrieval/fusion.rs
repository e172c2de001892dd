//! Weighted Reciprocal Rank Fusion for combining lexical and dense rankings

use ahash::AHashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must be positive")]
    InvalidWeights,

    #[error("Invalid RRF constant: {0}")]
    InvalidRankConstant(f32),
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f32,

    /// Weight for dense results
    pub semantic_weight: f32,

    /// Weight for lexical results
    pub keyword_weight: f32,
}

impl FusionConfig {
    pub fn new(rrf_k: f32, semantic_weight: f32, keyword_weight: f32) -> Result<Self, FusionError> {
        if semantic_weight <= 0.0 || keyword_weight <= 0.0 {
            return Err(FusionError::InvalidWeights);
        }
        if rrf_k.is_nan() || rrf_k < 0.0 {
            return Err(FusionError::InvalidRankConstant(rrf_k));
        }

        Ok(Self {
            rrf_k,
            semantic_weight,
            keyword_weight,
        })
    }
}

/// Apply weighted Reciprocal Rank Fusion to two ranked id lists
///
/// score(id) = sum over rankings of weight / (k + rank), rank starting at 1.
/// Ties keep first-appearance order, lexical list first.
pub fn reciprocal_rank_fusion(
    semantic_results: &[i64],
    keyword_results: &[i64],
    config: &FusionConfig,
) -> Vec<(i64, f32)> {
    let mut positions: AHashMap<i64, usize> = AHashMap::new();
    let mut fused: Vec<(i64, f32)> = Vec::new();

    let rankings = [
        (keyword_results, config.keyword_weight),
        (semantic_results, config.semantic_weight),
    ];

    for (ranking, weight) in rankings {
        for (rank, id) in ranking.iter().enumerate() {
            let rrf_score = weight / (config.rrf_k + rank as f32 + 1.0);
            match positions.get(id) {
                Some(&pos) => fused[pos].1 += rrf_score,
                None => {
                    positions.insert(*id, fused.len());
                    fused.push((*id, rrf_score));
                }
            }
        }
    }

    // Stable sort keeps first-appearance order among equal scores
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}
