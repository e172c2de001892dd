/// HNSW vector index for dense similarity search
use hnsw_rs::prelude::*;
use thiserror::Error;

/// Upper bound on HNSW layers
const MAX_LAYERS: usize = 16;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Search failed: {0}")]
    SearchError(String),
}

/// Search result with ID and similarity score
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Row id in the corpus store
    pub id: u64,
    /// Cosine similarity, higher is more similar
    pub score: f32,
}

/// HNSW build parameters
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Connections per layer (M)
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

/// Immutable cosine HNSW over one corpus's stored embeddings
pub struct VectorIndex {
    index: Hnsw<'static, f32, DistCosine>,
    dimension: usize,
    count: usize,
    ef_search: usize,
}

impl VectorIndex {
    /// Build from `(id, vector)` pairs; every vector must have `dimension` entries
    pub fn build(
        dimension: usize,
        items: &[(u64, Vec<f32>)],
        params: HnswParams,
    ) -> Result<Self, VectorIndexError> {
        if let Some((_, bad)) = items.iter().find(|(_, v)| v.len() != dimension) {
            return Err(VectorIndexError::InvalidDimension {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let index = Hnsw::<f32, DistCosine>::new(
            params.m,
            items.len().max(1),
            MAX_LAYERS,
            params.ef_construction,
            DistCosine,
        );

        for (id, vector) in items {
            index.insert((vector.as_slice(), *id as usize));
        }

        Ok(Self {
            index,
            dimension,
            count: items.len(),
            ef_search: params.ef_search,
        })
    }

    /// k nearest neighbours by cosine similarity, best first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if self.count == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let ef = self.ef_search.max(k);
        let mut results: Vec<SearchResult> = self
            .index
            .search(query, k, ef)
            .into_iter()
            .filter(|neighbour| neighbour.distance.is_finite())
            .map(|neighbour| SearchResult {
                id: neighbour.d_id as u64,
                score: 1.0 - neighbour.distance,
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(results)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HnswParams {
        HnswParams {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
        }
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_build_and_search() {
        let mut near = vec![0.0; 8];
        near[0] = 0.9;
        near[1] = 0.1;

        let index = VectorIndex::build(
            8,
            &[(1, unit(8, 0)), (2, unit(8, 1)), (3, near)],
            params(),
        )
        .unwrap();
        assert_eq!(index.len(), 3);

        let results = index.search(&unit(8, 0), 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 1);
        assert!(results[0].score > 0.99);
        assert_eq!(results[1].id, 3);
    }

    #[test]
    fn test_orthogonal_vectors_score_zero() {
        let index = VectorIndex::build(4, &[(7, unit(4, 2))], params()).unwrap();
        let results = index.search(&unit(4, 0), 5).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].score.abs() < 1e-5);
    }

    #[test]
    fn test_dimension_validation() {
        assert!(VectorIndex::build(4, &[(1, vec![1.0; 3])], params()).is_err());

        let index = VectorIndex::build(4, &[(1, unit(4, 0))], params()).unwrap();
        assert!(index.search(&[1.0; 3], 1).is_err());
    }

    #[test]
    fn test_empty_index() {
        let index = VectorIndex::build(4, &[], params()).unwrap();
        assert!(index.is_empty());
        assert!(index.search(&unit(4, 0), 3).unwrap().is_empty());
    }
}
