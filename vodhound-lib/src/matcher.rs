//! Exact cosine matching over the in-memory embedding matrix.

use crate::error::{HuntError, Result};
use crate::types::EmbeddingMatrix;

/// Top-K nearest-neighbor scores and fingerprint ids per query row.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub scores: Vec<Vec<f32>>,
    pub neighbor_ids: Vec<Vec<i64>>,
}

pub struct VectorMatcher {
    top_k: usize,
}

impl VectorMatcher {
    pub fn new(top_k: usize) -> Self {
        Self { top_k }
    }

    /// Score every query row against the full database matrix and keep the
    /// top-K ids per row. Both sides are L2-normalized, so the dot product
    /// is cosine similarity.
    pub fn top_matches(
        &self,
        query: &EmbeddingMatrix,
        db_vectors: &EmbeddingMatrix,
        db_ids: &[i64],
    ) -> Result<MatchResult> {
        if query.is_empty() || db_vectors.is_empty() || db_ids.is_empty() {
            return Ok(MatchResult::default());
        }
        if db_vectors.rows() != db_ids.len() {
            return Err(HuntError::VectorIndex(
                "vector and fingerprint id arrays are misaligned".into(),
            ));
        }
        if query.dim() != db_vectors.dim() {
            return Err(HuntError::VectorIndex(format!(
                "query dimension {} does not match index dimension {}",
                query.dim(),
                db_vectors.dim()
            )));
        }

        let k = self.top_k.min(db_vectors.rows());
        if k == 0 {
            return Ok(MatchResult::default());
        }

        let db_norms: Vec<f32> = (0..db_vectors.rows())
            .map(|i| l2_norm(db_vectors.row(i)))
            .collect();

        let mut scores = Vec::with_capacity(query.rows());
        let mut neighbor_ids = Vec::with_capacity(query.rows());

        for qi in 0..query.rows() {
            let q_row = query.row(qi);
            let q_norm = l2_norm(q_row);

            let mut row_scores: Vec<(f32, usize)> = (0..db_vectors.rows())
                .map(|di| {
                    let sim = dot(q_row, db_vectors.row(di)) / (q_norm * db_norms[di]);
                    (sim, di)
                })
                .collect();
            row_scores.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            row_scores.truncate(k);

            scores.push(row_scores.iter().map(|(s, _)| *s).collect());
            neighbor_ids.push(row_scores.iter().map(|(_, i)| db_ids[*i]).collect());
        }

        Ok(MatchResult {
            scores,
            neighbor_ids,
        })
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// The epsilon keeps all-zero rows finite.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt() + 1e-10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[Vec<f32>]) -> EmbeddingMatrix {
        EmbeddingMatrix::from_rows(rows).unwrap()
    }

    #[test]
    fn nearest_neighbor_wins_regardless_of_magnitude() {
        let matcher = VectorMatcher::new(2);
        // Same direction as the query but scaled; cosine must ignore scale.
        let db = matrix(&[
            vec![10.0, 0.0],
            vec![0.0, 1.0],
            vec![0.7, 0.7],
        ]);
        let query = matrix(&[vec![1.0, 0.0]]);

        let result = matcher.top_matches(&query, &db, &[101, 102, 103]).unwrap();
        assert_eq!(result.neighbor_ids.len(), 1);
        assert_eq!(result.neighbor_ids[0][0], 101);
        assert!((result.scores[0][0] - 1.0).abs() < 1e-5);
        assert_eq!(result.neighbor_ids[0][1], 103);
    }

    #[test]
    fn k_is_clamped_to_index_size() {
        let matcher = VectorMatcher::new(10);
        let db = matrix(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        let query = matrix(&[vec![1.0, 1.0]]);

        let result = matcher.top_matches(&query, &db, &[1, 2]).unwrap();
        assert_eq!(result.neighbor_ids[0].len(), 2);
    }

    #[test]
    fn empty_sides_produce_empty_results() {
        let matcher = VectorMatcher::new(5);
        let empty = EmbeddingMatrix::default();
        let db = matrix(&[vec![1.0]]);

        let result = matcher.top_matches(&empty, &db, &[1]).unwrap();
        assert!(result.neighbor_ids.is_empty());

        let query = matrix(&[vec![1.0]]);
        let result = matcher.top_matches(&query, &empty, &[]).unwrap();
        assert!(result.neighbor_ids.is_empty());
    }

    #[test]
    fn misaligned_ids_are_an_error() {
        let matcher = VectorMatcher::new(5);
        let db = matrix(&[vec![1.0], vec![2.0]]);
        let query = matrix(&[vec![1.0]]);
        assert!(matcher.top_matches(&query, &db, &[1]).is_err());
    }

    #[test]
    fn zero_vector_does_not_produce_nan() {
        let matcher = VectorMatcher::new(1);
        let db = matrix(&[vec![0.0, 0.0]]);
        let query = matrix(&[vec![1.0, 0.0]]);
        let result = matcher.top_matches(&query, &db, &[7]).unwrap();
        assert!(result.scores[0][0].is_finite());
    }
}
