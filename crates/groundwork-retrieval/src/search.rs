use std::cmp::Ordering;

use groundwork_core::{GroundworkError, GroundworkResult};
use serde::{Deserialize, Serialize};

use crate::store::{Chunk, EmbeddingIndex};

/// A ranked, read-only view of one stored chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit<'a> {
    /// Row index of the chunk in the index (its insertion position).
    pub row: usize,
    /// Cosine similarity to the query, in `[-1, 1]`.
    pub similarity: f32,
    /// The stored chunk.
    pub chunk: &'a Chunk,
}

/// An owned search result that outlives the index snapshot it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Cosine similarity to the query.
    pub similarity: f32,
    /// The chunk text.
    pub text: String,
    /// Company tag of the source document.
    pub company: String,
    /// Category tag of the source document.
    pub category: String,
    /// Source document file name.
    pub source_file: String,
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// Row in the index the result was read from.
    pub row: usize,
}

impl From<SearchHit<'_>> for SearchResult {
    fn from(hit: SearchHit<'_>) -> Self {
        Self {
            similarity: hit.similarity,
            text: hit.chunk.text.clone(),
            company: hit.chunk.company.clone(),
            category: hit.chunk.category.clone(),
            source_file: hit.chunk.source_file.clone(),
            chunk_index: hit.chunk.chunk_index,
            row: hit.row,
        }
    }
}

/// Nearest-neighbour search over stored embeddings.
///
/// [`EmbeddingIndex`] implements this with an exact O(N·D) scan, which is fine
/// for corpora of tens of thousands of chunks. An approximate index (HNSW,
/// IVF) can implement the same trait for larger corpora, as long as it keeps
/// the result ordering contract.
pub trait SimilaritySearch {
    /// Return the `k` most similar chunks, ordered by descending similarity
    /// with ties broken by ascending row index. Yields `min(k, len)` hits.
    fn search(&self, query: &[f32], k: usize) -> GroundworkResult<Vec<SearchHit<'_>>>;
}

impl SimilaritySearch for EmbeddingIndex {
    fn search(&self, query: &[f32], k: usize) -> GroundworkResult<Vec<SearchHit<'_>>> {
        let Some(dimension) = self.dimension() else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(GroundworkError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        let mut scored: Vec<(usize, f32)> = self
            .iter()
            .enumerate()
            .map(|(row, chunk)| {
                let similarity = cosine_with_norms(
                    query,
                    query_norm,
                    &chunk.embedding,
                    l2_norm(&chunk.embedding),
                );
                (row, similarity)
            })
            .collect();

        select_top_k(&mut scored, k);

        Ok(scored
            .into_iter()
            .filter_map(|(row, similarity)| {
                self.get(row).map(|chunk| SearchHit {
                    row,
                    similarity,
                    chunk,
                })
            })
            .collect())
    }
}

/// Cosine similarity between two vectors.
///
/// Returns `0.0` when either vector has zero norm, when the lengths differ,
/// or when the result is not finite. Symmetric in its arguments. Sums are
/// accumulated in `f64`, so any finite `f32` components give a finite score.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_with_norms(a, l2_norm(a), b, l2_norm(b))
}

fn cosine_with_norms(a: &[f32], norm_a: f64, b: &[f32], norm_b: f64) -> f32 {
    if a.len() != b.len() || norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    let similarity = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0) as f32;
    // -0.0 would order below +0.0 under total_cmp and break ties by row.
    if similarity.is_finite() && similarity != 0.0 {
        similarity
    } else {
        0.0
    }
}

fn l2_norm(v: &[f32]) -> f64 {
    v.iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt()
}

/// Rank order: higher similarity first, then lower row first.
fn rank_order(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

/// Keep the `k` best `(row, similarity)` pairs, sorted by [`rank_order`].
///
/// `rank_order` is a total order, so the partial selection is deterministic
/// even though it is unstable.
fn select_top_k(scored: &mut Vec<(usize, f32)>, k: usize) {
    let k = k.min(scored.len());
    if k == 0 {
        scored.clear();
        return;
    }
    if k < scored.len() {
        scored.select_nth_unstable_by(k - 1, rank_order);
        scored.truncate(k);
    }
    scored.sort_unstable_by(rank_order);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::tests::make_chunk;

    fn index_of(vectors: &[Vec<f32>]) -> EmbeddingIndex {
        let mut index = EmbeddingIndex::new();
        for (i, v) in vectors.iter().enumerate() {
            index.append(make_chunk(&format!("row {i}"), v.clone())).unwrap();
        }
        index
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![0.3, -1.2, 4.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_norm() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 1.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let pairs = [
            (vec![1.0, 2.0, 3.0], vec![-0.5, 0.25, 8.0]),
            (vec![0.1, 0.0, -0.7], vec![3.0, 3.0, 3.0]),
            (vec![1e-3, 5e2, -7.0], vec![2.0, -1e-2, 0.0]),
        ];
        for (a, b) in &pairs {
            assert_eq!(cosine_similarity(a, b), cosine_similarity(b, a));
        }
    }

    #[test]
    fn test_cosine_similarity_negative_zero_normalized() {
        let s = cosine_similarity(&[-1.0, 0.0], &[0.0, 1.0]);
        assert_eq!(s, 0.0);
        assert!(s.is_sign_positive());
    }

    #[test]
    fn test_reference_ranking_scenario() {
        let index = index_of(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]);
        let hits = index.search(&[1.0, 0.0], 3).unwrap();

        let rows: Vec<usize> = hits.iter().map(|h| h.row).collect();
        assert_eq!(rows, vec![0, 2, 1]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!((hits[1].similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert_eq!(hits[2].similarity, 0.0);
    }

    #[test]
    fn test_result_count_is_min_k_n() {
        let index = index_of(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]);
        for k in 0..6 {
            assert_eq!(index.search(&[1.0, 0.0], k).unwrap().len(), k.min(3));
        }
    }

    #[test]
    fn test_ties_break_by_ascending_row() {
        // Rows 1, 3 and 4 are identical to the query; rows 0 and 2 are orthogonal.
        let index = index_of(&[
            vec![0.0, 1.0],
            vec![2.0, 0.0],
            vec![0.0, 3.0],
            vec![1.0, 0.0],
            vec![5.0, 0.0],
        ]);

        let hits = index.search(&[1.0, 0.0], 5).unwrap();
        let rows: Vec<usize> = hits.iter().map(|h| h.row).collect();
        assert_eq!(rows, vec![1, 3, 4, 0, 2]);

        // Partial selection must keep the earliest tied rows.
        let top2: Vec<usize> = index
            .search(&[1.0, 0.0], 2)
            .unwrap()
            .iter()
            .map(|h| h.row)
            .collect();
        assert_eq!(top2, vec![1, 3]);
    }

    #[test]
    fn test_all_tied_returns_insertion_order() {
        let index = index_of(&vec![vec![1.0, 1.0]; 50]);
        let rows: Vec<usize> = index
            .search(&[1.0, 1.0], 10)
            .unwrap()
            .iter()
            .map(|h| h.row)
            .collect();
        assert_eq!(rows, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_ordering_non_increasing_on_larger_index() {
        let vectors: Vec<Vec<f32>> = (0..200)
            .map(|i| {
                let x = i as f32;
                vec![(x * 0.37).sin(), (x * 1.13).cos(), ((i % 7) as f32) - 3.0]
            })
            .collect();
        let index = index_of(&vectors);
        let hits = index.search(&[0.2, -0.4, 1.0], 25).unwrap();
        assert_eq!(hits.len(), 25);
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
            if pair[0].similarity == pair[1].similarity {
                assert!(pair[0].row < pair[1].row);
            }
        }

        // The partial selection agrees with a full sort.
        let full = index.search(&[0.2, -0.4, 1.0], 200).unwrap();
        assert_eq!(&full[..25], &hits[..]);
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = EmbeddingIndex::new();
        assert!(index.search(&[1.0, 0.0], 3).unwrap().is_empty());
        assert!(index.search(&[], 3).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = index_of(&[vec![1.0, 0.0]]);
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(GroundworkError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_cosine_similarity_large_and_tiny_magnitudes() {
        let large = [1e20f32, 1e20];
        assert!((cosine_similarity(&large, &large) - 1.0).abs() < 1e-6);

        let tiny = [1e-25f32, 1e-25];
        assert!((cosine_similarity(&tiny, &tiny) - 1.0).abs() < 1e-6);

        let extreme = [f32::MAX, f32::MIN_POSITIVE, 7.0];
        assert!((cosine_similarity(&extreme, &extreme) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_large_magnitude_row_ranks_by_direction() {
        let mut index = EmbeddingIndex::new();
        index.append(make_chunk("orth", vec![0.0, 1.0])).unwrap();
        index.append(make_chunk("same", vec![1e20, 0.0])).unwrap();

        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].chunk.text, "same");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].chunk.text, "orth");
        assert_eq!(hits[1].similarity, 0.0);
    }

    #[test]
    fn test_zero_query_scores_everything_zero() {
        let index = index_of(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        let hits = index.search(&[0.0, 0.0], 2).unwrap();
        assert_eq!(hits.iter().map(|h| h.row).collect::<Vec<_>>(), vec![0, 1]);
        assert!(hits.iter().all(|h| h.similarity == 0.0));
    }

    #[test]
    fn test_hit_converts_to_owned_result() {
        let index = index_of(&[vec![1.0, 0.0]]);
        let hit = index.search(&[1.0, 0.0], 1).unwrap()[0];
        let result = SearchResult::from(hit);
        assert_eq!(result.text, "row 0");
        assert_eq!(result.company, "LIC");
        assert_eq!(result.category, "Health Plans");
        assert_eq!(result.source_file, "plan.pdf");
        assert_eq!(result.row, 0);
    }
}
