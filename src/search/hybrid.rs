//! Rank fusion for hybrid search.
//!
//! Merges the vector-similarity ranking and the keyword ranking with
//! Weighted Reciprocal Rank Fusion (RRF). The semantic weight controls the
//! balance: 0.5 is classic RRF, 1.0 is pure vector ranking.

use std::collections::HashMap;

use crate::nid::NoteId;

/// RRF constant (standard value from literature).
/// Higher k reduces the impact of high-ranking items.
const RRF_K: f32 = 60.0;

/// Result from hybrid search with combined score.
#[derive(Debug, Clone)]
pub struct HybridResult {
    pub id: NoteId,
    /// RRF fusion score
    pub score: f32,
    /// Rank from vector search (None if not in vector results)
    pub semantic_rank: Option<usize>,
    /// Rank from keyword search (None if not in keyword results)
    pub lexical_rank: Option<usize>,
}

/// Fuse vector and keyword rankings.
///
/// score(d) = α * 1/(k + rank_vector) + (1-α) * 1/(k + rank_keyword)
///
/// Both input slices are ordered best-first. Returns combined results sorted
/// by fused score (highest first).
pub fn rrf_fusion(
    semantic_ids: &[NoteId],
    lexical_ids: &[NoteId],
    semantic_weight: f32,
) -> Vec<HybridResult> {
    let mut scores: HashMap<NoteId, HybridResult> = HashMap::new();

    let sem_weight = semantic_weight.clamp(0.0, 1.0);
    let lex_weight = 1.0 - sem_weight;

    for (rank, id) in semantic_ids.iter().enumerate() {
        let rrf_score = sem_weight / (RRF_K + rank as f32 + 1.0);
        scores.insert(
            id.clone(),
            HybridResult {
                id: id.clone(),
                score: rrf_score,
                semantic_rank: Some(rank + 1),
                lexical_rank: None,
            },
        );
    }

    for (rank, id) in lexical_ids.iter().enumerate() {
        let rrf_score = lex_weight / (RRF_K + rank as f32 + 1.0);

        scores
            .entry(id.clone())
            .and_modify(|result| {
                result.score += rrf_score;
                result.lexical_rank = Some(rank + 1);
            })
            .or_insert(HybridResult {
                id: id.clone(),
                score: rrf_score,
                semantic_rank: None,
                lexical_rank: Some(rank + 1),
            });
    }

    let mut results: Vec<HybridResult> = scores.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    results
}
