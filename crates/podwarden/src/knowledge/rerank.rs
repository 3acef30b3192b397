//! Weighted fusion of ranked lists.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::store::SearchHit;

struct Fused {
    id: String,
    text: String,
    score: f32,
    best_rank: usize,
}

/// Fuse ranked lists with fixed weights.
///
/// A document's score is the sum of `weight * raw_score` over the lists it
/// appears in; scores are not normalized. Ties are broken by the best rank
/// the document held in any input list, then by id. At most `top_k` hits
/// are returned.
#[must_use]
pub fn weighted_rerank(lists: &[(f32, &[SearchHit])], top_k: usize) -> Vec<SearchHit> {
    let mut fused: Vec<Fused> = Vec::new();
    let mut position: HashMap<&str, usize> = HashMap::new();

    for (weight, hits) in lists {
        for (rank, hit) in hits.iter().enumerate() {
            let contribution = weight * hit.score;
            if let Some(&idx) = position.get(hit.id.as_str()) {
                let entry = &mut fused[idx];
                entry.score += contribution;
                entry.best_rank = entry.best_rank.min(rank);
            } else {
                position.insert(hit.id.as_str(), fused.len());
                fused.push(Fused {
                    id: hit.id.clone(),
                    text: hit.text.clone(),
                    score: contribution,
                    best_rank: rank,
                });
            }
        }
    }

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.id.cmp(&b.id))
    });
    fused.truncate(top_k);

    fused
        .into_iter()
        .map(|f| SearchHit {
            id: f.id,
            text: f.text,
            score: f.score,
        })
        .collect()
}
