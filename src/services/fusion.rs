//! Reciprocal Rank Fusion over independently ranked candidate lists.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::models::{PointId, ScoredRecord};

struct FusionState {
    score: f64,
    best_rank: usize,
    payload: serde_json::Map<String, serde_json::Value>,
}

/// Fuse ranked lists with RRF: `score(c) = Σ 1 / (k + rank)`, ranks 1-based.
///
/// A repeated id within one list keeps its first position and does not use
/// up a rank. Candidates missing from a list contribute nothing for it. The
/// output is sorted by fused score, then by best single-list rank, then by id,
/// and contains every candidate that appears in at least one list.
pub fn reciprocal_rank_fusion(lists: &[Vec<ScoredRecord>], k: f64) -> Vec<ScoredRecord> {
    let mut states: HashMap<PointId, FusionState> = HashMap::new();

    for list in lists {
        let mut seen = HashSet::with_capacity(list.len());
        let unique = list.iter().filter(|hit| seen.insert(hit.id));
        for (idx, hit) in unique.enumerate() {
            let rank = idx + 1;
            let contribution = 1.0 / (k + rank as f64);
            match states.entry(hit.id) {
                Entry::Occupied(mut e) => {
                    let state = e.get_mut();
                    state.score += contribution;
                    state.best_rank = state.best_rank.min(rank);
                }
                Entry::Vacant(e) => {
                    e.insert(FusionState {
                        score: contribution,
                        best_rank: rank,
                        payload: hit.payload.clone(),
                    });
                }
            }
        }
    }

    let mut fused: Vec<(PointId, FusionState)> = states.into_iter().collect();
    fused.sort_by(|(id_a, a), (id_b, b)| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| id_a.cmp(id_b))
    });

    fused
        .into_iter()
        .map(|(id, state)| ScoredRecord {
            id,
            score: state.score as f32,
            payload: state.payload,
        })
        .collect()
}
