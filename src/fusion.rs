use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{Hit, RrfParams};

#[derive(Debug, Clone)]
struct FusedCandidate {
    docid: String,
    score: f64,
    best_rank: usize,
}

pub fn fuse_rrf(keyword: &[Hit], semantic: &[Hit], params: &RrfParams, top_n: usize) -> Vec<Hit> {
    let mut merged = HashMap::<String, FusedCandidate>::new();
    let rrf_base = f64::from(params.k);

    for (hits, weight) in [
        (keyword, params.weight_keyword),
        (semantic, params.weight_semantic),
    ] {
        for (index, hit) in hits.iter().enumerate() {
            let rank = index + 1;
            let entry = merged
                .entry(hit.docid.clone())
                .or_insert_with(|| FusedCandidate {
                    docid: hit.docid.clone(),
                    score: 0.0,
                    best_rank: rank,
                });
            entry.score += weight / (rrf_base + rank as f64);
            entry.best_rank = entry.best_rank.min(rank);
        }
    }

    let mut fused = merged.into_values().collect::<Vec<FusedCandidate>>();
    fused.sort_by(|left, right| {
        right
            .score
            .partial_cmp(&left.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.best_rank.cmp(&right.best_rank))
            .then_with(|| left.docid.cmp(&right.docid))
    });
    fused.truncate(top_n);

    fused
        .into_iter()
        .map(|candidate| Hit::new(candidate.docid, candidate.score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(ids: &[&str]) -> Vec<Hit> {
        ids.iter()
            .enumerate()
            .map(|(index, id)| Hit::new(*id, 100.0 - index as f64))
            .collect()
    }

    #[test]
    fn documents_in_both_lists_rise_to_the_top() {
        let keyword = hits(&["a", "b", "c"]);
        let semantic = hits(&["c", "d", "a"]);

        let fused = fuse_rrf(&keyword, &semantic, &RrfParams::default(), 10);
        let ids = fused.iter().map(|hit| hit.docid.as_str()).collect::<Vec<_>>();

        assert_eq!(ids, vec!["a", "c", "b", "d"]);
        assert!((fused[0].score - (1.0 / 61.0 + 1.0 / 63.0)).abs() < 1e-12);
    }

    #[test]
    fn weights_scale_each_list() {
        let keyword = hits(&["a"]);
        let semantic = hits(&["b"]);
        let params = RrfParams {
            k: 60,
            weight_keyword: 0.5,
            weight_semantic: 2.0,
        };

        let fused = fuse_rrf(&keyword, &semantic, &params, 10);
        assert_eq!(fused[0].docid, "b");
        assert!((fused[0].score - 2.0 / 61.0).abs() < 1e-12);
        assert!((fused[1].score - 0.5 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn equal_scores_break_on_docid_and_truncate() {
        let keyword = hits(&["z"]);
        let semantic = hits(&["y"]);

        let fused = fuse_rrf(&keyword, &semantic, &RrfParams::default(), 1);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].docid, "y");
    }

    #[test]
    fn empty_inputs_fuse_to_nothing() {
        assert!(fuse_rrf(&[], &[], &RrfParams::default(), 5).is_empty());
    }
}
