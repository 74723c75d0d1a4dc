//! Reciprocal rank fusion of dense and sparse result lists.

use std::collections::HashMap;

use super::types::{MatchSource, QueryMatch};

/// RRF constant. Standard value; dampens the influence of top ranks so that
/// agreement between lists outweighs a single high rank.
pub const RRF_K: f32 = 60.0;

/// Fuse two ranked lists by reciprocal rank.
///
/// Each match scores `1 / (k + rank + 1)` per list it appears in; matches
/// present in both lists are annotated `fused`, everything else keeps the
/// source of its originating list. Ties break toward the dense list's order.
pub fn rrf_fuse(dense: &[QueryMatch], sparse: &[QueryMatch], top_k: usize) -> Vec<QueryMatch> {
    let mut scores: HashMap<&str, (f32, MatchSource, &QueryMatch)> = HashMap::new();

    for (rank, m) in dense.iter().enumerate() {
        let score = 1.0 / (RRF_K + rank as f32 + 1.0);
        scores.insert(m.id.as_str(), (score, MatchSource::Dense, m));
    }
    for (rank, m) in sparse.iter().enumerate() {
        let score = 1.0 / (RRF_K + rank as f32 + 1.0);
        scores
            .entry(m.id.as_str())
            .and_modify(|(s, source, _)| {
                *s += score;
                *source = MatchSource::Fused;
            })
            .or_insert((score, MatchSource::Sparse, m));
    }

    let mut fused: Vec<QueryMatch> = scores
        .into_values()
        .map(|(score, source, m)| QueryMatch {
            id: m.id.clone(),
            score,
            source,
            metadata: m.metadata.clone(),
        })
        .collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    fused.truncate(top_k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn m(id: &str, score: f32, source: MatchSource) -> QueryMatch {
        QueryMatch {
            id: id.to_string(),
            score,
            source,
            metadata: Value::Null,
        }
    }

    #[test]
    fn agreement_beats_single_list_rank() {
        let dense = vec![
            m("a", 0.9, MatchSource::Dense),
            m("b", 0.8, MatchSource::Dense),
        ];
        let sparse = vec![
            m("c", 5.0, MatchSource::Sparse),
            m("b", 4.0, MatchSource::Sparse),
        ];
        let fused = rrf_fuse(&dense, &sparse, 10);
        // "b" appears in both lists, so it outranks both single-list leaders.
        assert_eq!(fused[0].id, "b");
        assert_eq!(fused[0].source, MatchSource::Fused);
    }

    #[test]
    fn single_list_matches_keep_their_source() {
        let dense = vec![m("a", 0.9, MatchSource::Dense)];
        let sparse = vec![m("c", 5.0, MatchSource::Sparse)];
        let fused = rrf_fuse(&dense, &sparse, 10);
        let a = fused.iter().find(|f| f.id == "a").unwrap();
        let c = fused.iter().find(|f| f.id == "c").unwrap();
        assert_eq!(a.source, MatchSource::Dense);
        assert_eq!(c.source, MatchSource::Sparse);
    }

    #[test]
    fn truncates_to_top_k() {
        let dense: Vec<_> = (0..20)
            .map(|i| m(&format!("d{i}"), 1.0, MatchSource::Dense))
            .collect();
        let fused = rrf_fuse(&dense, &[], 5);
        assert_eq!(fused.len(), 5);
    }

    #[test]
    fn empty_lists_fuse_to_empty() {
        assert!(rrf_fuse(&[], &[], 10).is_empty());
    }
}
