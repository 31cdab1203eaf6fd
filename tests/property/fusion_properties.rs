use docqa_retrieval::fusion::deduplicate;
use docqa_retrieval::models::{ChunkResult, Metadata};
use proptest::prelude::*;

fn results_strategy() -> impl Strategy<Value = Vec<ChunkResult>> {
    prop::collection::vec((0u8..6, 0.0f64..2.0), 0..30).prop_map(|items| {
        items
            .into_iter()
            .map(|(id, distance)| ChunkResult {
                id: format!("chunk_{}", id),
                text: String::new(),
                metadata: Metadata::new(),
                distance,
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn deduplicate_is_idempotent(results in results_strategy()) {
        let once = deduplicate(results);
        let twice = deduplicate(once.clone());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn survivor_has_minimum_distance(results in results_strategy()) {
        let deduped = deduplicate(results.clone());
        for kept in &deduped {
            let min = results
                .iter()
                .filter(|r| r.id == kept.id)
                .map(|r| r.distance)
                .fold(f64::INFINITY, f64::min);
            prop_assert_eq!(kept.distance, min);
        }
        let mut ids: Vec<&str> = deduped.iter().map(|r| r.id.as_str()).collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), before);
    }
}
