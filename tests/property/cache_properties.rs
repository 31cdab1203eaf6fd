use docqa_retrieval::cache::{CachedQuery, ChunkEmbeddingCache, SemanticQueryCache};
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    #[test]
    fn lru_evicts_exactly_least_recently_used(
        capacity in 1usize..8,
        touches in prop::collection::vec(0usize..8, 0..24),
    ) {
        let cache = ChunkEmbeddingCache::new(capacity);
        // front = most recently used
        let mut model: Vec<String> = Vec::new();
        for i in 0..capacity {
            let key = format!("c{}", i);
            cache.set(&key, vec![i as f64]);
            model.insert(0, key);
        }
        for t in touches {
            let key = format!("c{}", t % capacity);
            prop_assert!(cache.get(&key).is_some());
            model.retain(|k| k != &key);
            model.insert(0, key);
        }

        cache.set("fresh", vec![0.0]);

        let evicted = model.pop().unwrap();
        prop_assert!(!cache.contains(&evicted), "{} should be evicted", evicted);
        for key in &model {
            prop_assert!(cache.contains(key), "{} should survive", key);
        }
        prop_assert!(cache.contains("fresh"));
        prop_assert_eq!(cache.stats().size, capacity);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn expired_entries_are_invisible_without_sweep(ttl_ms in 1u64..15) {
        let cache = SemanticQueryCache::new(Duration::from_secs(3600));
        cache.set("k", CachedQuery::new("q", vec![1.0]), Some(Duration::from_millis(ttl_ms)));
        std::thread::sleep(Duration::from_millis(ttl_ms + 5));
        prop_assert!(cache.get("k").is_none());
    }
}
