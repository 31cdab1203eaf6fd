use docqa_retrieval::adaptive::AdaptiveRetriever;
use docqa_retrieval::config::RetrievalConfig;
use docqa_retrieval::embedding::{cosine_similarity, distance_to_similarity, similarity_to_distance};
use proptest::prelude::*;

fn nonzero_pair() -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
    (1usize..16)
        .prop_flat_map(|n| {
            (
                prop::collection::vec(-100.0f64..100.0, n),
                prop::collection::vec(-100.0f64..100.0, n),
            )
        })
        .prop_filter("non-zero vectors", |(a, b)| {
            a.iter().any(|v| v.abs() > 1e-3) && b.iter().any(|v| v.abs() > 1e-3)
        })
}

proptest! {
    #[test]
    fn cosine_is_symmetric((a, b) in nonzero_pair()) {
        let ab = cosine_similarity(&a, &b).unwrap();
        let ba = cosine_similarity(&b, &a).unwrap();
        prop_assert_eq!(ab, ba);
        prop_assert!((-1.0 - 1e-9..=1.0 + 1e-9).contains(&ab));
    }

    #[test]
    fn cosine_with_self_is_one((a, _) in nonzero_pair()) {
        let aa = cosine_similarity(&a, &a).unwrap();
        prop_assert!((aa - 1.0).abs() < 1e-9, "got {}", aa);
    }

    #[test]
    fn distance_round_trips(similarity in -1.0f64..1.0) {
        let back = distance_to_similarity(similarity_to_distance(similarity));
        prop_assert!((back - similarity).abs() < 1e-12);
    }

    #[test]
    fn adaptive_top_k_shrinks_as_mean_rises(
        base in prop::collection::vec(0.0f64..0.5, 1..20),
        shift in 0.0f64..0.5,
    ) {
        let adaptive = AdaptiveRetriever::from_config(&RetrievalConfig::default());
        let higher: Vec<f64> = base.iter().map(|s| s + shift).collect();
        prop_assert!(
            adaptive.compute_adaptive_top_k(&higher) <= adaptive.compute_adaptive_top_k(&base)
        );
    }
}
