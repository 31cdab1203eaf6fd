//! Result-set sizing from the similarity distribution.
//!
//! Confident matches need few chunks; weak or mixed matches need more. The
//! policy works on similarities (`1 - distance`) and uses the mean and the
//! population standard deviation of the whole candidate set.

use crate::config::RetrievalConfig;
use crate::models::SimilarityResult;

/// Standard deviation above which the candidate set counts as mixed.
const HIGH_VARIANCE: f64 = 0.2;
/// Upper clamp for [`AdaptiveRetriever::compute_dynamic_threshold`].
const DYNAMIC_THRESHOLD_CAP: f64 = 0.7;

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveRetriever {
    pub min_top_k: usize,
    pub max_top_k: usize,
    pub high_similarity: f64,
    pub medium_similarity: f64,
    pub min_similarity: f64,
}

impl AdaptiveRetriever {
    /// `min_top_k` defaults to a quarter of `max_rag_chunks`, never below 1.
    pub fn from_config(config: &RetrievalConfig) -> Self {
        let max_top_k = config.max_rag_chunks.max(1);
        let min_top_k = config
            .min_top_k
            .unwrap_or(max_top_k / 4)
            .clamp(1, max_top_k);
        Self {
            min_top_k,
            max_top_k,
            high_similarity: config.high_similarity,
            medium_similarity: config.medium_similarity,
            min_similarity: config.min_similarity,
        }
    }

    /// Number of chunks to keep for a candidate set with these similarities.
    ///
    /// Mean at or above `high_similarity` moves 30% of the way from
    /// `min_top_k` to `max_top_k`, at or above `medium_similarity` 60%,
    /// otherwise all the way. A standard deviation above 0.2 adds 20%.
    /// The result is clamped to `[min_top_k, max_top_k]` and to the number
    /// of candidates. An empty set yields `min_top_k`.
    pub fn compute_adaptive_top_k(&self, similarities: &[f64]) -> usize {
        if similarities.is_empty() {
            return self.min_top_k;
        }

        let (mean, stddev) = mean_and_stddev(similarities);
        let range = self.max_top_k.saturating_sub(self.min_top_k) as f64;

        let mut top_k = if mean >= self.high_similarity {
            self.min_top_k + (range * 0.3) as usize
        } else if mean >= self.medium_similarity {
            self.min_top_k + (range * 0.6) as usize
        } else {
            self.max_top_k
        };

        if stddev > HIGH_VARIANCE {
            top_k = (top_k as f64 * 1.2) as usize;
        }

        top_k
            .clamp(self.min_top_k, self.max_top_k)
            .min(similarities.len())
    }

    /// Keep results whose similarity is at least `min_similarity`.
    pub fn filter_by_threshold(&self, results: Vec<SimilarityResult>) -> Vec<SimilarityResult> {
        results
            .into_iter()
            .filter(|r| r.similarity() >= self.min_similarity)
            .collect()
    }

    /// `mean - 1.5 * stddev`, clamped to `[min_similarity, 0.7]`.
    pub fn compute_dynamic_threshold(&self, similarities: &[f64]) -> f64 {
        if similarities.is_empty() {
            return self.min_similarity;
        }
        let (mean, stddev) = mean_and_stddev(similarities);
        (mean - 1.5 * stddev)
            .max(self.min_similarity)
            .min(DYNAMIC_THRESHOLD_CAP)
    }

    /// Filter by threshold, then truncate to the adaptive top-k of the
    /// surviving candidates. Input order is preserved.
    pub fn get_adaptive_results(&self, results: Vec<SimilarityResult>) -> Vec<SimilarityResult> {
        let mut filtered = self.filter_by_threshold(results);
        let similarities: Vec<f64> = filtered.iter().map(|r| r.similarity()).collect();
        let top_k = self.compute_adaptive_top_k(&similarities);
        tracing::debug!(
            candidates = similarities.len(),
            top_k,
            "{}",
            self.explain_decision(&similarities, top_k)
        );
        filtered.truncate(top_k);
        filtered
    }

    /// Human-readable account of a top-k decision.
    pub fn explain_decision(&self, similarities: &[f64], top_k: usize) -> String {
        if similarities.is_empty() {
            return "No similarities provided".to_string();
        }
        let (mean, stddev) = mean_and_stddev(similarities);

        let mut explanation = format!(
            "Selected top-k={} based on mean similarity={:.3}, stddev={:.3}. ",
            top_k, mean, stddev
        );
        explanation.push_str(if mean >= self.high_similarity {
            "High confidence match - fewer chunks needed."
        } else if mean >= self.medium_similarity {
            "Medium confidence - moderate number of chunks."
        } else {
            "Low confidence - retrieving more chunks for better coverage."
        });
        if stddev > HIGH_VARIANCE {
            explanation.push_str(" High variance detected, increased chunk count.");
        }
        explanation
    }
}

/// Mean and population standard deviation. Both are zero for no values.
pub fn mean_and_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn retriever() -> AdaptiveRetriever {
        AdaptiveRetriever {
            min_top_k: 3,
            max_top_k: 12,
            high_similarity: 0.8,
            medium_similarity: 0.5,
            min_similarity: 0.3,
        }
    }

    fn make_result(id: &str, similarity: f64) -> SimilarityResult {
        SimilarityResult {
            id: id.to_string(),
            text: String::new(),
            metadata: Metadata::new(),
            distance: 1.0 - similarity,
        }
    }

    #[test]
    fn test_from_config_defaults_min_to_quarter_of_max() {
        let r = AdaptiveRetriever::from_config(&RetrievalConfig::default());
        assert_eq!(r.max_top_k, 10);
        assert_eq!(r.min_top_k, 2);

        let cfg = RetrievalConfig {
            max_rag_chunks: 3,
            ..RetrievalConfig::default()
        };
        assert_eq!(AdaptiveRetriever::from_config(&cfg).min_top_k, 1);
    }

    #[test]
    fn test_top_k_bands() {
        let r = retriever();
        // range = 9: high -> 3 + 2, medium -> 3 + 5, low -> 12
        assert_eq!(r.compute_adaptive_top_k(&[0.9; 20]), 5);
        assert_eq!(r.compute_adaptive_top_k(&[0.6; 20]), 8);
        assert_eq!(r.compute_adaptive_top_k(&[0.2; 20]), 12);
    }

    #[test]
    fn test_top_k_high_variance_inflates() {
        let r = retriever();
        // mean 0.55 (medium band -> 8), stddev 0.4 -> 9
        let sims = [0.95, 0.15, 0.95, 0.15, 0.95, 0.15, 0.95, 0.15, 0.95, 0.15];
        assert_eq!(r.compute_adaptive_top_k(&sims), 9);
    }

    #[test]
    fn test_top_k_clamped_to_candidates() {
        let r = retriever();
        assert_eq!(r.compute_adaptive_top_k(&[0.2, 0.25]), 2);
        assert_eq!(r.compute_adaptive_top_k(&[]), 3);
    }

    #[test]
    fn test_filter_by_threshold() {
        let r = retriever();
        let kept = r.filter_by_threshold(vec![
            make_result("a", 0.9),
            make_result("b", 0.29),
            make_result("c", 0.3),
        ]);
        let ids: Vec<&str> = kept.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_dynamic_threshold_clamped() {
        let r = retriever();
        assert!((r.compute_dynamic_threshold(&[]) - 0.3).abs() < 1e-12);
        assert!((r.compute_dynamic_threshold(&[0.95, 0.95]) - 0.7).abs() < 1e-12);
        assert!((r.compute_dynamic_threshold(&[0.9, 0.1]) - 0.3).abs() < 1e-12);
        // mean 0.6, stddev 0.05 -> 0.525
        assert!((r.compute_dynamic_threshold(&[0.55, 0.65]) - 0.525).abs() < 1e-9);
    }

    #[test]
    fn test_get_adaptive_results_sizes_from_filtered_set() {
        let r = retriever();
        let mut results: Vec<SimilarityResult> = (0..10)
            .map(|i| make_result(&format!("hi{}", i), 0.9))
            .collect();
        results.extend((0..10).map(|i| make_result(&format!("lo{}", i), 0.05)));

        let out = r.get_adaptive_results(results);
        // Only the ten 0.9 results survive; their mean is high -> 5.
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|r| r.id.starts_with("hi")));
        assert_eq!(out[0].id, "hi0");
    }

    #[test]
    fn test_explain_decision() {
        let r = retriever();
        assert_eq!(r.explain_decision(&[], 3), "No similarities provided");
        let text = r.explain_decision(&[0.95, 0.15], 9);
        assert!(text.starts_with("Selected top-k=9 based on mean similarity=0.550, stddev=0.400. "));
        assert!(text.contains("Medium confidence"));
        assert!(text.ends_with("High variance detected, increased chunk count."));
    }

    #[test]
    fn test_mean_and_stddev() {
        let (mean, stddev) = mean_and_stddev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((stddev - 2.0).abs() < 1e-12);
    }
}
