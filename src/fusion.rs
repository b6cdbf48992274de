//! Pure scoring policies that turn candidate score maps into one combined
//! score map. Each policy is independent of file formats and threading;
//! the aggregate driver decides how per-entity partials are merged.

use crate::error::{FuseError, FuseResult};
use crate::table::ScoreMap;

/// Reciprocal-rank summation over one ranked paragraph list per source.
///
/// Each source contributes `1 / position` (1-based) for the paragraphs it
/// lists; paragraphs absent from a source contribute nothing. Paragraphs
/// that rank highly and consistently across many sources accumulate the
/// largest totals. Result keys appear in first-seen order.
pub fn reciprocal_rank(lists: &[Vec<String>]) -> ScoreMap {
    let mut combined = ScoreMap::new();
    for list in lists {
        for (position, paragraph) in list.iter().enumerate() {
            let partial = 1.0 / (position + 1) as f64;
            let total = combined.get(paragraph).unwrap_or(0.0) + partial;
            combined.insert(paragraph, total);
        }
    }
    combined
}

/// Probabilistic product `score(p | q, e) = P(e | q) * P(p | e)`.
///
/// `entity_weight` is the retrieval score of the entity for the query,
/// already normalized upstream; `salience` is the normalized per-paragraph
/// salience distribution for that entity.
pub fn probabilistic_product(entity_weight: f64, salience: &ScoreMap) -> ScoreMap {
    salience
        .iter()
        .map(|(paragraph, prob)| (paragraph.to_string(), entity_weight * prob))
        .collect()
}

/// Rounds up to two decimal digits (ceiling mode), matching the report
/// format the rounded-product runs are compared against.
pub fn round_up_hundredths(value: f64) -> f64 {
    (value * 100.0).ceil() / 100.0
}

/// Product of two distributions with each factor independently rounded to
/// two decimals (ceiling) before the multiply.
///
/// Only paragraphs present in both the passage distribution and the
/// salience distribution are scored; the rest are dropped, not zeroed.
pub fn rounded_product(passage_probs: &ScoreMap, salience: &ScoreMap) -> ScoreMap {
    let mut combined = ScoreMap::new();
    for (paragraph, sal_prob) in salience.iter() {
        let Some(psg_prob) = passage_probs.get(paragraph) else {
            continue;
        };
        let score = round_up_hundredths(psg_prob) * round_up_hundredths(sal_prob);
        combined.insert(paragraph, score);
    }
    combined
}

/// Element-wise arithmetic mean of equal-length feature vectors.
///
/// Every input must match the configured dimensionality; an empty input
/// yields an empty vector and a single input passes through unchanged.
pub fn average_vectors(vectors: &[Vec<f64>], dimensions: usize) -> FuseResult<Vec<f64>> {
    if vectors.is_empty() {
        return Ok(Vec::new());
    }

    for vector in vectors {
        if vector.len() != dimensions {
            return Err(FuseError::DimensionMismatch {
                expected: dimensions,
                found: vector.len(),
            });
        }
    }

    let mut averaged = vec![0.0; dimensions];
    for vector in vectors {
        for (slot, value) in averaged.iter_mut().zip(vector) {
            *slot += value;
        }
    }
    for slot in &mut averaged {
        *slot /= vectors.len() as f64;
    }
    Ok(averaged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reciprocal_rank_is_symmetric_across_reversed_lists() {
        let lists = vec![
            vec!["p1".to_string(), "p2".to_string()],
            vec!["p2".to_string(), "p1".to_string()],
        ];

        let combined = reciprocal_rank(&lists);
        assert_eq!(combined.get("p1"), Some(1.0 + 0.5));
        assert_eq!(combined.get("p2"), Some(1.0 + 0.5));
    }

    #[test]
    fn reciprocal_rank_of_no_sources_is_empty() {
        assert!(reciprocal_rank(&[]).is_empty());
    }

    #[test]
    fn reciprocal_rank_single_candidate_scores_one() {
        let lists = vec![vec!["p1".to_string()]];
        let combined = reciprocal_rank(&lists);
        assert_eq!(combined.len(), 1);
        assert_eq!(combined.get("p1"), Some(1.0));
    }

    #[test]
    fn probabilistic_product_multiplies_normalized_factors() {
        let mut salience = ScoreMap::new();
        salience.insert("p1", 0.4);

        let scores = probabilistic_product(0.5, &salience);
        assert_eq!(scores.get("p1"), Some(0.2));
    }

    #[test]
    fn probabilistic_product_of_empty_distribution_is_empty() {
        assert!(probabilistic_product(0.5, &ScoreMap::new()).is_empty());
    }

    #[test]
    fn round_up_hundredths_uses_ceiling_mode() {
        assert_eq!(round_up_hundredths(0.111), 0.12);
        assert_eq!(round_up_hundredths(0.4), 0.4);
        assert_eq!(round_up_hundredths(0.001), 0.01);
    }

    #[test]
    fn rounded_product_rounds_each_factor_before_multiplying() {
        let mut passages = ScoreMap::new();
        passages.insert("p1", 0.111);
        let mut salience = ScoreMap::new();
        salience.insert("p1", 0.111);

        let scores = rounded_product(&passages, &salience);
        let expected = 0.12 * 0.12;
        assert!((scores.get("p1").unwrap() - expected).abs() < 1e-12);

        // Rounding after the product would have produced a different value.
        let rounded_after = round_up_hundredths(0.111 * 0.111);
        assert!((scores.get("p1").unwrap() - rounded_after).abs() > 1e-3);
    }

    #[test]
    fn rounded_product_drops_paragraphs_missing_from_passage_ranking() {
        let mut passages = ScoreMap::new();
        passages.insert("p1", 0.5);
        let mut salience = ScoreMap::new();
        salience.insert("p1", 0.5);
        salience.insert("p2", 0.5);

        let scores = rounded_product(&passages, &salience);
        assert_eq!(scores.len(), 1);
        assert!(scores.contains_key("p1"));
    }

    #[test]
    fn average_vectors_takes_element_wise_mean() {
        let vectors = vec![vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0]];
        let averaged = average_vectors(&vectors, 3).unwrap();
        assert_eq!(averaged, vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn average_vectors_rejects_mismatched_dimensions() {
        let vectors = vec![vec![1.0, 2.0, 3.0], vec![1.0, 2.0]];
        let err = average_vectors(&vectors, 3).unwrap_err();
        assert_eq!(
            err,
            FuseError::DimensionMismatch {
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn average_vectors_edge_cases() {
        assert_eq!(average_vectors(&[], 3).unwrap(), Vec::<f64>::new());

        let single = vec![vec![0.5, 0.25]];
        assert_eq!(average_vectors(&single, 2).unwrap(), vec![0.5, 0.25]);
    }
}
