use crate::table::ScoreMap;

/// Converts raw scores into a sum-normalized distribution.
///
/// A map whose scores sum to zero is returned unchanged rather than
/// divided by zero; callers that want different all-zero handling must do
/// so explicitly at the call site. Input scores are assumed non-negative
/// (they come from upstream annotators and retrieval runs) and are not
/// filtered.
pub fn normalize(scores: &ScoreMap) -> ScoreMap {
    let sum: f64 = scores.iter().map(|(_, score)| score).sum();
    if sum == 0.0 {
        return scores.clone();
    }

    scores
        .iter()
        .map(|(key, score)| (key.to_string(), score / sum))
        .collect()
}
