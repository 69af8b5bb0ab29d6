/// Factor applied to the confidence of a sequence that never reached a stop token.
pub const EXHAUSTED_CONFIDENCE_FACTOR: f64 = 0.0;

/// Length normalized sequence probability, `exp(mean(log p))`, in `[0, 1]`.
///
/// Pure and deterministic (sums in order, in f64), an empty sequence has
/// no confidence.
pub fn confidence(token_log_probabilities: &[f32]) -> f64 {
    if token_log_probabilities.is_empty() {
        return 0.0;
    }
    let mean = total_log_probability(token_log_probabilities) / token_log_probabilities.len() as f64;
    let out = mean.exp();
    if out.is_nan() {
        return 0.0;
    }
    out.clamp(0.0, 1.0)
}

pub fn total_log_probability(token_log_probabilities: &[f32]) -> f64 {
    token_log_probabilities.iter().map(|&x| x as f64).sum()
}
