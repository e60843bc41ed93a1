// Temperature / top-k sampling over next-word logits.
//
// Probabilities are `softmax(logits / temperature)`, computed after
// subtracting the maximum so large logits cannot overflow. With `topk == 1`
// the result is the first index of maximal probability and no randomness is
// consumed; otherwise the `topk` most probable words are renormalized and one
// is drawn from the explicit random source.

use crate::error::SamplingError;
use popmt_prng::TuneRng;
use std::cmp::Ordering;

/// Softmax of `logits / temperature`, in f64.
pub fn softmax_with_temperature(logits: &[f32], temperature: f64) -> Vec<f64> {
    let max = logits
        .iter()
        .copied()
        .filter(|l| !l.is_nan())
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f64> = logits
        .iter()
        .map(|&l| {
            if l.is_nan() {
                0.0
            } else {
                ((f64::from(l) - f64::from(max)) / temperature).exp()
            }
        })
        .collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

pub fn temperature_sampling(
    logits: &[f32],
    temperature: f64,
    topk: usize,
    rng: &mut TuneRng,
) -> Result<usize, SamplingError> {
    if logits.is_empty() {
        return Err(SamplingError::Empty);
    }
    if temperature <= 0.0 || !temperature.is_finite() {
        return Err(SamplingError::Temperature(temperature));
    }
    if topk == 0 {
        return Err(SamplingError::TopK);
    }

    let probs = softmax_with_temperature(logits, temperature);
    if topk == 1 {
        return argmax(&probs).ok_or(SamplingError::Degenerate);
    }

    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].partial_cmp(&probs[a]).unwrap_or(Ordering::Equal));
    order.truncate(topk);
    let weights: Vec<f64> = order.iter().map(|&i| probs[i]).collect();
    let pick = rng
        .weighted_index(&weights)
        .ok_or(SamplingError::Degenerate)?;
    Ok(order[pick])
}

/// First index of the maximum, ignoring NaN.
fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if best.is_none_or(|(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}
