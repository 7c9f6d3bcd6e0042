//! Numerically stable softmax, top-K selection and entropy
//!
//! Logits arrive as `f32` from the model. Everything downstream works in
//! `f64` so probability sums over a large vocabulary stay accurate.

use crate::error::AuditError;

/// Max-subtracted softmax in `f64`.
///
/// Any NaN or infinite logit, or a normalizer that is not a positive finite
/// number, is reported as [`AuditError::UnstableNumerics`].
pub fn softmax(logits: &[f32]) -> Result<Vec<f64>, AuditError> {
    if logits.is_empty() {
        return Err(AuditError::UnstableNumerics {
            detail: "empty logit vector".into(),
        });
    }
    if let Some(pos) = logits.iter().position(|x| !x.is_finite()) {
        return Err(AuditError::UnstableNumerics {
            detail: format!("non-finite logit {} at token {pos}", logits[pos]),
        });
    }

    let max = logits
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = logits.iter().map(|&x| (x as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();

    if !sum.is_finite() || sum <= 0.0 {
        return Err(AuditError::UnstableNumerics {
            detail: format!("softmax normalizer {sum}"),
        });
    }
    Ok(exps.into_iter().map(|e| e / sum).collect())
}

/// Indices of the `k` largest probabilities, highest first.
///
/// `k` is clamped to `[1, probs.len()]`. Ties keep the lower index first.
pub fn top_k_indices(probs: &[f64], k: usize) -> Vec<usize> {
    if probs.is_empty() {
        return Vec::new();
    }
    let k = k.clamp(1, probs.len());
    let mut idx: Vec<usize> = (0..probs.len()).collect();
    let by_prob_desc = |a: &usize, b: &usize| {
        probs[*b]
            .partial_cmp(&probs[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(b))
    };
    if k < idx.len() {
        idx.select_nth_unstable_by(k - 1, by_prob_desc);
        idx.truncate(k);
    }
    idx.sort_by(by_prob_desc);
    idx
}

/// Shannon entropy in bits of a distribution after renormalizing it.
///
/// Zero-mass entries contribute nothing; an all-zero input has entropy 0.
pub fn entropy_bits(masses: &[f64]) -> f64 {
    let total: f64 = masses.iter().filter(|m| **m > 0.0).sum();
    if total <= 0.0 {
        return 0.0;
    }
    masses
        .iter()
        .filter(|m| **m > 0.0)
        .map(|m| {
            let p = m / total;
            -p * p.log2()
        })
        .sum()
}
