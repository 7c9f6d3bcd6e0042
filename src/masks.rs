//! Attention mask for the decoder forward pass
//!
//! Built fresh on every forward pass. Audit contexts are a handful of words,
//! so the mask is tiny and there is nothing worth sharing across calls.

use anyhow::Result;
use candle_core::{DType, Device, Tensor};

/// Causal mask of shape `[1, 1, seq_len, seq_len]`
///
/// - `0.0` where position `i` may attend to `j` (`j <= i`)
/// - `-inf` where it may not (`j > i`)
///
/// For seq_len=3:
/// ```text
/// [[[[0, -inf, -inf],
///    [0,    0, -inf],
///    [0,    0,    0]]]]
/// ```
pub fn create_causal_mask(seq_len: usize, device: &Device, dtype: DType) -> Result<Tensor> {
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j <= i { 0.0 } else { f32::NEG_INFINITY }))
        .collect();
    Ok(Tensor::from_vec(mask, (1, 1, seq_len, seq_len), device)?.to_dtype(dtype)?)
}
