//! Attention masks for batched, right-padded forward passes
//!
//! A query position may attend to key positions at or before itself that
//! are real tokens in the same sequence. Padding never influences the
//! hidden states of real tokens, so pooled results do not depend on how
//! long the rest of the batch is.

use anyhow::Result;
use candle_core::{DType, Tensor};

/// Build the combined causal + padding mask for a batch
///
/// # Arguments
/// * `attention_mask` - `(batch, seq_len)`, 1 for real tokens, 0 for padding
///
/// # Returns
///
/// An F32 tensor of shape `[batch, 1, seq_len, seq_len]` with `0.0` where
/// attention is allowed and `-inf` elsewhere.
///
/// For one sequence with mask `[1, 1, 0]`:
/// ```text
/// [[[[0, -inf, -inf],
///    [0,    0, -inf],
///    [0,    0, -inf]]]]
/// ```
///
/// Rows for padding queries still see the first token, so softmax never
/// sees an all `-inf` row as long as each sequence starts with a real token.
pub fn create_padded_causal_mask(attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, seq_len) = attention_mask.dims2()?;
    let rows: Vec<Vec<u32>> = attention_mask.to_dtype(DType::U32)?.to_vec2()?;

    let mask: Vec<f32> = rows
        .iter()
        .flat_map(|row| {
            (0..seq_len).flat_map(move |i| {
                (0..seq_len).map(move |j| {
                    if j <= i && row[j] != 0 {
                        0.0
                    } else {
                        f32::NEG_INFINITY
                    }
                })
            })
        })
        .collect();

    Ok(Tensor::from_vec(
        mask,
        (batch, 1, seq_len, seq_len),
        attention_mask.device(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn is_neg_inf(v: f32) -> bool {
        v.is_infinite() && v < 0.0
    }

    #[test]
    fn test_mask_shape() {
        let device = Device::Cpu;
        let attn = Tensor::from_vec(vec![1u32, 1, 1, 1, 1, 0], (2, 3), &device).unwrap();
        let mask = create_padded_causal_mask(&attn).unwrap();
        assert_eq!(mask.dims(), &[2, 1, 3, 3]);
        assert_eq!(mask.dtype(), DType::F32);
    }

    #[test]
    fn test_unpadded_sequence_is_causal() {
        let device = Device::Cpu;
        let attn = Tensor::from_vec(vec![1u32, 1, 1], (1, 3), &device).unwrap();
        let data: Vec<f32> = create_padded_causal_mask(&attn)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();

        // Row 0: [0, -inf, -inf]
        assert_eq!(data[0], 0.0);
        assert!(is_neg_inf(data[1]));
        assert!(is_neg_inf(data[2]));

        // Row 1: [0, 0, -inf]
        assert_eq!(data[3], 0.0);
        assert_eq!(data[4], 0.0);
        assert!(is_neg_inf(data[5]));

        // Row 2: [0, 0, 0]
        assert!(data[6..9].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_padding_columns_are_masked() {
        let device = Device::Cpu;
        let attn = Tensor::from_vec(vec![1u32, 1, 0], (1, 3), &device).unwrap();
        let data: Vec<f32> = create_padded_causal_mask(&attn)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();

        // Padding query (row 2) sees both real tokens but not itself
        assert_eq!(data[6], 0.0);
        assert_eq!(data[7], 0.0);
        assert!(is_neg_inf(data[8]));
    }
}
