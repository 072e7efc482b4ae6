//! Batched layer representation extraction
//!
//! Splits the input into contiguous batches, runs one forward pass per
//! batch, pools every layer with the batch's own attention mask, and
//! concatenates the pooled slices in input order.

use anyhow::Result;
use candle_core::{DType, Tensor};
use tracing::{debug, info};

use crate::error::RetrievalError;
use crate::model::HiddenStateSource;
use crate::pooling::PoolingMode;
use crate::representation::LayerRepresentation;

/// Default number of sentences per forward pass
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Pooled representations for every layer the model reports
///
/// Row i of every layer matrix belongs to `sentences[i]`, independent of
/// `batch_size`. Hidden states are converted to F32 before pooling.
pub fn layer_representation<S>(
    source: &S,
    sentences: &[String],
    batch_size: usize,
    pooling: PoolingMode,
) -> Result<LayerRepresentation>
where
    S: HiddenStateSource + ?Sized,
{
    anyhow::ensure!(batch_size > 0, "Batch size must be at least 1");
    anyhow::ensure!(!sentences.is_empty(), "No sentences to encode");

    let n_batches = sentences.len().div_ceil(batch_size);
    info!(
        "Extracting {} sentences in {} batches ({} pooling)",
        sentences.len(),
        n_batches,
        pooling
    );

    let mut per_layer: Vec<Vec<Tensor>> = Vec::new();

    for (batch_idx, chunk) in sentences.chunks(batch_size).enumerate() {
        let texts: Vec<&str> = chunk.iter().map(String::as_str).collect();
        let tokens = source.tokenize_batch(&texts)?;
        let stack = source.hidden_states(&tokens)?;

        if per_layer.is_empty() {
            per_layer = vec![Vec::with_capacity(n_batches); stack.n_layers()];
        } else if stack.n_layers() != per_layer.len() {
            return Err(RetrievalError::LayerCountMismatch {
                expected: per_layer.len(),
                found: stack.n_layers(),
            }
            .into());
        }

        for (layer, hidden) in stack.layers().iter().enumerate() {
            let hidden = hidden.to_dtype(DType::F32)?;
            let pooled = pooling.apply(&hidden, &tokens.attention_mask)?;
            per_layer[layer].push(pooled);
        }

        // Release the batch's activations before the next forward pass
        drop(stack);
        drop(tokens);

        debug!("Batch {}/{} done", batch_idx + 1, n_batches);
    }

    let layers = per_layer
        .iter()
        .map(|slices| Tensor::cat(slices.as_slice(), 0))
        .collect::<candle_core::Result<Vec<_>>>()?;

    LayerRepresentation::new(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TokenizedBatch;
    use crate::representation::HiddenStateStack;
    use candle_core::Device;

    const D_MODEL: usize = 6;
    const N_LAYERS: usize = 4;

    /// Byte-level encoder whose hidden state at position t is the running
    /// mean of token embeddings up to t, scaled per layer
    struct ByteEncoder;

    fn embed(byte: u32) -> Vec<f32> {
        (0..D_MODEL)
            .map(|d| ((byte as f32) * 0.37 + d as f32 * 1.3).sin() + 1.5)
            .collect()
    }

    impl HiddenStateSource for ByteEncoder {
        fn tokenize_batch(&self, texts: &[&str]) -> Result<TokenizedBatch> {
            let longest = texts.iter().map(|t| t.len()).max().unwrap_or(0);
            let ids = texts
                .iter()
                .map(|t| {
                    let mut row: Vec<u32> = t.bytes().map(u32::from).collect();
                    row.resize(longest, 0);
                    row
                })
                .collect();
            let mask = texts
                .iter()
                .map(|t| {
                    let mut row = vec![1u32; t.len()];
                    row.resize(longest, 0);
                    row
                })
                .collect();
            TokenizedBatch::from_rows(ids, mask, &Device::Cpu)
        }

        fn hidden_states(&self, batch: &TokenizedBatch) -> Result<HiddenStateStack> {
            let ids: Vec<Vec<u32>> = batch.input_ids.to_vec2()?;
            let (b, l) = (ids.len(), ids[0].len());
            let mut stack = HiddenStateStack::with_capacity(N_LAYERS);
            for layer in 0..N_LAYERS {
                let mut data = Vec::with_capacity(b * l * D_MODEL);
                for row in &ids {
                    let mut running = vec![0.0f32; D_MODEL];
                    for (t, &id) in row.iter().enumerate() {
                        for (acc, v) in running.iter_mut().zip(embed(id)) {
                            *acc += v;
                        }
                        data.extend(
                            running
                                .iter()
                                .map(|v| v / (t + 1) as f32 * (layer + 1) as f32),
                        );
                    }
                }
                stack.push(Tensor::from_vec(data, (b, l, D_MODEL), &Device::Cpu)?);
            }
            Ok(stack)
        }

        fn token_count(&self, text: &str) -> Result<usize> {
            Ok(text.len())
        }
    }

    fn sentences() -> Vec<String> {
        [
            "dog", "cat", "house", "a", "mountain", "tree", "river", "io", "sun", "madra",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn assert_close(a: &LayerRepresentation, b: &LayerRepresentation) {
        assert_eq!(a.n_layers(), b.n_layers());
        for (x, y) in a.layers().iter().zip(b.layers()) {
            let x: Vec<Vec<f32>> = x.to_vec2().unwrap();
            let y: Vec<Vec<f32>> = y.to_vec2().unwrap();
            for (rx, ry) in x.iter().zip(&y) {
                for (vx, vy) in rx.iter().zip(ry) {
                    assert!((vx - vy).abs() < 1e-5, "{vx} vs {vy}");
                }
            }
        }
    }

    #[test]
    fn test_covers_every_layer_and_sentence() {
        let rep =
            layer_representation(&ByteEncoder, &sentences(), 3, PoolingMode::Mean).unwrap();
        assert_eq!(rep.n_layers(), N_LAYERS);
        assert_eq!(rep.n_sentences(), 10);
        assert_eq!(rep.d_model().unwrap(), D_MODEL);
    }

    #[test]
    fn test_batch_size_does_not_change_values() {
        for pooling in [PoolingMode::Mean, PoolingMode::Last] {
            let small = layer_representation(&ByteEncoder, &sentences(), 2, pooling).unwrap();
            let full = layer_representation(&ByteEncoder, &sentences(), 10, pooling).unwrap();
            let odd = layer_representation(&ByteEncoder, &sentences(), 3, pooling).unwrap();
            assert_close(&small, &full);
            assert_close(&odd, &full);
        }
    }

    #[test]
    fn test_rows_follow_input_order() {
        let words = sentences();
        let rep = layer_representation(&ByteEncoder, &words, 4, PoolingMode::Last).unwrap();
        let single = layer_representation(&ByteEncoder, &words[7..8], 1, PoolingMode::Last)
            .unwrap();

        let row: Vec<f32> = rep.get_layer(2).unwrap().get(7).unwrap().to_vec1().unwrap();
        let expected: Vec<f32> = single.get_layer(2).unwrap().get(0).unwrap().to_vec1().unwrap();
        assert_eq!(row, expected);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(layer_representation(&ByteEncoder, &sentences(), 0, PoolingMode::Mean).is_err());
        assert!(layer_representation(&ByteEncoder, &[], 4, PoolingMode::Mean).is_err());

        let with_empty = vec!["dog".to_string(), String::new()];
        let err = layer_representation(&ByteEncoder, &with_empty, 2, PoolingMode::Mean)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<RetrievalError>(),
            Some(&RetrievalError::EmptySequence { row: 1 })
        );
    }
}
