//! Pooling of per-token hidden states into one vector per sequence
//!
//! Both strategies take `hidden_states (batch, seq_len, d_model)` and an
//! `attention_mask (batch, seq_len)` with 1 for real tokens and 0 for
//! padding, and return `(batch, d_model)`.

use std::fmt;

use anyhow::Result;
use candle_core::{DType, IndexOp, Tensor, D};
use serde::Serialize;

use crate::error::RetrievalError;

/// How a sequence of hidden states is reduced to a single vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PoolingMode {
    /// Average over unmasked positions
    #[default]
    Mean,
    /// Hidden state of the last unmasked position (right padding only)
    Last,
}

impl PoolingMode {
    pub fn apply(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        match self {
            PoolingMode::Mean => mean_pool(hidden_states, attention_mask),
            PoolingMode::Last => last_token_pool(hidden_states, attention_mask),
        }
    }
}

impl fmt::Display for PoolingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolingMode::Mean => write!(f, "mean"),
            PoolingMode::Last => write!(f, "last"),
        }
    }
}

/// Number of unmasked tokens per sequence; errors on an empty sequence
fn token_counts(attention_mask: &Tensor) -> Result<Vec<usize>> {
    let rows: Vec<Vec<u32>> = attention_mask.to_dtype(DType::U32)?.to_vec2()?;
    rows.iter()
        .enumerate()
        .map(|(row, mask)| -> Result<usize> {
            let count = mask.iter().filter(|&&m| m != 0).count();
            if count == 0 {
                Err(RetrievalError::EmptySequence { row }.into())
            } else {
                Ok(count)
            }
        })
        .collect()
}

/// Mean over positions where the mask is 1
///
/// Padding contributes nothing to either the sum or the count.
pub fn mean_pool(hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    token_counts(attention_mask)?;

    // (b, l) -> (b, l, 1)
    let mask = attention_mask
        .to_dtype(hidden_states.dtype())?
        .unsqueeze(D::Minus1)?;
    // (b, h)
    let summed = hidden_states.broadcast_mul(&mask)?.sum(1)?;
    // (b, 1)
    let count = mask.sum(1)?;
    Ok(summed.broadcast_div(&count)?)
}

/// Hidden state at the last unmasked position of each sequence
///
/// Assumes right padding: the selected index is `count_of_ones - 1`, which
/// is wrong for left-padded batches.
pub fn last_token_pool(hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let counts = token_counts(attention_mask)?;
    let (batch, seq_len, _) = hidden_states.dims3()?;
    anyhow::ensure!(
        counts.len() == batch,
        "Attention mask has {} rows, hidden states {batch}",
        counts.len()
    );

    let rows = counts
        .iter()
        .enumerate()
        .map(|(b, &count)| -> Result<Tensor> {
            let last = count - 1;
            anyhow::ensure!(last < seq_len, "Mask longer than sequence ({seq_len})");
            Ok(hidden_states.i((b, last))?)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Tensor::stack(&rows, 0)?)
}
