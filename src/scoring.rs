//! Margin-based retrieval scoring and per-layer accuracy
//!
//! Raw cosine similarity between two representation sets is rescaled
//! against each item's k-nearest-neighbour mean (CSLS-style), which damps
//! hub vectors that sit close to many items at once.

use std::fmt;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use serde::Serialize;
use tracing::debug;

use crate::error::RetrievalError;

/// Default neighbourhood size for the margin baseline
pub const DEFAULT_K: usize = 4;

/// Default stabilizer added to the margin baseline
pub const DEFAULT_EPS: f64 = 1e-6;

/// Rescaling rule applied to raw cosine similarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MarginVariant {
    /// `cos / baseline`
    #[default]
    Ratio,
    /// Raw cosine similarity
    Absolute,
    /// `cos - baseline`
    Distance,
}

impl fmt::Display for MarginVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarginVariant::Ratio => write!(f, "ratio"),
            MarginVariant::Absolute => write!(f, "absolute"),
            MarginVariant::Distance => write!(f, "distance"),
        }
    }
}

/// Scorer parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginScorer {
    pub k: usize,
    pub variant: MarginVariant,
    pub eps: f64,
}

impl Default for MarginScorer {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            variant: MarginVariant::Ratio,
            eps: DEFAULT_EPS,
        }
    }
}

impl MarginScorer {
    pub fn new(k: usize, variant: MarginVariant, eps: f64) -> Self {
        Self { k, variant, eps }
    }

    /// Score matrix `(n_first, n_second)`; entry `[i, j]` scores item j of
    /// `second` against item i of `first`
    pub fn score(&self, first: &Tensor, second: &Tensor) -> Result<Tensor> {
        margin_based_scoring(first, second, self.k, self.variant, self.eps)
    }
}

/// Reject empty matrices and rows whose norm is zero or not finite
fn validate_rows(x: &Tensor, side: &'static str) -> Result<Tensor> {
    let x = x.to_dtype(DType::F32)?;
    let (rows, _) = x.dims2()?;
    anyhow::ensure!(rows > 0, "Empty {side} representation matrix");

    let norms = x.sqr()?.sum_keepdim(1)?.sqrt()?;
    let host: Vec<f32> = norms.flatten_all()?.to_vec1()?;
    if let Some(row) = host.iter().position(|n| !n.is_finite() || *n == 0.0) {
        return Err(RetrievalError::DegenerateVector { side, row }.into());
    }
    Ok(x.broadcast_div(&norms)?)
}

/// Pairwise cosine similarity, shape `(n_first, n_second)`
///
/// Each row is L2-normalized independently before the product. Zero-norm
/// rows are rejected with [`RetrievalError::DegenerateVector`].
pub fn cosine_similarity(first: &Tensor, second: &Tensor) -> Result<Tensor> {
    let first_norm = validate_rows(first, "first")?;
    let second_norm = validate_rows(second, "second")?;
    Ok(first_norm.matmul(&second_norm.t()?.contiguous()?)?)
}

/// Mean of the k largest values along the last dimension, shape `(n, 1)`
///
/// k shrinks to the row width when the row is shorter.
fn top_k_mean(x: &Tensor, k: usize) -> Result<Tensor> {
    let width = x.dim(1)?;
    let k = k.min(width);
    let (sorted, _) = x.contiguous()?.sort_last_dim(false)?;
    Ok(sorted.narrow(1, 0, k)?.mean_keepdim(1)?)
}

/// CSLS-style margin scoring between two representation sets
///
/// `absolute` returns the cosine matrix `a`. Otherwise the baseline is
/// `b = (row_knn_mean + col_knn_mean) / 2 + eps`, and the score is
/// `a - b` for `distance` or `a / b` for `ratio`.
pub fn margin_based_scoring(
    first: &Tensor,
    second: &Tensor,
    k: usize,
    variant: MarginVariant,
    eps: f64,
) -> Result<Tensor> {
    anyhow::ensure!(k >= 1, "Neighbourhood size k must be at least 1");

    let a = cosine_similarity(first, second)?;
    if variant == MarginVariant::Absolute {
        return Ok(a);
    }

    let (n1, n2) = a.dims2()?;
    debug!("Margin baseline over {n1}x{n2} similarities (k={k})");

    // Arg-sort kernels on accelerators cap the row width, so the neighbour
    // means are taken on the host.
    let host = a.to_device(&Device::Cpu)?;
    // (n1, 1)
    let row_mean = top_k_mean(&host, k)?;
    // (1, n2)
    let col_mean = top_k_mean(&host.t()?, k)?.t()?;

    let b = ((row_mean.broadcast_add(&col_mean)? * 0.5)? + eps)?;
    let b = b.to_device(a.device())?;

    let score = match variant {
        MarginVariant::Distance => (&a - &b)?,
        _ => (&a / &b)?,
    };
    Ok(score)
}

/// Top-1 retrieval accuracy with row i's correct match at column i
///
/// Argmax ties resolve to the lowest column index. Returns a value in
/// `[0, 1]`.
pub fn layer_accuracy(score: &Tensor) -> Result<f64> {
    let rows: Vec<Vec<f32>> = score.to_dtype(DType::F32)?.to_vec2()?;
    anyhow::ensure!(!rows.is_empty(), "Empty score matrix");

    let hits = rows
        .iter()
        .enumerate()
        .filter(|(i, row)| argmax(row) == Some(*i))
        .count();

    Ok(hits as f64 / rows.len() as f64)
}

/// First index of the maximum value
fn argmax(row: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (j, &v) in row.iter().enumerate() {
        match best {
            Some((_, bv)) if v <= bv => {}
            Some(_) if v.is_nan() => {}
            _ => best = Some((j, v)),
        }
    }
    best.map(|(j, _)| j)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[f32]]) -> Tensor {
        let n = rows.len();
        let h = rows[0].len();
        let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_vec(flat, (n, h), &Device::Cpu).unwrap()
    }

    fn to_rows(t: &Tensor) -> Vec<Vec<f32>> {
        t.to_vec2().unwrap()
    }

    #[test]
    fn test_cosine_self_similarity_diagonal() {
        let x = matrix(&[&[1.0, 2.0, 0.5], &[-1.0, 0.3, 2.0], &[0.2, -0.7, 0.1]]);
        let sim = to_rows(&cosine_similarity(&x, &x).unwrap());
        for (i, row) in sim.iter().enumerate() {
            assert!((row[i] - 1.0).abs() < 1e-5);
            for (j, &v) in row.iter().enumerate() {
                if i != j {
                    assert!(v < row[i]);
                }
            }
        }
    }

    #[test]
    fn test_cosine_is_scale_invariant() {
        let a = matrix(&[&[3.0, 4.0]]);
        let b = matrix(&[&[6.0, 8.0], &[0.0, 5.0]]);
        let sim = to_rows(&cosine_similarity(&a, &b).unwrap());
        assert!((sim[0][0] - 1.0).abs() < 1e-6);
        assert!((sim[0][1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_rejected() {
        let a = matrix(&[&[1.0, 0.0], &[0.0, 0.0]]);
        let b = matrix(&[&[1.0, 0.0]]);
        let err = cosine_similarity(&a, &b).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RetrievalError>(),
            Some(&RetrievalError::DegenerateVector {
                side: "first",
                row: 1
            })
        );
        let err = cosine_similarity(&b, &a).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RetrievalError>(),
            Some(&RetrievalError::DegenerateVector {
                side: "second",
                row: 1
            })
        );
    }

    #[test]
    fn test_absolute_equals_cosine() {
        let a = matrix(&[&[1.0, 2.0], &[2.0, -1.0], &[0.5, 0.5]]);
        let b = matrix(&[&[0.3, 1.0], &[1.0, 0.1]]);
        let cos = to_rows(&cosine_similarity(&a, &b).unwrap());
        let abs = to_rows(
            &margin_based_scoring(&a, &b, 4, MarginVariant::Absolute, DEFAULT_EPS).unwrap(),
        );
        assert_eq!(cos, abs);
    }

    #[test]
    fn test_ratio_and_distance_against_hand_computed_baseline() {
        // Orthonormal rows: cosine matrix is the identity.
        let x = matrix(&[&[1.0, 0.0], &[0.0, 1.0]]);
        let eps = 1e-6;

        // k = 1: row/col neighbour mean is 1.0 everywhere, b = 1 + eps
        let ratio = to_rows(&margin_based_scoring(&x, &x, 1, MarginVariant::Ratio, eps).unwrap());
        let b = 1.0 + eps as f32;
        assert!((ratio[0][0] - 1.0 / b).abs() < 1e-6);
        assert!(ratio[0][1].abs() < 1e-6);

        // k = 2: neighbour means are 0.5, b = 0.5 + eps
        let dist =
            to_rows(&margin_based_scoring(&x, &x, 2, MarginVariant::Distance, eps).unwrap());
        assert!((dist[0][0] - (1.0 - 0.5 - eps as f32)).abs() < 1e-6);
        assert!((dist[1][0] - (0.0 - 0.5 - eps as f32)).abs() < 1e-6);
    }

    #[test]
    fn test_k_larger_than_set_shrinks() {
        let a = matrix(&[&[1.0, 0.0], &[0.0, 1.0]]);
        let b = matrix(&[&[1.0, 1.0]]);
        // n2 = 1 < k, n1 = 2 < k: must not error
        let score = margin_based_scoring(&a, &b, 10, MarginVariant::Ratio, DEFAULT_EPS).unwrap();
        assert_eq!(score.dims(), &[2, 1]);
    }

    #[test]
    fn test_k_zero_rejected() {
        let x = matrix(&[&[1.0, 0.0]]);
        assert!(margin_based_scoring(&x, &x, 0, MarginVariant::Ratio, DEFAULT_EPS).is_err());
    }

    #[test]
    fn test_identical_sets_retrieve_perfectly() {
        let x = matrix(&[
            &[1.0, 0.2, 0.0, 0.1],
            &[0.1, 1.0, 0.3, 0.0],
            &[0.0, 0.2, 1.0, 0.4],
            &[0.3, 0.0, 0.1, 1.0],
            &[0.5, 0.5, -0.5, 0.2],
        ]);
        for variant in [
            MarginVariant::Ratio,
            MarginVariant::Absolute,
            MarginVariant::Distance,
        ] {
            let scorer = MarginScorer::new(DEFAULT_K, variant, DEFAULT_EPS);
            let score = scorer.score(&x, &x).unwrap();
            assert_eq!(layer_accuracy(&score).unwrap(), 1.0, "{variant}");
        }
    }

    #[test]
    fn test_dog_cat_ratio_k1() {
        let dog_cat = matrix(&[&[0.9, 0.1, 0.3], &[0.2, 0.8, -0.4]]);
        let score = margin_based_scoring(&dog_cat, &dog_cat, 1, MarginVariant::Ratio, DEFAULT_EPS)
            .unwrap();
        let rows = to_rows(&score);
        assert!(rows[0][0] > rows[0][1]);
        assert!(rows[1][1] > rows[1][0]);
        assert_eq!(layer_accuracy(&score).unwrap(), 1.0);
    }

    #[test]
    fn test_layer_accuracy_partial() {
        let score = matrix(&[&[0.9, 0.1, 0.0], &[0.8, 0.2, 0.0], &[0.0, 0.1, 0.7]]);
        let acc = layer_accuracy(&score).unwrap();
        assert!((acc - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_argmax_ties_pick_first() {
        assert_eq!(argmax(&[0.5, 0.5, 0.1]), Some(0));
        assert_eq!(argmax(&[0.1, 0.7, 0.7]), Some(1));
        assert_eq!(argmax(&[]), None);

        // Row 1 ties between columns 0 and 1: first occurrence wins, so it misses
        let score = matrix(&[&[1.0, 0.0], &[0.5, 0.5]]);
        assert_eq!(layer_accuracy(&score).unwrap(), 0.5);
    }
}
