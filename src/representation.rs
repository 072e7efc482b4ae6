//! Containers for hidden states and pooled layer representations

use anyhow::Result;
use candle_core::{DType, Tensor};

use crate::error::RetrievalError;

/// Hidden states from one batched forward pass
///
/// Entry 0 is the embedding output, entry `n_layers() - 1` the final layer.
/// Each tensor has shape `(batch, seq_len, d_model)`.
#[derive(Debug)]
pub struct HiddenStateStack {
    layers: Vec<Tensor>,
}

impl HiddenStateStack {
    /// Create a stack from already collected layer tensors
    pub fn new(layers: Vec<Tensor>) -> Self {
        Self { layers }
    }

    /// Create an empty stack with capacity for n_layers
    pub fn with_capacity(n_layers: usize) -> Self {
        Self {
            layers: Vec::with_capacity(n_layers),
        }
    }

    /// Append the next layer's hidden states
    pub fn push(&mut self, tensor: Tensor) {
        self.layers.push(tensor);
    }

    pub fn get_layer(&self, layer: usize) -> Option<&Tensor> {
        self.layers.get(layer)
    }

    /// Number of layers, embedding layer included
    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Tensor] {
        &self.layers
    }
}

/// Per-layer sentence representations, dense over layers `0..n_layers`
///
/// Every layer holds an F32 matrix of shape `(n_sentences, d_model)` whose
/// row i belongs to the i-th input sentence.
#[derive(Debug, Clone)]
pub struct LayerRepresentation {
    layers: Vec<Tensor>,
    n_sentences: usize,
}

impl LayerRepresentation {
    /// Build from one matrix per layer; all layers must agree on shape
    pub fn new(layers: Vec<Tensor>) -> Result<Self> {
        let first = layers
            .first()
            .ok_or_else(|| anyhow::anyhow!("Layer representation has no layers"))?;
        let (n_sentences, d_model) = first.dims2()?;
        for (layer, tensor) in layers.iter().enumerate() {
            let dims = tensor.dims2()?;
            anyhow::ensure!(
                dims == (n_sentences, d_model),
                "Layer {layer} has shape {dims:?}, expected ({n_sentences}, {d_model})"
            );
        }
        let layers = layers
            .into_iter()
            .map(|t| t.to_dtype(DType::F32))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            layers,
            n_sentences,
        })
    }

    /// Get the representation matrix for a layer
    pub fn get_layer(&self, layer: usize) -> Option<&Tensor> {
        self.layers.get(layer)
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// Number of sentences (rows per layer)
    pub fn n_sentences(&self) -> usize {
        self.n_sentences
    }

    pub fn d_model(&self) -> Result<usize> {
        Ok(self.layers[0].dim(1)?)
    }

    pub fn layers(&self) -> &[Tensor] {
        &self.layers
    }

    /// Check that `other` can be scored against `self` layer by layer
    pub fn ensure_aligned_with(&self, other: &LayerRepresentation) -> Result<()> {
        if self.n_sentences != other.n_sentences {
            return Err(RetrievalError::AlignmentViolation {
                base: self.n_sentences,
                target: other.n_sentences,
            }
            .into());
        }
        if self.n_layers() != other.n_layers() {
            return Err(RetrievalError::LayerCountMismatch {
                expected: self.n_layers(),
                found: other.n_layers(),
            }
            .into());
        }
        Ok(())
    }
}
