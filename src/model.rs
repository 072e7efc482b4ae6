//! RetrievalModel wrapper: tokenizer + decoder + device
//!
//! Exposes the two capabilities the extractor needs through the
//! [`HiddenStateSource`] trait: right-padded batch tokenization and a
//! single forward pass returning every layer's hidden states.

use std::fmt;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use hf_hub::{api::sync::Api, Repo, RepoType};
use serde::Serialize;
use tokenizers::{PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer};
use tracing::{info, warn};

use crate::forward::DecoderModel;
use crate::representation::HiddenStateStack;

/// Candidate padding tokens, tried in order when the tokenizer has none
const PAD_TOKEN_CANDIDATES: &[&str] = &[
    "<pad>",
    "<|endoftext|>",
    "<|end_of_text|>",
    "</s>",
    "<|im_end|>",
    "<eos>",
    "<unk>",
];

/// Supported model architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelArchitecture {
    /// LLaMA / Mistral family (no QKV bias by default)
    Llama,
    /// Qwen2 / Qwen2.5 (QKV bias)
    Qwen2,
}

impl ModelArchitecture {
    /// Detect architecture from model ID
    pub fn from_model_id(model_id: &str) -> Self {
        let model_lower = model_id.to_lowercase();
        if model_lower.contains("qwen") {
            ModelArchitecture::Qwen2
        } else if model_lower.contains("llama") || model_lower.contains("mistral") {
            ModelArchitecture::Llama
        } else {
            info!(
                "Unknown model architecture for '{}', defaulting to Llama",
                model_id
            );
            ModelArchitecture::Llama
        }
    }
}

impl fmt::Display for ModelArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelArchitecture::Llama => write!(f, "llama"),
            ModelArchitecture::Qwen2 => write!(f, "qwen2"),
        }
    }
}

/// Token ids and attention mask for one batch, both `(batch, seq_len)` u32
///
/// Right-padded to the longest sequence of this batch only.
#[derive(Debug)]
pub struct TokenizedBatch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
}

impl TokenizedBatch {
    /// Build from per-sequence id and mask rows of equal length
    pub fn from_rows(ids: Vec<Vec<u32>>, mask: Vec<Vec<u32>>, device: &Device) -> Result<Self> {
        let batch = ids.len();
        anyhow::ensure!(batch > 0, "Empty batch");
        anyhow::ensure!(mask.len() == batch, "Mask rows do not match id rows");
        let seq_len = ids[0].len();
        anyhow::ensure!(
            ids.iter().chain(mask.iter()).all(|row| row.len() == seq_len),
            "Batch rows are not padded to a common length"
        );

        let input_ids = Tensor::from_vec(ids.concat(), (batch, seq_len), device)?;
        let attention_mask = Tensor::from_vec(mask.concat(), (batch, seq_len), device)?;
        Ok(Self {
            input_ids,
            attention_mask,
        })
    }

    pub fn batch_size(&self) -> Result<usize> {
        Ok(self.input_ids.dim(0)?)
    }

    pub fn seq_len(&self) -> Result<usize> {
        Ok(self.input_ids.dim(1)?)
    }
}

/// Model capability required by the representation extractor
pub trait HiddenStateSource {
    /// Tokenize with dynamic right padding to the batch's longest sequence
    fn tokenize_batch(&self, texts: &[&str]) -> Result<TokenizedBatch>;

    /// One inference-only forward pass; embedding layer through final layer
    fn hidden_states(&self, batch: &TokenizedBatch) -> Result<HiddenStateStack>;

    /// Number of tokens `text` encodes to, special tokens excluded
    fn token_count(&self, text: &str) -> Result<usize>;
}

/// High-level model wrapper for retrieval experiments
pub struct RetrievalModel {
    model: DecoderModel,
    tokenizer: Tokenizer,
    device: Device,
    architecture: ModelArchitecture,
    model_id: String,
}

impl RetrievalModel {
    /// Load a model from HuggingFace (tries CUDA, falls back to CPU)
    pub fn from_pretrained(model_id: &str) -> Result<Self> {
        Self::from_pretrained_with_device(model_id, None)
    }

    /// Load with explicit device choice (None = auto-detect)
    pub fn from_pretrained_with_device(model_id: &str, force_cpu: Option<bool>) -> Result<Self> {
        let architecture = ModelArchitecture::from_model_id(model_id);
        Self::from_pretrained_with_arch(model_id, force_cpu, architecture)
    }

    /// Load with an explicit architecture instead of detecting it
    pub fn from_pretrained_with_arch(
        model_id: &str,
        force_cpu: Option<bool>,
        architecture: ModelArchitecture,
    ) -> Result<Self> {
        let (device, dtype) = if force_cpu == Some(true) {
            info!("Forcing CPU mode");
            (Device::Cpu, DType::F32)
        } else {
            match Device::cuda_if_available(0) {
                Ok(dev) if dev.is_cuda() => {
                    info!("Using CUDA device");
                    (dev, DType::BF16)
                }
                _ => {
                    info!("CUDA not available, using CPU");
                    (Device::Cpu, DType::F32)
                }
            }
        };

        info!("Loading model: {}", model_id);
        info!("Architecture: {:?}", architecture);
        info!("Device: {:?}", device);
        info!("Dtype: {:?}", dtype);

        let api = Api::new()?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));
        let tokenizer_path = repo
            .get("tokenizer.json")
            .context("Failed to download tokenizer.json")?;
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Tokenizer error: {e}"))?;
        configure_right_padding(&mut tokenizer)?;

        let model = DecoderModel::load(model_id, architecture, &device, dtype)?;

        Ok(Self {
            model,
            tokenizer,
            device,
            architecture,
            model_id: model_id.to_string(),
        })
    }

    pub fn architecture(&self) -> ModelArchitecture {
        self.architecture
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of decoder layers
    pub fn n_layers(&self) -> usize {
        self.model.n_layers()
    }

    /// Hidden dimension of the model
    pub fn d_model(&self) -> usize {
        self.model.d_model()
    }
}

/// Pad to the longest sequence of each batch, on the right
///
/// Keeps an already configured pad token; otherwise picks the first
/// end-of-sequence or unknown token present in the vocabulary.
fn configure_right_padding(tokenizer: &mut Tokenizer) -> Result<()> {
    let (pad_id, pad_token) = match tokenizer.get_padding() {
        Some(params) => (params.pad_id, params.pad_token.clone()),
        None => {
            let vocab = tokenizer.get_vocab(true);
            let (token, id) = PAD_TOKEN_CANDIDATES
                .iter()
                .find_map(|t| vocab.get(*t).map(|id| (t.to_string(), *id)))
                .ok_or_else(|| anyhow::anyhow!("Tokenizer has no usable padding token"))?;
            warn!("Tokenizer has no pad token, padding with {token:?} ({id})");
            (id, token)
        }
    };

    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        direction: PaddingDirection::Right,
        pad_id,
        pad_token,
        ..Default::default()
    }));
    Ok(())
}

impl HiddenStateSource for RetrievalModel {
    fn tokenize_batch(&self, texts: &[&str]) -> Result<TokenizedBatch> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization error: {e}"))?;

        let ids = encodings.iter().map(|e| e.get_ids().to_vec()).collect();
        let mask = encodings
            .iter()
            .map(|e| e.get_attention_mask().to_vec())
            .collect();
        TokenizedBatch::from_rows(ids, mask, &self.device)
    }

    fn hidden_states(&self, batch: &TokenizedBatch) -> Result<HiddenStateStack> {
        self.model
            .forward_hidden_states(&batch.input_ids, &batch.attention_mask)
    }

    fn token_count(&self, text: &str) -> Result<usize> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenization error: {e}"))?;
        Ok(encoding.get_ids().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_detection() {
        assert_eq!(
            ModelArchitecture::from_model_id("Qwen/Qwen2.5-0.5B"),
            ModelArchitecture::Qwen2
        );
        assert_eq!(
            ModelArchitecture::from_model_id("meta-llama/Llama-3.2-1B"),
            ModelArchitecture::Llama
        );
        assert_eq!(
            ModelArchitecture::from_model_id("mistralai/Mistral-7B-v0.1"),
            ModelArchitecture::Llama
        );
        assert_eq!(
            ModelArchitecture::from_model_id("some/unknown-model"),
            ModelArchitecture::Llama
        );
    }

    #[test]
    fn test_tokenized_batch_from_rows() {
        let batch = TokenizedBatch::from_rows(
            vec![vec![5, 6, 7], vec![8, 0, 0]],
            vec![vec![1, 1, 1], vec![1, 0, 0]],
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(batch.batch_size().unwrap(), 2);
        assert_eq!(batch.seq_len().unwrap(), 3);

        let mask: Vec<Vec<u32>> = batch.attention_mask.to_vec2().unwrap();
        assert_eq!(mask[1], vec![1, 0, 0]);
    }

    #[test]
    fn test_tokenized_batch_rejects_ragged_rows() {
        let result = TokenizedBatch::from_rows(
            vec![vec![5, 6, 7], vec![8]],
            vec![vec![1, 1, 1], vec![1]],
            &Device::Cpu,
        );
        assert!(result.is_err());
    }
}
