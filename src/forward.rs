//! Decoder-only transformer forward pass returning every layer's hidden states
//!
//! Runs layer by layer over a right-padded batch and records the residual
//! stream after the embedding and after each decoder layer, in the Hugging
//! Face `output_hidden_states` layout:
//! - entry 0: token embeddings
//! - entries 1..L-1: outputs of decoder layers 0..L-2
//! - entry L: final RMS norm applied to the output of the last layer
//!
//! Covers the LLaMA family (LLaMA, Mistral; no QKV bias unless
//! `attention_bias` is set) and Qwen2 (bias on Q, K, V).
//! Inference only: no KV cache, weights are never modified.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{embedding, linear_b, linear_no_bias, Embedding, Linear, RmsNorm, VarBuilder};
use hf_hub::{api::sync::Api, Repo, RepoType};
use tracing::{debug, info};

use crate::masks::create_padded_causal_mask;
use crate::model::ModelArchitecture;
use crate::representation::HiddenStateStack;

/// Longest sequence the rotary table is built for
const MAX_ROPE_POSITIONS: usize = 8192;

/// Model configuration (subset of HuggingFace config.json)
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DecoderConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    pub num_hidden_layers: usize,
    pub vocab_size: usize,
    #[serde(default)]
    pub head_dim: Option<usize>,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub attention_bias: bool,
    #[serde(default)]
    pub rope_scaling: Option<RopeScaling>,
}

/// llama3-style frequency scaling
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RopeScaling {
    #[serde(default)]
    pub rope_type: Option<String>,
    pub factor: f64,
    #[serde(default = "default_low_freq_factor")]
    pub low_freq_factor: f64,
    #[serde(default = "default_high_freq_factor")]
    pub high_freq_factor: f64,
    #[serde(default = "default_original_max_position_embeddings")]
    pub original_max_position_embeddings: usize,
}

fn default_rope_theta() -> f64 {
    10_000.0
}

fn default_rms_norm_eps() -> f64 {
    1e-6
}

fn default_max_position_embeddings() -> usize {
    4096
}

fn default_low_freq_factor() -> f64 {
    1.0
}

fn default_high_freq_factor() -> f64 {
    4.0
}

fn default_original_max_position_embeddings() -> usize {
    8192
}

impl DecoderConfig {
    fn head_dim(&self) -> usize {
        self.head_dim
            .unwrap_or(self.hidden_size / self.num_attention_heads)
    }

    fn num_kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    /// Whether Q, K, V projections carry a bias for this architecture
    fn qkv_bias(&self, architecture: ModelArchitecture) -> bool {
        match architecture {
            ModelArchitecture::Qwen2 => true,
            ModelArchitecture::Llama => self.attention_bias,
        }
    }

    fn inverse_frequencies(&self) -> Vec<f64> {
        let dim = self.head_dim();
        let inv_freq: Vec<f64> = (0..dim)
            .step_by(2)
            .map(|i| 1.0 / self.rope_theta.powf(i as f64 / dim as f64))
            .collect();

        match &self.rope_scaling {
            Some(scaling) if scaling.rope_type.as_deref() == Some("llama3") => {
                let old_ctx = scaling.original_max_position_embeddings as f64;
                let low_freq_wavelen = old_ctx / scaling.low_freq_factor;
                let high_freq_wavelen = old_ctx / scaling.high_freq_factor;
                inv_freq
                    .into_iter()
                    .map(|freq| {
                        let wavelen = 2.0 * std::f64::consts::PI / freq;
                        if wavelen < high_freq_wavelen {
                            freq
                        } else if wavelen > low_freq_wavelen {
                            freq / scaling.factor
                        } else {
                            let smooth = (old_ctx / wavelen - scaling.low_freq_factor)
                                / (scaling.high_freq_factor - scaling.low_freq_factor);
                            (1.0 - smooth) * freq / scaling.factor + smooth * freq
                        }
                    })
                    .collect()
            }
            _ => inv_freq,
        }
    }
}

/// Rotary Position Embeddings (RoPE), half-rotation layout
struct RotaryEmbedding {
    cos: Tensor,
    sin: Tensor,
}

impl RotaryEmbedding {
    fn new(config: &DecoderConfig, device: &Device, dtype: DType) -> Result<Self> {
        let max_seq_len = config.max_position_embeddings.min(MAX_ROPE_POSITIONS);
        let inv_freq: Vec<f32> = config
            .inverse_frequencies()
            .into_iter()
            .map(|f| f as f32)
            .collect();
        let n_freq = inv_freq.len();
        let inv_freq = Tensor::from_vec(inv_freq, (1, n_freq), device)?;

        let positions: Vec<f32> = (0..max_seq_len).map(|i| i as f32).collect();
        let positions = Tensor::from_vec(positions, (max_seq_len, 1), device)?;

        // [seq_len, head_dim/2]
        let freqs = positions.matmul(&inv_freq)?;
        Ok(Self {
            cos: freqs.cos()?.to_dtype(dtype)?,
            sin: freqs.sin()?.to_dtype(dtype)?,
        })
    }

    fn apply(&self, q: &Tensor, k: &Tensor) -> Result<(Tensor, Tensor)> {
        let seq_len = q.dim(2)?;
        let table_len = self.cos.dim(0)?;
        anyhow::ensure!(
            seq_len <= table_len,
            "Sequence of {seq_len} tokens exceeds rotary table ({table_len})"
        );
        let cos = self.cos.narrow(0, 0, seq_len)?;
        let sin = self.sin.narrow(0, 0, seq_len)?;

        let q_embed = candle_nn::rotary_emb::rope(&q.contiguous()?, &cos, &sin)?;
        let k_embed = candle_nn::rotary_emb::rope(&k.contiguous()?, &cos, &sin)?;
        Ok((q_embed, k_embed))
    }
}

/// Multi-head attention with grouped KV heads
struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &DecoderConfig, qkv_bias: bool) -> Result<Self> {
        let head_dim = config.head_dim();
        let num_heads = config.num_attention_heads;
        let num_kv_heads = config.num_kv_heads();

        let q_proj = linear_b(config.hidden_size, num_heads * head_dim, qkv_bias, vb.pp("q_proj"))?;
        let k_proj =
            linear_b(config.hidden_size, num_kv_heads * head_dim, qkv_bias, vb.pp("k_proj"))?;
        let v_proj =
            linear_b(config.hidden_size, num_kv_heads * head_dim, qkv_bias, vb.pp("v_proj"))?;
        let o_proj = linear_no_bias(num_heads * head_dim, config.hidden_size, vb.pp("o_proj"))?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            num_heads,
            num_kv_heads,
            head_dim,
        })
    }

    /// `mask` is the F32 additive mask `[batch, 1, seq, seq]`
    fn forward(&self, x: &Tensor, rotary: &RotaryEmbedding, mask: &Tensor) -> Result<Tensor> {
        let (b, seq_len, _) = x.dims3()?;
        let dtype = x.dtype();

        let q = self
            .q_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = self
            .k_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = self
            .v_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;

        let (q, k) = rotary.apply(&q, &k)?;

        let n_rep = self.num_heads / self.num_kv_heads;
        let k = repeat_kv(k, n_rep)?.contiguous()?;
        let v = repeat_kv(v, n_rep)?.contiguous()?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let attn_weights = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? * scale)?;

        // Softmax in F32 so -inf padding and bf16 activations stay stable
        let attn_weights = attn_weights.to_dtype(DType::F32)?.broadcast_add(mask)?;
        let attn_weights = candle_nn::ops::softmax_last_dim(&attn_weights)?.to_dtype(dtype)?;
        let attn_output = attn_weights.matmul(&v)?;

        let attn_output = attn_output.transpose(1, 2)?.reshape((b, seq_len, ()))?;
        Ok(self.o_proj.forward(&attn_output)?)
    }
}

fn repeat_kv(x: Tensor, n_rep: usize) -> Result<Tensor> {
    if n_rep == 1 {
        return Ok(x);
    }
    let (b, num_kv_heads, seq_len, head_dim) = x.dims4()?;
    let x = x.unsqueeze(2)?;
    let x = x.expand((b, num_kv_heads, n_rep, seq_len, head_dim))?;
    Ok(x.reshape((b, num_kv_heads * n_rep, seq_len, head_dim))?)
}

/// SwiGLU feed-forward block
struct FeedForward {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
}

impl FeedForward {
    fn load(vb: VarBuilder, config: &DecoderConfig) -> Result<Self> {
        Ok(Self {
            gate_proj: linear_no_bias(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("gate_proj"),
            )?,
            up_proj: linear_no_bias(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("up_proj"),
            )?,
            down_proj: linear_no_bias(
                config.intermediate_size,
                config.hidden_size,
                vb.pp("down_proj"),
            )?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gate = candle_nn::ops::silu(&self.gate_proj.forward(x)?)?;
        let up = self.up_proj.forward(x)?;
        Ok(self.down_proj.forward(&(gate * up)?)?)
    }
}

/// Pre-norm decoder layer
struct DecoderLayer {
    self_attn: Attention,
    mlp: FeedForward,
    input_layernorm: RmsNorm,
    post_attention_layernorm: RmsNorm,
}

impl DecoderLayer {
    fn load(vb: VarBuilder, config: &DecoderConfig, qkv_bias: bool) -> Result<Self> {
        Ok(Self {
            self_attn: Attention::load(vb.pp("self_attn"), config, qkv_bias)?,
            mlp: FeedForward::load(vb.pp("mlp"), config)?,
            input_layernorm: candle_nn::rms_norm(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("input_layernorm"),
            )?,
            post_attention_layernorm: candle_nn::rms_norm(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )?,
        })
    }

    fn forward(&self, x: &Tensor, rotary: &RotaryEmbedding, mask: &Tensor) -> Result<Tensor> {
        let residual = x;
        let h = self.input_layernorm.forward(x)?;
        let h = self.self_attn.forward(&h, rotary, mask)?;
        let x = (residual + h)?;

        let residual = &x;
        let h = self.post_attention_layernorm.forward(&x)?;
        let h = self.mlp.forward(&h)?;
        Ok((residual + h)?)
    }
}

/// Safetensors index for sharded models
#[derive(Debug, serde::Deserialize)]
struct SafetensorsIndex {
    weight_map: std::collections::HashMap<String, String>,
}

/// Decoder-only model that exposes every layer's hidden states
pub struct DecoderModel {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    rotary: RotaryEmbedding,
    hidden_size: usize,
}

impl DecoderModel {
    /// Load config and weights from HuggingFace
    pub fn load(
        model_id: &str,
        architecture: ModelArchitecture,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        info!("Loading {:?} decoder from: {}", architecture, model_id);

        let api = Api::new()?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .context("Failed to download config.json")?;
        let config_str = std::fs::read_to_string(&config_path).context("Failed to read config")?;
        let config: DecoderConfig = serde_json::from_str(&config_str)?;

        info!(
            "Model config: {} layers, {} hidden, {} vocab",
            config.num_hidden_layers, config.hidden_size, config.vocab_size
        );

        let weights_paths = if let Ok(index_path) = repo.get("model.safetensors.index.json") {
            info!("Model is sharded, loading index...");
            let index_str = std::fs::read_to_string(&index_path).context("Failed to read index")?;
            let index: SafetensorsIndex = serde_json::from_str(&index_str)?;

            let mut shard_names: Vec<String> = index.weight_map.values().cloned().collect();
            shard_names.sort();
            shard_names.dedup();

            info!("Downloading {} shard files...", shard_names.len());
            shard_names
                .iter()
                .map(|name| {
                    repo.get(name)
                        .with_context(|| format!("Failed to download {name}"))
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            let path = repo
                .get("model.safetensors")
                .context("Failed to download model.safetensors")?;
            vec![path]
        };

        info!("Loading weights from {} file(s)...", weights_paths.len());
        // SAFETY: the safetensors files are not modified while mapped
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights_paths, dtype, device)? };
        Self::from_var_builder(&config, architecture, vb, device, dtype)
    }

    /// Build the model from an already opened weight source
    pub fn from_var_builder(
        config: &DecoderConfig,
        architecture: ModelArchitecture,
        vb: VarBuilder,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let vb_model = vb.pp("model");
        let qkv_bias = config.qkv_bias(architecture);

        let embed_tokens = embedding(
            config.vocab_size,
            config.hidden_size,
            vb_model.pp("embed_tokens"),
        )?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            if (i + 1) % 10 == 0 || i == 0 {
                info!("Loading layer {}/{}", i + 1, config.num_hidden_layers);
            }
            layers.push(DecoderLayer::load(
                vb_model.pp(format!("layers.{i}")),
                config,
                qkv_bias,
            )?);
        }

        let norm =
            candle_nn::rms_norm(config.hidden_size, config.rms_norm_eps, vb_model.pp("norm"))?;
        let rotary = RotaryEmbedding::new(config, device, dtype)?;

        info!(
            "Model loaded with {} layers ({} hidden states per pass)",
            config.num_hidden_layers,
            config.num_hidden_layers + 1
        );

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            rotary,
            hidden_size: config.hidden_size,
        })
    }

    /// Number of decoder layers (hidden-state stacks hold one more)
    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn d_model(&self) -> usize {
        self.hidden_size
    }

    /// Single forward pass over a right-padded batch
    ///
    /// `input_ids` and `attention_mask` are `(batch, seq_len)`. Returns
    /// `n_layers() + 1` tensors of shape `(batch, seq_len, d_model)`.
    pub fn forward_hidden_states(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> Result<HiddenStateStack> {
        let mask = create_padded_causal_mask(attention_mask)?;
        let mut stack = HiddenStateStack::with_capacity(self.layers.len() + 1);

        let mut hidden = self.embed_tokens.forward(input_ids)?;
        stack.push(hidden.clone());

        let last = self.layers.len().saturating_sub(1);
        for (i, layer) in self.layers.iter().enumerate() {
            hidden = layer.forward(&hidden, &self.rotary, &mask)?;
            if i < last {
                stack.push(hidden.clone());
            }
            if (i + 1) % 10 == 0 {
                debug!("Processed layer {}/{}", i + 1, self.layers.len());
            }
        }

        stack.push(self.norm.forward(&hidden)?);
        Ok(stack)
    }
}
