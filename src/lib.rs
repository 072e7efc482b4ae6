// Pedantic clippy configuration for ML/math codebase
// These are acceptable in numerical/ML code:
#![allow(clippy::cast_precision_loss)] // usize→f64/f32 intentional in ML
#![allow(clippy::cast_possible_truncation)] // usize→u32 in tensor indexing
#![allow(clippy::many_single_char_names)] // q, k, v, b, l standard in attention
#![allow(clippy::similar_names)] // related variables like `head`/`heads`
#![allow(clippy::module_name_repetitions)] // RetrievalModel in model.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
#![allow(clippy::missing_panics_doc)] // # Panics section for every panic
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::return_self_not_must_use)] // #[must_use] on Self returns
#![allow(clippy::needless_pass_by_value)] // value params for API flexibility

//! wordret-rs: layer-wise cross-lingual word retrieval
//!
//! Measures, for every hidden layer of a causal language model, how often
//! a target-language word retrieves its English translation under
//! margin-based (CSLS) scoring.
//!
//! ## Architecture
//!
//! - `model`: RetrievalModel wrapper and the HiddenStateSource capability
//! - `forward`: LLaMA / Qwen2 forward pass returning every layer's hidden states
//! - `masks`: Causal + padding attention masks for batched passes
//! - `representation`: Hidden-state stacks and pooled per-layer matrices
//! - `pooling`: Mean and last-token pooling
//! - `extract`: Batched representation extraction
//! - `scoring`: Cosine similarity, margin scoring and layer accuracy
//! - `corpus`: Aligned word-pair loading, filtering and sampling
//! - `prompt`: Few-shot prompt wrapping for target words
//! - `experiment`: Experiment runner coordinating the full pipeline
//! - `report`: Accuracy sinks (JSON report)
//! - `error`: Typed error variants

pub mod corpus;
pub mod error;
pub mod experiment;
pub mod extract;
pub mod forward;
pub mod masks;
pub mod model;
pub mod pooling;
pub mod prompt;
pub mod report;
pub mod representation;
pub mod scoring;

pub use corpus::{WordEntry, WordPairs};
pub use error::RetrievalError;
pub use experiment::{DataMode, Experiment, ExperimentConfig, ExperimentResults, LayerAccuracy};
pub use extract::{layer_representation, DEFAULT_BATCH_SIZE};
pub use forward::{DecoderConfig, DecoderModel};
pub use masks::create_padded_causal_mask;
pub use model::{HiddenStateSource, ModelArchitecture, RetrievalModel, TokenizedBatch};
pub use pooling::{last_token_pool, mean_pool, PoolingMode};
pub use prompt::{language_name, wrap_targets, PromptMode};
pub use report::{AccuracySink, JsonReportSink};
pub use representation::{HiddenStateStack, LayerRepresentation};
pub use scoring::{
    cosine_similarity, layer_accuracy, margin_based_scoring, MarginScorer, MarginVariant,
    DEFAULT_EPS, DEFAULT_K,
};
