//! Experiment runner for word retrieval
//!
//! Coordinates word-pair selection, prompt wrapping, representation
//! extraction for both sides, and per-layer margin scoring.

use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::corpus::WordPairs;
use crate::error::RetrievalError;
use crate::extract::{layer_representation, DEFAULT_BATCH_SIZE};
use crate::model::HiddenStateSource;
use crate::pooling::PoolingMode;
use crate::prompt::{wrap_targets, PromptMode};
use crate::scoring::{layer_accuracy, MarginScorer, MarginVariant, DEFAULT_EPS, DEFAULT_K};

/// Which word pairs enter a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    /// Every loaded pair
    #[default]
    Full,
    /// Pairs where both words are a single token
    Single,
    /// Random aligned subsets of `sample_size` pairs
    Sample,
}

impl fmt::Display for DataMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataMode::Full => write!(f, "full"),
            DataMode::Single => write!(f, "single"),
            DataMode::Sample => write!(f, "sample"),
        }
    }
}

/// Configuration for a word retrieval experiment
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    /// Model identifier, used in the run note
    pub model_id: String,
    /// Target language code, e.g. "gle_Latn"
    pub target_lang: String,
    /// Path to the word list (JSON array or JSON lines)
    pub dataset_path: String,
    /// Keep only the first n pairs of the word list
    pub limit: Option<usize>,
    pub data_mode: DataMode,
    pub prompt_mode: PromptMode,
    /// Pooling for the English side
    pub hidden_base: PoolingMode,
    /// Pooling for the target side
    pub hidden_target: PoolingMode,
    pub margin_variant: MarginVariant,
    /// Pairs per run in sample mode
    pub sample_size: usize,
    /// Number of sampling runs (sample mode only)
    pub runs: usize,
    /// Seed of the first sampling run; run i uses `seed + i`
    pub seed: u64,
    pub batch_size: usize,
    /// Neighbourhood size for the margin baseline
    pub k: usize,
    pub eps: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            model_id: "Qwen/Qwen2.5-0.5B".to_string(),
            target_lang: "gle_Latn".to_string(),
            dataset_path: "data/sla_words.jsonl".to_string(),
            limit: None,
            data_mode: DataMode::Full,
            prompt_mode: PromptMode::Zero,
            hidden_base: PoolingMode::Mean,
            hidden_target: PoolingMode::Mean,
            margin_variant: MarginVariant::Ratio,
            sample_size: 100,
            runs: 1,
            seed: 42,
            batch_size: DEFAULT_BATCH_SIZE,
            k: DEFAULT_K,
            eps: DEFAULT_EPS,
        }
    }
}

/// Retrieval accuracy for every layer, indexed 0..=L
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LayerAccuracy {
    accuracies: Vec<f64>,
}

impl LayerAccuracy {
    pub fn new(accuracies: Vec<f64>) -> Self {
        Self { accuracies }
    }

    pub fn get(&self, layer: usize) -> Option<f64> {
        self.accuracies.get(layer).copied()
    }

    pub fn len(&self) -> usize {
        self.accuracies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accuracies.is_empty()
    }

    /// `(layer, accuracy)` in layer order
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.accuracies.iter().copied().enumerate()
    }

    /// Highest accuracy; the lowest layer wins ties
    pub fn best_layer(&self) -> Option<(usize, f64)> {
        self.iter().fold(None, |best, (layer, acc)| match best {
            Some((_, best_acc)) if best_acc >= acc => best,
            _ => Some((layer, acc)),
        })
    }
}

/// Results from a full experiment
#[derive(Debug, Clone)]
pub struct ExperimentResults {
    /// One accuracy series per run
    pub runs: Vec<LayerAccuracy>,
    /// Number of word pairs each run used
    pub data_sizes: Vec<usize>,
}

impl ExperimentResults {
    /// Free-text description of the run configuration
    pub fn note(&self, config: &ExperimentConfig) -> String {
        let sample_size = match config.data_mode {
            DataMode::Sample => config.sample_size.to_string(),
            _ => "N/A".to_string(),
        };
        let data_sizes = self
            .data_sizes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Model: {}\n\
             Target Language: {}\n\
             Data: {}\n\
             Prompt: {}\n\
             Hidden Base: {}\n\
             Hidden Target: {}\n\
             Margin Variant: {}\n\
             Data Sample Size: {}\n\
             \n\
             Actual Data Size: {}",
            config.model_id,
            config.target_lang,
            config.data_mode,
            config.prompt_mode,
            config.hidden_base,
            config.hidden_target,
            config.margin_variant,
            sample_size,
            data_sizes
        )
    }
}

/// Main experiment runner
pub struct Experiment<S> {
    config: ExperimentConfig,
    source: S,
}

impl<S: HiddenStateSource> Experiment<S> {
    /// Create a new experiment
    pub fn new(source: S, config: ExperimentConfig) -> Self {
        Self { config, source }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Load the configured word list and run on it
    pub fn run(&self) -> Result<ExperimentResults> {
        let pairs = WordPairs::load(
            &self.config.dataset_path,
            &self.config.target_lang,
            self.config.limit,
        )?;
        self.run_on(&pairs)
    }

    /// Run on already loaded word pairs
    pub fn run_on(&self, pairs: &WordPairs) -> Result<ExperimentResults> {
        info!("Starting word retrieval experiment");
        debug!("Config: {:?}", self.config);

        let selections = match self.config.data_mode {
            DataMode::Full => vec![pairs.clone()],
            DataMode::Single => vec![pairs.filter_single_token(&self.source)?],
            DataMode::Sample => {
                anyhow::ensure!(self.config.runs > 0, "Number of runs must be at least 1");
                (0..self.config.runs as u64)
                    .map(|run| pairs.sample(self.config.sample_size, self.config.seed + run))
                    .collect()
            }
        };

        let mut runs = Vec::with_capacity(selections.len());
        let mut data_sizes = Vec::with_capacity(selections.len());

        for (run, selection) in selections.iter().enumerate() {
            info!(
                "Run {}/{}: {} word pairs",
                run + 1,
                selections.len(),
                selection.len()
            );
            anyhow::ensure!(!selection.is_empty(), "No word pairs left for run {}", run + 1);

            runs.push(self.evaluate(selection)?);
            data_sizes.push(selection.len());
        }

        Ok(ExperimentResults { runs, data_sizes })
    }

    /// Accuracy for every layer on one set of pairs
    fn evaluate(&self, pairs: &WordPairs) -> Result<LayerAccuracy> {
        let targets = wrap_targets(
            self.config.prompt_mode,
            &self.config.target_lang,
            pairs.target(),
        )?;

        let base_rep = layer_representation(
            &self.source,
            pairs.base(),
            self.config.batch_size,
            self.config.hidden_base,
        )?;
        let target_rep = layer_representation(
            &self.source,
            &targets,
            self.config.batch_size,
            self.config.hidden_target,
        )?;
        base_rep.ensure_aligned_with(&target_rep)?;

        let scorer = MarginScorer::new(self.config.k, self.config.margin_variant, self.config.eps);
        let mut accuracies = Vec::with_capacity(base_rep.n_layers());

        for (layer, (base, target)) in base_rep
            .layers()
            .iter()
            .zip(target_rep.layers())
            .enumerate()
        {
            let score = scorer.score(base, target)?;
            let accuracy = layer_accuracy(&score)?;
            debug!("Layer {} accuracy: {:.2}%", layer, accuracy * 100.0);
            accuracies.push(accuracy);
        }

        let accuracies = LayerAccuracy::new(accuracies);
        if let Some((layer, acc)) = accuracies.best_layer() {
            info!("Best layer: {} with {:.2}% accuracy", layer, acc * 100.0);
        } else {
            return Err(RetrievalError::EmptyAccuracy.into());
        }
        Ok(accuracies)
    }
}
