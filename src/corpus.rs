//! Word-pair loading for retrieval experiments
//!
//! Base (English gloss) and target words are two index-aligned columns.
//! Every operation here keeps that alignment: filtering and sampling pick
//! the same indices from both sides.

use anyhow::{Context, Result};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RetrievalError;
use crate::model::HiddenStateSource;

/// One record of the SLA word list export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordEntry {
    /// Language code, e.g. "gle_Latn"
    pub lang: String,
    /// Word in the target language
    pub word: String,
    /// English gloss
    pub eng: String,
}

/// Index-aligned base and target word columns
#[derive(Debug, Clone, PartialEq)]
pub struct WordPairs {
    base: Vec<String>,
    target: Vec<String>,
}

impl WordPairs {
    /// Pair two columns; fails fast on unequal lengths
    pub fn from_columns(base: Vec<String>, target: Vec<String>) -> Result<Self> {
        if base.len() != target.len() {
            return Err(RetrievalError::AlignmentViolation {
                base: base.len(),
                target: target.len(),
            }
            .into());
        }
        Ok(Self { base, target })
    }

    /// Load the pairs for one language from a JSON array or JSON-lines file
    ///
    /// `word` becomes the target side, `eng` the base side. `limit` keeps
    /// only the first n matching records.
    pub fn load(path: &str, lang: &str, limit: Option<usize>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
        let entries = parse_entries(&content).with_context(|| format!("Failed to parse {path}"))?;
        info!("Read {} word entries from {}", entries.len(), path);

        let (base, target): (Vec<String>, Vec<String>) = entries
            .into_iter()
            .filter(|e| e.lang == lang)
            .take(limit.unwrap_or(usize::MAX))
            .map(|e| (e.eng, e.word))
            .unzip();

        info!("Kept {} pairs for language {}", base.len(), lang);
        Self::from_columns(base, target)
    }

    /// Keep pairs where both words encode to exactly one token
    pub fn filter_single_token<S>(&self, source: &S) -> Result<Self>
    where
        S: HiddenStateSource + ?Sized,
    {
        let mut base = Vec::new();
        let mut target = Vec::new();
        for (b, t) in self.base.iter().zip(&self.target) {
            if source.token_count(b)? == 1 && source.token_count(t)? == 1 {
                base.push(b.clone());
                target.push(t.clone());
            }
        }
        debug!(
            "Single-token filter kept {}/{} pairs",
            base.len(),
            self.len()
        );
        Self::from_columns(base, target)
    }

    /// Sample `min(n, len)` pairs without replacement, same indices on both sides
    pub fn sample(&self, n: usize, seed: u64) -> Self {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let amount = n.min(self.len());
        let indices = rand::seq::index::sample(&mut rng, self.len(), amount);

        let base = indices.iter().map(|i| self.base[i].clone()).collect();
        let target = indices.iter().map(|i| self.target[i].clone()).collect();
        Self { base, target }
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// English glosses
    pub fn base(&self) -> &[String] {
        &self.base
    }

    /// Target-language words
    pub fn target(&self) -> &[String] {
        &self.target
    }
}

fn parse_entries(content: &str) -> Result<Vec<WordEntry>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid record on line {}", i + 1))
        })
        .collect()
}
