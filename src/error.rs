//! Error taxonomy for the retrieval pipeline
//!
//! Functions return `anyhow::Result`; these variants ride inside
//! `anyhow::Error` and can be recovered with `downcast_ref`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    /// Base and target sequences differ in length
    #[error("alignment violation: {base} base items vs {target} target items")]
    AlignmentViolation { base: usize, target: usize },

    /// Nothing to hand to the result sink
    #[error("layer accuracy mapping is empty")]
    EmptyAccuracy,

    /// Zero-norm or non-finite row in a representation matrix
    #[error("degenerate vector in {side} representations at row {row}")]
    DegenerateVector { side: &'static str, row: usize },

    /// A sequence in a batch has no unmasked tokens
    #[error("sequence {row} has no unmasked tokens")]
    EmptySequence { row: usize },

    /// Two hidden-state stacks disagree on the number of layers
    #[error("expected {expected} hidden-state layers, found {found}")]
    LayerCountMismatch { expected: usize, found: usize },
}
