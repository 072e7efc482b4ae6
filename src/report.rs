//! Result sinks for layer accuracy series

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::error::RetrievalError;
use crate::experiment::LayerAccuracy;

/// Destination for finished accuracy series
pub trait AccuracySink {
    /// Persist `runs` together with the run note, returning the artifact path
    fn publish(&self, runs: &[LayerAccuracy], note: &str) -> Result<PathBuf>;
}

#[derive(Debug, Serialize)]
struct LayerPoint {
    layer: usize,
    accuracy: f64,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    note: &'a str,
    runs: Vec<Vec<LayerPoint>>,
}

/// Writes `{YYYYmmdd_HHMMSS}_layer_accuracy.json` into a directory
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    output_dir: PathBuf,
}

impl JsonReportSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl AccuracySink for JsonReportSink {
    fn publish(&self, runs: &[LayerAccuracy], note: &str) -> Result<PathBuf> {
        if runs.is_empty() || runs.iter().any(LayerAccuracy::is_empty) {
            return Err(RetrievalError::EmptyAccuracy.into());
        }

        let report = Report {
            note,
            runs: runs
                .iter()
                .map(|run| {
                    run.iter()
                        .map(|(layer, accuracy)| LayerPoint { layer, accuracy })
                        .collect()
                })
                .collect(),
        };

        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("Failed to create {}", self.output_dir.display())
        })?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = self
            .output_dir
            .join(format!("{timestamp}_layer_accuracy.json"));

        std::fs::write(&path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Layer accuracy saved to {}", path.display());

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_writes_sorted_points() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonReportSink::new(dir.path().join("artifacts"));
        let runs = vec![LayerAccuracy::new(vec![0.25, 0.5, 0.75])];

        let path = sink.publish(&runs, "Model: test").unwrap();
        assert!(path.starts_with(sink.output_dir()));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_layer_accuracy.json"));

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["note"], "Model: test");
        let points = value["runs"][0].as_array().unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[2]["layer"], 2);
        assert_eq!(points[2]["accuracy"], 0.75);
    }

    #[test]
    fn test_publish_rejects_empty_results() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonReportSink::new(dir.path());

        for runs in [vec![], vec![LayerAccuracy::new(vec![])]] {
            let err = sink.publish(&runs, "").unwrap_err();
            assert_eq!(
                err.downcast_ref::<RetrievalError>(),
                Some(&RetrievalError::EmptyAccuracy)
            );
        }
    }
}
