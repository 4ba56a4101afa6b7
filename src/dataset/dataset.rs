use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use ndarray::Array2;

use crate::utils::error::{PipelineError, Result};

/// A labeled feature dataset loaded from CSV.
///
/// Every column except the last must be numeric; the last column is the
/// emotion label. The first row is treated as a header and skipped.
#[derive(Debug, Clone)]
pub struct EmotionDataset {
    pub features: Array2<f32>,
    pub labels: Vec<usize>,
    pub label_names: Vec<String>,
}

impl EmotionDataset {
    /// from_csv reads and validates the dataset file.
    ///
    /// # Arguments
    /// * `path` - CSV file of feature rows with a trailing label column
    ///
    /// # Returns
    /// * `Result<EmotionDataset, PipelineError>`
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;

        let mut rows: Vec<f32> = Vec::new();
        let mut raw_labels: Vec<String> = Vec::new();
        let mut width: Option<usize> = None;

        for (line, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() < 2 {
                return Err(PipelineError::Dataset(format!(
                    "row {}: expected feature columns and a label, got {} columns",
                    line + 1,
                    record.len()
                )));
            }

            let feature_count = record.len() - 1;
            match width {
                None => width = Some(feature_count),
                Some(expected) if expected != feature_count => {
                    return Err(PipelineError::Dataset(format!(
                        "row {}: expected {} feature columns, got {}",
                        line + 1,
                        expected,
                        feature_count
                    )));
                }
                Some(_) => {}
            }

            for (col, cell) in record.iter().take(feature_count).enumerate() {
                let value: f32 = cell.trim().parse().map_err(|_| {
                    PipelineError::Dataset(format!(
                        "row {}, column {}: non-numeric feature {:?}",
                        line + 1,
                        col + 1,
                        cell
                    ))
                })?;
                rows.push(value);
            }

            raw_labels.push(record[feature_count].trim().to_string());
        }

        let width = width
            .ok_or_else(|| PipelineError::Dataset("dataset contains no rows".to_string()))?;

        // sorted vocabulary keeps class indices stable across runs
        let label_names: Vec<String> = raw_labels
            .iter()
            .cloned()
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();
        let index_of: HashMap<&str, usize> = label_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let labels: Vec<usize> = raw_labels
            .iter()
            .map(|label| index_of[label.as_str()])
            .collect();

        let features = Array2::from_shape_vec((labels.len(), width), rows)
            .map_err(|e| PipelineError::Dataset(e.to_string()))?;

        Ok(EmotionDataset {
            features,
            labels,
            label_names,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.features.nrows()
    }

    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }
}
