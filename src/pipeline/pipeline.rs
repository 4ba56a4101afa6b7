use std::path::Path;

use opencv::core::Mat;

use crate::config::config::{Algorithm, ClassifierConfig};
use crate::dataset::dataset::EmotionDataset;
use crate::helper::land_marker::{DetectedFace, LandmarkExtractor};
use crate::modules::random_forest::RandomForest;
use crate::utils::error::{PipelineError, Result};

/// EmotionPipeline is the immutable inference object built once at startup:
/// a landmark extractor plus a classifier fitted from the labeled dataset.
pub struct EmotionPipeline {
    land_marker: Box<dyn LandmarkExtractor>,
    forest: RandomForest,
    label_names: Vec<String>,
}

impl EmotionPipeline {
    /// fit loads the dataset, validates its shape against the extractor and
    /// trains the configured classifier.
    ///
    /// # Arguments
    /// * `land_marker` - landmark extraction backend
    /// * `dataset_path` - CSV of feature rows with a trailing label column
    /// * `config` - classifier selection and hyperparameters
    ///
    /// # Returns
    /// * `Result<EmotionPipeline, PipelineError>`
    pub fn fit(
        land_marker: Box<dyn LandmarkExtractor>,
        dataset_path: &Path,
        config: &ClassifierConfig,
    ) -> Result<Self> {
        let dataset = EmotionDataset::from_csv(dataset_path)?;

        let expected = land_marker.num_landmarks() * 2;
        if dataset.num_features() != expected {
            return Err(PipelineError::Dataset(format!(
                "dataset has {} feature columns, expected {} ({} landmarks x 2)",
                dataset.num_features(),
                expected,
                land_marker.num_landmarks()
            )));
        }

        let forest = match config.algorithm {
            Algorithm::RandomForest => RandomForest::fit(
                dataset.features.view(),
                &dataset.labels,
                dataset.label_names.len(),
                config,
            )?,
        };

        tracing::info!(
            samples = dataset.num_samples(),
            labels = dataset.label_names.len(),
            trees = forest.num_trees(),
            "classifier fitted"
        );

        Ok(EmotionPipeline {
            land_marker,
            forest,
            label_names: dataset.label_names,
        })
    }

    /// classify predicts the emotion label for a grayscale face image.
    ///
    /// # Arguments
    /// * `gray` - single-channel grayscale matrix
    ///
    /// # Returns
    /// * `Result<String, PipelineError>`
    pub fn classify(&self, gray: &Mat) -> Result<String> {
        let face = self.land_marker.extract(gray)?;
        let features = feature_vector(&face);
        let class = self.forest.predict(&features);
        Ok(self.label_names[class].clone())
    }

    /// The label vocabulary in class-index order.
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }
}

/// feature_vector flattens the landmark coordinates, normalized to the face
/// region.
fn feature_vector(face: &DetectedFace) -> Vec<f32> {
    let mut features = Vec::with_capacity(face.landmarks.len() * 2);
    for point in &face.landmarks.points {
        let normalized = face.region.normalize_point(*point);
        features.push(normalized.x);
        features.push(normalized.y);
    }
    features
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use opencv::core::{Scalar, CV_8UC1};
    use tempfile::NamedTempFile;

    use crate::utils::coordinate::{BoundingBox, Coordinate2D, LandmarkSet};

    use super::*;

    /// Stub extractor that reports four landmarks at a fixed normalized
    /// position inside a 100x100 region.
    struct FixedExtractor {
        normalized: f32,
    }

    impl LandmarkExtractor for FixedExtractor {
        fn extract(&self, _gray: &Mat) -> Result<DetectedFace> {
            let region = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
            let points = (0..4)
                .map(|_| Coordinate2D::new(self.normalized * 100.0, self.normalized * 100.0))
                .collect();
            Ok(DetectedFace {
                region,
                landmarks: LandmarkSet::new(points),
            })
        }

        fn num_landmarks(&self) -> usize {
            4
        }
    }

    fn training_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp dataset");
        writeln!(file, "x0,y0,x1,y1,x2,y2,x3,y3,emotion").expect("header");
        for _ in 0..10 {
            writeln!(file, "0.9,0.9,0.9,0.9,0.9,0.9,0.9,0.9,happy").expect("row");
            writeln!(file, "0.1,0.1,0.1,0.1,0.1,0.1,0.1,0.1,sad").expect("row");
        }
        file.flush().expect("flush");
        file
    }

    fn gray_image() -> Mat {
        Mat::new_rows_cols_with_default(64, 64, CV_8UC1, Scalar::all(128.0))
            .expect("create image")
    }

    #[test]
    fn classifies_with_fitted_forest() {
        let dataset = training_csv();
        let mut config = ClassifierConfig::new();
        config.num_trees = 25;

        let pipeline = EmotionPipeline::fit(
            Box::new(FixedExtractor { normalized: 0.9 }),
            dataset.path(),
            &config,
        )
        .expect("fit pipeline");

        assert_eq!(pipeline.label_names(), ["happy", "sad"]);
        assert_eq!(pipeline.classify(&gray_image()).expect("classify"), "happy");
    }

    #[test]
    fn prediction_stays_in_vocabulary() {
        let dataset = training_csv();
        let mut config = ClassifierConfig::new();
        config.num_trees = 25;

        let pipeline = EmotionPipeline::fit(
            Box::new(FixedExtractor { normalized: 0.1 }),
            dataset.path(),
            &config,
        )
        .expect("fit pipeline");

        let label = pipeline.classify(&gray_image()).expect("classify");
        assert!(pipeline.label_names().contains(&label));
        assert_eq!(label, "sad");
    }

    #[test]
    fn rejects_feature_width_mismatch() {
        let mut file = NamedTempFile::new().expect("create temp dataset");
        writeln!(file, "a,b,emotion").expect("header");
        writeln!(file, "0.1,0.2,happy").expect("row");
        file.flush().expect("flush");

        let result = EmotionPipeline::fit(
            Box::new(FixedExtractor { normalized: 0.5 }),
            file.path(),
            &ClassifierConfig::new(),
        );

        assert!(matches!(result, Err(PipelineError::Dataset(_))));
    }

    #[test]
    fn feature_vector_normalizes_to_region() {
        let face = DetectedFace {
            region: BoundingBox::new(10.0, 10.0, 20.0, 20.0),
            landmarks: LandmarkSet::new(vec![
                Coordinate2D::new(10.0, 10.0),
                Coordinate2D::new(30.0, 20.0),
            ]),
        };

        let features = feature_vector(&face);
        assert_eq!(features, vec![0.0, 0.0, 1.0, 0.5]);
    }
}
