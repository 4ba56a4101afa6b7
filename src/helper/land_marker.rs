use std::path::Path;

use opencv::core::Mat;

use crate::config::config::FaceDetectorConfig;
use crate::modules::dlib_format::load_landmark_model;
use crate::modules::face_detector::FaceDetector;
use crate::modules::shape_predictor::ShapePredictor;
use crate::utils::coordinate::{BoundingBox, LandmarkSet};
use crate::utils::error::{PipelineError, Result};

/// Number of landmark points the service operates on (iBUG 68 convention).
pub const LANDMARK_COUNT: usize = 68;

/// A face region together with the landmarks found inside it.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub region: BoundingBox,
    pub landmarks: LandmarkSet,
}

/// Seam between the classifier and the landmark machinery, so the pipeline
/// and HTTP layer can be exercised with a stub extractor in tests.
pub trait LandmarkExtractor: Send + Sync {
    /// Locate a face in the grayscale image and return its landmarks.
    fn extract(&self, gray: &Mat) -> Result<DetectedFace>;

    /// Number of landmark points `extract` produces.
    fn num_landmarks(&self) -> usize;
}

/// LandMarker combines cascade face detection with the ERT shape model.
pub struct LandMarker {
    detector: FaceDetector,
    predictor: ShapePredictor,
}

impl LandMarker {
    /// new loads both pre-trained models and validates the landmark count.
    ///
    /// # Arguments
    /// * `cascade_path` - OpenCV cascade file for face detection
    /// * `model_path` - dlib 68-point shape predictor file
    /// * `config` - detection tunables
    ///
    /// # Returns
    /// * `Result<LandMarker, PipelineError>`
    pub fn new(
        cascade_path: &Path,
        model_path: &Path,
        config: FaceDetectorConfig,
    ) -> Result<Self> {
        let detector = FaceDetector::new(cascade_path, config)?;
        let predictor = load_landmark_model(model_path)?;

        if predictor.num_landmarks() != LANDMARK_COUNT {
            return Err(PipelineError::InvalidModel(format!(
                "landmark model predicts {} points, expected {}",
                predictor.num_landmarks(),
                LANDMARK_COUNT
            )));
        }

        Ok(LandMarker {
            detector,
            predictor,
        })
    }
}

impl LandmarkExtractor for LandMarker {
    fn extract(&self, gray: &Mat) -> Result<DetectedFace> {
        // multiple faces: the largest region wins; zero faces is an error
        let region = self
            .detector
            .detect_largest(gray)?
            .ok_or(PipelineError::NoFaceDetected)?;
        let landmarks = self.predictor.predict(gray, &region);

        Ok(DetectedFace { region, landmarks })
    }

    fn num_landmarks(&self) -> usize {
        LANDMARK_COUNT
    }
}
