use std::path::Path;
use std::sync::Mutex;

use opencv::core::{Mat, Rect, Size, Vector};
use opencv::imgproc::equalize_hist;
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;

use crate::config::config::FaceDetectorConfig;
use crate::utils::coordinate::BoundingBox;
use crate::utils::error::{PipelineError, Result};

/// Cascade-based frontal face detector.
///
/// The underlying OpenCV classifier mutates internal buffers during
/// detection, so calls are serialized through a mutex.
pub struct FaceDetector {
    classifier: Mutex<CascadeClassifier>,
    scale_factor: f64,
    min_neighbors: i32,
    min_face_size: i32,
}

impl FaceDetector {
    /// new loads the cascade file and prepares the detector.
    ///
    /// # Arguments
    /// * `cascade_path` - path to a pre-trained cascade XML file
    /// * `config` - detection tunables
    ///
    /// # Returns
    /// * `Result<FaceDetector, PipelineError>`
    pub fn new(cascade_path: &Path, config: FaceDetectorConfig) -> Result<Self> {
        let classifier = CascadeClassifier::new(&cascade_path.to_string_lossy())?;
        if classifier.empty()? {
            return Err(PipelineError::InvalidModel(format!(
                "cascade file {} did not load any stages",
                cascade_path.display()
            )));
        }

        Ok(FaceDetector {
            classifier: Mutex::new(classifier),
            scale_factor: config.scale_factor,
            min_neighbors: config.min_neighbors,
            min_face_size: config.min_face_size,
        })
    }

    /// detect_largest runs multiscale detection over the grayscale image and
    /// returns the largest face region, if any.
    ///
    /// # Arguments
    /// * `gray` - single-channel grayscale matrix
    ///
    /// # Returns
    /// * `Result<Option<BoundingBox>, PipelineError>`
    pub fn detect_largest(&self, gray: &Mat) -> Result<Option<BoundingBox>> {
        let mut equalized = Mat::default();
        equalize_hist(gray, &mut equalized)?;

        let mut faces = Vector::<Rect>::new();
        {
            let mut classifier = self
                .classifier
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            classifier.detect_multi_scale(
                &equalized,
                &mut faces,
                self.scale_factor,
                self.min_neighbors,
                0,
                Size::new(self.min_face_size, self.min_face_size),
                Size::new(0, 0),
            )?;
        }

        let mut best: Option<Rect> = None;
        for face in faces.iter() {
            if best.map_or(true, |b| face.area() > b.area()) {
                best = Some(face);
            }
        }

        Ok(best.map(|r| {
            BoundingBox::new(r.x as f32, r.y as f32, r.width as f32, r.height as f32)
        }))
    }
}
