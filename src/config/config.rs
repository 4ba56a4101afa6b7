use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| {
                PipelineError::Config(format!("PORT must be a port number, got {:?}", raw))
            })?,
            Err(_) => 5000,
        };

        Ok(ServerConfig {
            host: "0.0.0.0".to_string(),
            port,
        })
    }
}

/// Tunables for the cascade face detector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceDetectorConfig {
    pub scale_factor: f64,
    pub min_neighbors: i32,
    pub min_face_size: i32,
}

impl FaceDetectorConfig {
    pub fn new() -> Self {
        FaceDetectorConfig {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_face_size: 30,
        }
    }
}

impl Default for FaceDetectorConfig {
    fn default() -> Self {
        FaceDetectorConfig::new()
    }
}

/// Supported classifier backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    RandomForest,
}

/// Classifier selection and fitting hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierConfig {
    pub algorithm: Algorithm,
    pub num_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl ClassifierConfig {
    pub fn new() -> Self {
        ClassifierConfig {
            algorithm: Algorithm::RandomForest,
            num_trees: 100,
            max_depth: 16,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig::new()
    }
}

/// Process-level configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cascade_path: PathBuf,
    pub landmark_model_path: PathBuf,
    pub dataset_path: PathBuf,
    pub detector: FaceDetectorConfig,
    pub classifier: ClassifierConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            cascade_path: path_from_env(
                "CASCADE_PATH",
                "models/haarcascade_frontalface_default.xml",
            ),
            landmark_model_path: path_from_env(
                "LANDMARK_MODEL_PATH",
                "models/shape_predictor_68_face_landmarks.dat",
            ),
            dataset_path: path_from_env("DATASET_PATH", "data/dataset.csv"),
            detector: FaceDetectorConfig::new(),
            classifier: ClassifierConfig::new(),
        })
    }

    /// Files that must exist before the process can serve anything.
    pub fn required_files(&self) -> [&Path; 3] {
        [
            &self.cascade_path,
            &self.landmark_model_path,
            &self.dataset_path,
        ]
    }
}

fn path_from_env(key: &str, default: &str) -> PathBuf {
    env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}
