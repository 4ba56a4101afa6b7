use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("could not decode image: {0}")]
    UndecodableImage(String),

    #[error("no face detected in input image")]
    NoFaceDetected,

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
