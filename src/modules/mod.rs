pub mod dlib_format;
pub mod face_detector;
pub mod random_forest;
pub mod shape_predictor;
