use opencv::core::{Mat, MatTraitConst};
use opencv::imgcodecs::{imdecode, IMREAD_COLOR};
use opencv::imgproc::{cvt_color, COLOR_BGR2GRAY};

use crate::utils::error::{PipelineError, Result};

/// decode_color_image decodes an in-memory byte buffer into a BGR matrix.
///
/// # Arguments
/// * `im_bytes` - raw encoded image bytes (JPEG, PNG, ...)
///
/// # Returns
/// * `Result<Mat, PipelineError>`
pub fn decode_color_image(im_bytes: &[u8]) -> Result<Mat> {
    let buf = Mat::from_slice(im_bytes)?;
    let decoded = imdecode(&buf, IMREAD_COLOR)?;
    if decoded.empty() {
        return Err(PipelineError::UndecodableImage(
            "imdecode produced no image".to_string(),
        ));
    }
    Ok(decoded)
}

/// to_grayscale converts a BGR matrix to a single-channel grayscale matrix.
///
/// # Arguments
/// * `img` - BGR color matrix
///
/// # Returns
/// * `Result<Mat, PipelineError>`
pub fn to_grayscale(img: &Mat) -> Result<Mat> {
    let mut gray = Mat::default();
    cvt_color(img, &mut gray, COLOR_BGR2GRAY, 0)?;
    Ok(gray)
}

#[cfg(test)]
mod tests {
    use opencv::core::{Scalar, Vector, CV_8UC3};
    use opencv::imgcodecs::imencode;

    use super::*;

    fn encoded_test_image() -> Vec<u8> {
        let img = Mat::new_rows_cols_with_default(24, 32, CV_8UC3, Scalar::all(90.0))
            .expect("create test image");
        let mut buf = Vector::<u8>::new();
        imencode(".png", &img, &mut buf, &Vector::new()).expect("encode test image");
        buf.to_vec()
    }

    #[test]
    fn decode_valid_image() {
        let bytes = encoded_test_image();
        let img = decode_color_image(&bytes).expect("decode");
        assert_eq!(img.rows(), 24);
        assert_eq!(img.cols(), 32);
        assert_eq!(img.channels(), 3);
    }

    #[test]
    fn decode_garbage_is_rejected() {
        let result = decode_color_image(b"definitely not an image");
        assert!(matches!(
            result,
            Err(PipelineError::UndecodableImage(_))
        ));
    }

    #[test]
    fn grayscale_has_single_channel() {
        let bytes = encoded_test_image();
        let img = decode_color_image(&bytes).expect("decode");
        let gray = to_grayscale(&img).expect("convert");
        assert_eq!(gray.channels(), 1);
        assert_eq!(gray.rows(), img.rows());
        assert_eq!(gray.cols(), img.cols());
    }
}
