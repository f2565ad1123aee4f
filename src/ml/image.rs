use crate::error::{AppError, Result};
use crate::ml::predictor::{Predictor, PredictorKind, Scored};
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array1, Array4};

/// Square input resolution of both networks
pub const IMAGE_SIZE: u32 = 224;

/// Per-channel normalization the networks were trained with (ImageNet)
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Logit index of the screening-positive class, fixed at training time
pub const POSITIVE_CLASS_INDEX: usize = 1;

/// An uploaded file as received from a multipart form
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            content_type,
            bytes,
        }
    }

    /// The declared MIME type must be `image/*`
    pub fn check_content_type(&self) -> Result<()> {
        match self.content_type.as_deref() {
            Some(ct) if ct.trim().to_ascii_lowercase().starts_with("image/") => Ok(()),
            _ => Err(AppError::Validation("Only image files are allowed".to_string())),
        }
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory(&self.bytes)
            .map_err(|_| AppError::Validation("Invalid image file".to_string()))
    }
}

/// RGB, 224x224 bilinear resize, scale to [0, 1], channel-normalize.
/// Output layout is NCHW with N = 1.
pub fn image_to_tensor(image: &DynamicImage) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle);

    let side = IMAGE_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel.0[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (value - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
        }
    }
    tensor
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Softmax over the two logits, then the positive-class entry
pub fn positive_probability(logits: &Array1<f32>) -> Result<f64> {
    if logits.len() != 2 {
        return Err(AppError::Inference(format!(
            "expected 2 logits, network returned {}",
            logits.len()
        )));
    }
    let probs = softmax(&logits.to_vec());
    let p = probs[POSITIVE_CLASS_INDEX] as f64;
    if !p.is_finite() {
        return Err(AppError::Inference(
            "network returned non-finite logits".to_string(),
        ));
    }
    Ok(p)
}

/// Two-class convolutional classifier over one preprocessed image
pub trait ImageNetwork: Send + Sync {
    fn logits(&self, image: &Array4<f32>) -> Result<Array1<f32>>;
}

pub struct ImagePredictor {
    network: Box<dyn ImageNetwork>,
}

impl ImagePredictor {
    pub fn new(network: Box<dyn ImageNetwork>) -> Self {
        Self { network }
    }
}

impl Predictor for ImagePredictor {
    type Input = ImageUpload;

    fn kind(&self) -> PredictorKind {
        PredictorKind::Image
    }

    fn predict(&self, upload: &ImageUpload) -> Result<Scored> {
        upload.check_content_type()?;
        let image = upload.decode()?;
        let tensor = image_to_tensor(&image);
        let logits = self.network.logits(&tensor)?;
        Ok(Scored::without_factors(positive_probability(&logits)?))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    pub(crate) struct FixedLogits(pub [f32; 2]);

    impl ImageNetwork for FixedLogits {
        fn logits(&self, image: &Array4<f32>) -> Result<Array1<f32>> {
            assert_eq!(image.shape(), &[1, 3, 224, 224]);
            Ok(Array1::from(self.0.to_vec()))
        }
    }

    pub(crate) fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_content_type_check() {
        let ok = ImageUpload::new(Some("image/png".into()), vec![]);
        assert!(ok.check_content_type().is_ok());

        for ct in [None, Some("text/plain".to_string()), Some("application/json".to_string())] {
            let err = ImageUpload::new(ct, vec![]).check_content_type().unwrap_err();
            assert_eq!(err.to_string(), "Only image files are allowed");
        }
    }

    #[test]
    fn test_corrupt_bytes_rejected() {
        let upload = ImageUpload::new(Some("image/jpeg".into()), b"not an image".to_vec());
        let err = upload.decode().unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "Invalid image file"));
    }

    #[test]
    fn test_tensor_normalization() {
        let upload = ImageUpload::new(Some("image/png".into()), png_bytes(1, 1, [255, 0, 128]));
        let tensor = image_to_tensor(&upload.decode().unwrap());
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);

        let expected_r = (1.0 - CHANNEL_MEAN[0]) / CHANNEL_STD[0];
        let expected_g = (0.0 - CHANNEL_MEAN[1]) / CHANNEL_STD[1];
        assert!((tensor[[0, 0, 100, 37]] - expected_r).abs() < 1e-5);
        assert!((tensor[[0, 1, 0, 223]] - expected_g).abs() < 1e-5);
    }

    #[test]
    fn test_positive_class_is_index_one() {
        let p = positive_probability(&Array1::from(vec![0.0, 2.0])).unwrap();
        let expected = 2.0f64.exp() / (1.0 + 2.0f64.exp());
        assert!((p - expected).abs() < 1e-6);
        assert!(positive_probability(&Array1::from(vec![1.0, 2.0, 3.0])).is_err());
    }

    #[test]
    fn test_softmax_handles_large_logits() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_predict_one_pixel_image() {
        let predictor = ImagePredictor::new(Box::new(FixedLogits([0.0, 0.0])));
        let upload = ImageUpload::new(Some("image/png".into()), png_bytes(1, 1, [10, 20, 30]));
        let scored = predictor.predict(&upload).unwrap();
        assert!((scored.probability - 0.5).abs() < 1e-6);
        assert!(scored.top_factors.is_empty());
    }
}
