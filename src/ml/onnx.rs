//! ONNX Runtime adapters for the image and fusion networks.
//!
//! Both networks are exported from their training framework with a `[1, 2]`
//! logits output. `Session::run` needs `&mut self`, so each session sits
//! behind a mutex; requests on the same network are serialized there.

use crate::error::{AppError, Result};
use crate::ml::fusion::{FusionNetwork, FUSION_FEATURE_KEYS};
use crate::ml::image::{ImageNetwork, IMAGE_SIZE};
use ndarray::{Array1, Array2, Array4};
use ort::session::Session;
use ort::value::{DynValue, TensorRef};
use parking_lot::Mutex;
use std::path::Path;

fn load_session(path: &Path) -> Result<Session> {
    if !path.exists() {
        return Err(AppError::artifact(path, "model file not found"));
    }

    let session = Session::builder()
        .map_err(|e: ort::Error| AppError::artifact(path, e.to_string()))?
        .with_intra_threads(2)
        .map_err(|e: ort::Error| AppError::artifact(path, e.to_string()))?
        .commit_from_file(path)
        .map_err(|e: ort::Error| AppError::artifact(path, format!("ONNX load failed: {e}")))?;

    tracing::info!(path = %path.display(), "ONNX model loaded");
    Ok(session)
}

fn check_image_shape(image: &Array4<f32>) -> Result<()> {
    let side = IMAGE_SIZE as usize;
    if image.shape() != [1, 3, side, side] {
        return Err(AppError::Inference(format!(
            "image tensor has shape {:?}, expected [1, 3, {side}, {side}]",
            image.shape()
        )));
    }
    Ok(())
}

fn logits_from(output: &DynValue) -> Result<Array1<f32>> {
    let (shape, data) = output
        .try_extract_tensor::<f32>()
        .map_err(|e| AppError::Inference(format!("Output extraction: {e}")))?;

    if data.len() != 2 {
        return Err(AppError::Inference(format!(
            "Unexpected output shape: {shape:?}, expected [1, 2]"
        )));
    }
    Ok(Array1::from(data.to_vec()))
}

/// ResNet-18 style two-class classifier
pub struct OnnxImageNetwork {
    session: Mutex<Session>,
}

impl OnnxImageNetwork {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            session: Mutex::new(load_session(path)?),
        })
    }
}

impl ImageNetwork for OnnxImageNetwork {
    fn logits(&self, image: &Array4<f32>) -> Result<Array1<f32>> {
        check_image_shape(image)?;
        let input = TensorRef::from_array_view(image)
            .map_err(|e| AppError::Inference(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| AppError::Inference(format!("ONNX inference failed: {e}")))?;
        logits_from(&outputs[0])
    }
}

/// Late-fusion network; inputs are (image, clinical) in that order
pub struct OnnxFusionNetwork {
    session: Mutex<Session>,
}

impl OnnxFusionNetwork {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            session: Mutex::new(load_session(path)?),
        })
    }
}

impl FusionNetwork for OnnxFusionNetwork {
    fn logits(&self, image: &Array4<f32>, clinical: &Array2<f32>) -> Result<Array1<f32>> {
        check_image_shape(image)?;
        if clinical.shape() != [1, FUSION_FEATURE_KEYS.len()] {
            return Err(AppError::Inference(format!(
                "clinical tensor has shape {:?}, expected [1, {}]",
                clinical.shape(),
                FUSION_FEATURE_KEYS.len()
            )));
        }

        let image_input = TensorRef::from_array_view(image)
            .map_err(|e| AppError::Inference(e.to_string()))?;
        let clinical_input = TensorRef::from_array_view(clinical)
            .map_err(|e| AppError::Inference(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![image_input, clinical_input])
            .map_err(|e| AppError::Inference(format!("ONNX inference failed: {e}")))?;
        logits_from(&outputs[0])
    }
}
