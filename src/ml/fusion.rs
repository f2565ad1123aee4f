use crate::error::{AppError, Result};
use crate::ml::image::{image_to_tensor, positive_probability, ImageUpload};
use crate::ml::predictor::{Predictor, PredictorKind, Scored};
use ndarray::{Array1, Array2, Array4};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Clinical measurements the fusion network consumes, in input order
pub const FUSION_FEATURE_KEYS: [&str; 19] = [
    "age_yrs",
    "weight_kg",
    "height_cm",
    "bmi",
    "pulse_rate_bpm",
    "hb_g_dl",
    "cycle_length_days",
    "fsh_miu_ml",
    "lh_miu_ml",
    "fsh_lh",
    "hip_inch",
    "waist_inch",
    "tsh_miu_l",
    "amh_ng_ml",
    "prl_ng_ml",
    "vit_d3_ng_ml",
    "follicle_no_l",
    "follicle_no_r",
    "endometrium_mm",
];

/// Per-feature standardization fitted on the fusion training set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn validate(&self, n_features: usize) -> Result<()> {
        if self.mean.len() != n_features || self.scale.len() != n_features {
            return Err(AppError::Processing(format!(
                "scaler fitted on {}/{} features, expected {}",
                self.mean.len(),
                self.scale.len(),
                n_features
            )));
        }
        if self.scale.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(AppError::Processing(
                "scaler has a zero or non-finite scale".to_string(),
            ));
        }
        Ok(())
    }

    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// Parse the form field carrying the clinical JSON into the fixed-order vector.
///
/// The first missing key, then the first non-numeric value, decides the error.
pub fn parse_clinical_vector(raw: &str) -> Result<Vec<f64>> {
    let payload: Value = serde_json::from_str(raw)
        .map_err(|_| AppError::Validation("Invalid clinical JSON".to_string()))?;
    let payload = payload
        .as_object()
        .ok_or_else(|| AppError::Validation("Invalid clinical JSON".to_string()))?;

    if let Some(missing) = FUSION_FEATURE_KEYS.iter().find(|k| !payload.contains_key(**k)) {
        return Err(AppError::Validation(format!(
            "Missing clinical field: {}",
            missing
        )));
    }

    FUSION_FEATURE_KEYS
        .iter()
        .map(|key| {
            coerce_number(&payload[*key]).ok_or_else(|| {
                AppError::Validation(format!("Invalid clinical value for: {}", key))
            })
        })
        .collect()
}

fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Late-fusion network: image branch + scaled clinical branch -> two logits
pub trait FusionNetwork: Send + Sync {
    fn logits(&self, image: &Array4<f32>, clinical: &Array2<f32>) -> Result<Array1<f32>>;
}

/// Image plus the raw clinical form field
#[derive(Debug, Clone)]
pub struct FusionInput {
    pub image: ImageUpload,
    pub clinical: String,
}

pub struct FusionPredictor {
    network: Box<dyn FusionNetwork>,
    scaler: StandardScaler,
}

impl FusionPredictor {
    pub fn new(network: Box<dyn FusionNetwork>, scaler: StandardScaler) -> Result<Self> {
        scaler.validate(FUSION_FEATURE_KEYS.len())?;
        Ok(Self { network, scaler })
    }
}

impl Predictor for FusionPredictor {
    type Input = FusionInput;

    fn kind(&self) -> PredictorKind {
        PredictorKind::Fusion
    }

    /// No attributions on this path; `top_factors` is always empty
    fn predict(&self, input: &FusionInput) -> Result<Scored> {
        input.image.check_content_type()?;
        let values = parse_clinical_vector(&input.clinical)?;

        let scaled: Vec<f32> = self
            .scaler
            .transform(&values)
            .into_iter()
            .map(|v| v as f32)
            .collect();
        let clinical = Array2::from_shape_vec((1, FUSION_FEATURE_KEYS.len()), scaled)
            .map_err(|e| AppError::Internal(format!("clinical tensor shape: {}", e)))?;

        let image = image_to_tensor(&input.image.decode()?);
        let logits = self.network.logits(&image, &clinical)?;
        Ok(Scored::without_factors(positive_probability(&logits)?))
    }
}
