/// Screening models and their explainers
///
/// This module provides:
/// - Schema-driven vectorization of questionnaire payloads
/// - Fitted tabular pipelines (preprocessing + logistic / boosted trees)
/// - Exact per-feature attributions and top-factor ranking
/// - Risk banding from a probability
/// - Image and late-fusion predictors over pluggable networks

pub mod attribution;
pub mod classifier;
pub mod fusion;
pub mod image;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pipeline;
pub mod predictor;
pub mod preprocess;
pub mod risk;
pub mod vectorizer;

pub use attribution::{clean_feature_name, rank_top_factors, AttributionEngine, Direction, TopFactor};
pub use classifier::{Classifier, TreeEnsemble};
pub use fusion::{
    parse_clinical_vector, FusionInput, FusionNetwork, FusionPredictor, StandardScaler,
    FUSION_FEATURE_KEYS,
};
pub use image::{ImageNetwork, ImagePredictor, ImageUpload};
pub use pipeline::{TabularMode, TabularPipeline, TabularPredictor};
pub use predictor::{Predictor, PredictorKind, Scored};
pub use preprocess::Preprocessor;
pub use risk::{RiskLevel, RiskThresholds};
pub use vectorizer::{vectorize, FeatureRow, FeatureValue, Schema};
