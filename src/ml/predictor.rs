use crate::error::Result;
use crate::ml::attribution::TopFactor;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Backend family behind a prediction endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PredictorKind {
    Tabular,
    Image,
    Fusion,
}

/// Backend output before risk banding and narration
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    /// Probability of the screening-positive class
    pub probability: f64,
    /// Ranked contributors; empty when the backend cannot explain itself
    pub top_factors: Vec<TopFactor>,
}

impl Scored {
    pub fn without_factors(probability: f64) -> Self {
        Self {
            probability,
            top_factors: Vec::new(),
        }
    }
}

/// Anything that turns one request's input into a scored probability.
///
/// Implementations are immutable after construction and shared across
/// requests, so `predict` takes `&self`. Input validation failures are
/// reported as [`crate::error::AppError::Validation`] before any model runs.
pub trait Predictor: Send + Sync {
    type Input: Send;

    fn kind(&self) -> PredictorKind;

    fn predict(&self, input: &Self::Input) -> Result<Scored>;
}
