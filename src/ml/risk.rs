use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Ordinal screening risk band
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Cut-points partitioning [0, 1] into Low / Medium / High
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub low_max: f64,
    pub medium_max: f64,
}

impl RiskThresholds {
    pub fn new(low_max: f64, medium_max: f64) -> Result<Self> {
        let thresholds = Self {
            low_max,
            medium_max,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.low_max) || !in_unit(self.medium_max) {
            return Err(AppError::Configuration(format!(
                "risk thresholds must lie in [0, 1], got low_max={} medium_max={}",
                self.low_max, self.medium_max
            )));
        }
        if self.low_max > self.medium_max {
            return Err(AppError::Configuration(format!(
                "risk thresholds out of order: low_max={} > medium_max={}",
                self.low_max, self.medium_max
            )));
        }
        Ok(())
    }

    /// Band a probability; a value exactly on a cut-point belongs to the higher band
    pub fn classify(&self, probability: f64) -> RiskLevel {
        if probability < self.low_max {
            RiskLevel::Low
        } else if probability < self.medium_max {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}
