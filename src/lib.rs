//! Multi-modal PCOS risk screening service.
//!
//! Tabular questionnaires, ultrasound images and a late-fusion of both are
//! scored by pre-trained models, banded into a risk level, explained with
//! per-feature attributions where the model allows it, and narrated in
//! plain language.

pub mod api;
pub mod artifacts;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod ml;
pub mod narration;
pub mod orchestrator;

pub use error::{AppError, Result};
