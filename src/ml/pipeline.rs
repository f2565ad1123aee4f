use crate::error::{AppError, Result};
use crate::ml::attribution::AttributionEngine;
use crate::ml::classifier::Classifier;
use crate::ml::predictor::{Predictor, PredictorKind, Scored};
use crate::ml::preprocess::Preprocessor;
use crate::ml::vectorizer::{vectorize, FeatureRow, Schema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

/// Which questionnaire a tabular request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TabularMode {
    Simple,
    Clinical,
}

/// Fitted preprocessing + classifier unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabularPipeline {
    pub preprocess: Preprocessor,
    pub classifier: Classifier,
}

impl TabularPipeline {
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        self.preprocess.validate(schema)?;
        self.classifier.validate(self.preprocess.n_features_out())
    }

    /// Positive-class probability: second column of the two-class output
    pub fn predict_probability(&self, row: &FeatureRow) -> Result<f64> {
        let x = self.preprocess.transform(std::slice::from_ref(row))?;
        let proba = self.classifier.predict_proba(&x)?;
        Ok(proba[[0, 1]])
    }
}

/// Schema-bound pipeline plus its explainer
pub struct TabularPredictor {
    mode: TabularMode,
    schema: Schema,
    pipeline: TabularPipeline,
    engine: AttributionEngine,
    top_k: usize,
}

impl TabularPredictor {
    /// Validate the pipeline against the schema and bind the explainer to
    /// the background records
    pub fn new(
        mode: TabularMode,
        schema: Schema,
        pipeline: TabularPipeline,
        background: &[Map<String, Value>],
        top_k: usize,
    ) -> Result<Self> {
        if schema.is_empty() {
            return Err(AppError::Processing(format!("{} schema has no features", mode)));
        }
        pipeline.validate(&schema)?;

        let rows: Vec<FeatureRow> = background
            .iter()
            .map(|record| vectorize(&schema, record))
            .collect();
        let engine = AttributionEngine::new(&pipeline.preprocess, &pipeline.classifier, &rows)?;

        tracing::info!(
            mode = %mode,
            schema_features = schema.len(),
            transformed_features = pipeline.preprocess.n_features_out(),
            background_rows = rows.len(),
            "Tabular predictor ready"
        );

        Ok(Self {
            mode,
            schema,
            pipeline,
            engine,
            top_k,
        })
    }

    pub fn mode(&self) -> TabularMode {
        self.mode
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn engine(&self) -> &AttributionEngine {
        &self.engine
    }
}

impl Predictor for TabularPredictor {
    type Input = Map<String, Value>;

    fn kind(&self) -> PredictorKind {
        PredictorKind::Tabular
    }

    fn predict(&self, payload: &Self::Input) -> Result<Scored> {
        let row = vectorize(&self.schema, payload);
        let probability = self.pipeline.predict_probability(&row)?;

        let x = self.pipeline.preprocess.transform_row(&row)?;
        let top_factors = self.engine.top_factors(x.view(), self.top_k)?;

        Ok(Scored {
            probability,
            top_factors,
        })
    }
}
