use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Categorical feature the encoder was fit on as strings ("2" / "4")
pub const CYCLE_REGULARITY_FEATURE: &str = "cycle_r_i";

/// Ordered feature names a tabular pipeline expects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub features: Vec<String>,
}

impl Schema {
    pub fn new(features: Vec<String>) -> Self {
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn position(&self, feature: &str) -> Option<usize> {
        self.features.iter().position(|f| f == feature)
    }
}

/// A raw cell value before preprocessing
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Text(String),
    Missing,
}

impl FeatureValue {
    /// Map a JSON value the way a dataframe constructor would
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FeatureValue::Missing,
            Value::Bool(b) => FeatureValue::Number(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => n
                .as_f64()
                .map(FeatureValue::Number)
                .unwrap_or_else(|| FeatureValue::Text(n.to_string())),
            Value::String(s) => FeatureValue::Text(s.clone()),
            other => FeatureValue::Text(other.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FeatureValue::Missing)
    }

    /// Numeric view; numeric strings parse, NaN counts as missing
    pub fn as_number(&self) -> Result<Option<f64>, String> {
        match self {
            FeatureValue::Number(n) if n.is_nan() => Ok(None),
            FeatureValue::Number(n) => Ok(Some(*n)),
            FeatureValue::Missing => Ok(None),
            FeatureValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(|n| if n.is_nan() { None } else { Some(n) })
                .map_err(|_| format!("could not convert '{}' to float", s)),
        }
    }

    /// Category label used for one-hot matching
    pub fn as_category(&self) -> Option<String> {
        match self {
            FeatureValue::Missing => None,
            FeatureValue::Number(n) if n.is_nan() => None,
            FeatureValue::Number(n) => Some(format_number(*n)),
            FeatureValue::Text(s) => Some(s.clone()),
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Number(n) => write!(f, "{}", format_number(*n)),
            FeatureValue::Text(s) => write!(f, "{}", s),
            FeatureValue::Missing => write!(f, "null"),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// One row of raw values in schema column order
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    columns: Vec<String>,
    values: Vec<FeatureValue>,
}

impl FeatureRow {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[FeatureValue] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&FeatureValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Build a schema-ordered row from an arbitrary payload.
///
/// Keys outside the schema are ignored and absent schema keys become
/// [`FeatureValue::Missing`]. The cycle-regularity column is forced to its
/// string form because its encoder only knows string categories.
pub fn vectorize(schema: &Schema, payload: &Map<String, Value>) -> FeatureRow {
    let values = schema
        .features
        .iter()
        .map(|feature| {
            let value = payload
                .get(feature)
                .map(FeatureValue::from_json)
                .unwrap_or(FeatureValue::Missing);

            if feature == CYCLE_REGULARITY_FEATURE {
                coerce_to_text(value, payload.get(feature))
            } else {
                value
            }
        })
        .collect();

    FeatureRow {
        columns: schema.features.clone(),
        values,
    }
}

fn coerce_to_text(value: FeatureValue, raw: Option<&Value>) -> FeatureValue {
    match (value, raw) {
        (FeatureValue::Missing, _) => FeatureValue::Missing,
        (FeatureValue::Number(_), Some(Value::Bool(b))) => {
            FeatureValue::Text(if *b { "True" } else { "False" }.to_string())
        }
        // integral floats share the integer label: 4 and 4.0 both give "4"
        (FeatureValue::Number(n), _) => FeatureValue::Text(format_number(n)),
        (text, _) => text,
    }
}
