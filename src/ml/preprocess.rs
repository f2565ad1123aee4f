use crate::error::{AppError, Result};
use crate::ml::vectorizer::{FeatureRow, FeatureValue, Schema};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// What a one-hot encoder does with a category it never saw during fitting
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleUnknown {
    #[default]
    Ignore,
    Error,
}

/// One fitted column transformer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnTransformer {
    /// Median imputation followed by optional standardization
    Numeric {
        #[serde(default)]
        name: Option<String>,
        columns: Vec<String>,
        #[serde(default)]
        impute: Option<Vec<f64>>,
        #[serde(default)]
        mean: Option<Vec<f64>>,
        #[serde(default)]
        scale: Option<Vec<f64>>,
    },
    OneHot {
        #[serde(default)]
        name: Option<String>,
        columns: Vec<String>,
        categories: Vec<Vec<String>>,
        #[serde(default)]
        impute: Option<Vec<String>>,
        #[serde(default)]
        handle_unknown: HandleUnknown,
    },
    Passthrough {
        #[serde(default)]
        name: Option<String>,
        columns: Vec<String>,
    },
}

impl ColumnTransformer {
    pub fn name(&self) -> Option<&str> {
        match self {
            ColumnTransformer::Numeric { name, .. }
            | ColumnTransformer::OneHot { name, .. }
            | ColumnTransformer::Passthrough { name, .. } => name.as_deref(),
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            ColumnTransformer::Numeric { columns, .. }
            | ColumnTransformer::OneHot { columns, .. }
            | ColumnTransformer::Passthrough { columns, .. } => columns,
        }
    }

    /// Number of output features
    pub fn width(&self) -> usize {
        match self {
            ColumnTransformer::OneHot { categories, .. } => categories.iter().map(Vec::len).sum(),
            other => other.columns().len(),
        }
    }

    fn output_names(&self) -> Option<Vec<String>> {
        let prefix = self.name()?;
        let names = match self {
            ColumnTransformer::OneHot {
                columns,
                categories,
                ..
            } => columns
                .iter()
                .zip(categories)
                .flat_map(|(column, cats)| {
                    cats.iter()
                        .map(move |cat| format!("{}__{}_{}", prefix, column, cat))
                })
                .collect(),
            other => other
                .columns()
                .iter()
                .map(|column| format!("{}__{}", prefix, column))
                .collect(),
        };
        Some(names)
    }

    fn validate(&self) -> Result<()> {
        let n = self.columns().len();
        let check = |what: &str, len: Option<usize>| -> Result<()> {
            match len {
                Some(len) if len != n => Err(AppError::Processing(format!(
                    "transformer {:?}: {} has {} entries for {} columns",
                    self.name().unwrap_or("<unnamed>"),
                    what,
                    len,
                    n
                ))),
                _ => Ok(()),
            }
        };

        match self {
            ColumnTransformer::Numeric {
                impute,
                mean,
                scale,
                ..
            } => {
                check("impute", impute.as_ref().map(Vec::len))?;
                check("mean", mean.as_ref().map(Vec::len))?;
                check("scale", scale.as_ref().map(Vec::len))?;
                if mean.is_some() != scale.is_some() {
                    return Err(AppError::Processing(
                        "numeric transformer needs both mean and scale, or neither".to_string(),
                    ));
                }
                if scale.iter().flatten().any(|s| *s == 0.0 || !s.is_finite()) {
                    return Err(AppError::Processing(
                        "numeric transformer has a zero or non-finite scale".to_string(),
                    ));
                }
                Ok(())
            }
            ColumnTransformer::OneHot {
                categories, impute, ..
            } => {
                check("categories", Some(categories.len()))?;
                check("impute", impute.as_ref().map(Vec::len))
            }
            ColumnTransformer::Passthrough { .. } => Ok(()),
        }
    }

    fn transform_into(&self, row: &FeatureRow, out: &mut Vec<f64>) -> Result<()> {
        let lookup = |column: &str| -> Result<&FeatureValue> {
            row.get(column).ok_or_else(|| {
                AppError::Processing(format!("column '{}' is not present in the row", column))
            })
        };

        match self {
            ColumnTransformer::Numeric {
                columns,
                impute,
                mean,
                scale,
                ..
            } => {
                for (idx, column) in columns.iter().enumerate() {
                    let value = lookup(column)?
                        .as_number()
                        .map_err(|e| AppError::Processing(format!("{}: {}", column, e)))?;
                    let value = match (value, impute) {
                        (Some(v), _) => v,
                        (None, Some(fill)) => fill[idx],
                        (None, None) => f64::NAN,
                    };
                    let value = match (mean, scale) {
                        (Some(mean), Some(scale)) => (value - mean[idx]) / scale[idx],
                        _ => value,
                    };
                    out.push(value);
                }
            }
            ColumnTransformer::OneHot {
                columns,
                categories,
                impute,
                handle_unknown,
                ..
            } => {
                for (idx, column) in columns.iter().enumerate() {
                    let label = lookup(column)?
                        .as_category()
                        .or_else(|| impute.as_ref().map(|fill| fill[idx].clone()));
                    let cats = &categories[idx];
                    let hit = label
                        .as_ref()
                        .and_then(|label| cats.iter().position(|c| c == label));

                    if hit.is_none() && *handle_unknown == HandleUnknown::Error {
                        return Err(AppError::Processing(format!(
                            "Found unknown category {:?} in column '{}'",
                            label, column
                        )));
                    }

                    out.extend((0..cats.len()).map(|i| if Some(i) == hit { 1.0 } else { 0.0 }));
                }
            }
            ColumnTransformer::Passthrough { columns, .. } => {
                for column in columns {
                    let value = lookup(column)?
                        .as_number()
                        .map_err(|e| AppError::Processing(format!("{}: {}", column, e)))?;
                    out.push(value.unwrap_or(f64::NAN));
                }
            }
        }
        Ok(())
    }
}

/// Fitted preprocessing step: raw schema row to numeric model input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preprocessor {
    pub transformers: Vec<ColumnTransformer>,
}

impl Preprocessor {
    pub fn new(transformers: Vec<ColumnTransformer>) -> Self {
        Self { transformers }
    }

    /// Check internal consistency and that every consumed column is in the schema
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        for transformer in &self.transformers {
            transformer.validate()?;
            if let Some(column) = transformer
                .columns()
                .iter()
                .find(|c| schema.position(c).is_none())
            {
                return Err(AppError::Processing(format!(
                    "preprocessor consumes column '{}' which the schema does not define",
                    column
                )));
            }
        }
        Ok(())
    }

    /// Width of the transformed space
    pub fn n_features_out(&self) -> usize {
        self.transformers.iter().map(ColumnTransformer::width).sum()
    }

    /// Transformed feature names, `None` if any transformer is unnamed
    pub fn feature_names_out(&self) -> Option<Vec<String>> {
        let mut names = Vec::with_capacity(self.n_features_out());
        for transformer in &self.transformers {
            names.extend(transformer.output_names()?);
        }
        Some(names)
    }

    pub fn transform_row(&self, row: &FeatureRow) -> Result<Array1<f64>> {
        let mut out = Vec::with_capacity(self.n_features_out());
        for transformer in &self.transformers {
            transformer.transform_into(row, &mut out)?;
        }
        Ok(Array1::from(out))
    }

    pub fn transform(&self, rows: &[FeatureRow]) -> Result<Array2<f64>> {
        let width = self.n_features_out();
        let mut data = Vec::with_capacity(rows.len() * width);
        for row in rows {
            data.extend(self.transform_row(row)?);
        }
        Array2::from_shape_vec((rows.len(), width), data)
            .map_err(|e| AppError::Processing(format!("transformed shape mismatch: {}", e)))
    }
}
