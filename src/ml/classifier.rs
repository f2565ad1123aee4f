use crate::error::{AppError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Binary classifier fitted offline and exported as plain parameters.
///
/// Both variants score in log-odds space; `predict_proba` applies the
/// logistic link and returns `[P(class 0), P(class 1)]` per row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    Logistic { coef: Vec<f64>, intercept: f64 },
    GradientBoosting(TreeEnsemble),
}

impl Classifier {
    /// Check the classifier can score rows of `width` features
    pub fn validate(&self, width: usize) -> Result<()> {
        match self {
            Classifier::Logistic { coef, .. } if coef.len() != width => {
                Err(AppError::Processing(format!(
                    "logistic classifier has {} coefficients, preprocessor emits {} features",
                    coef.len(),
                    width
                )))
            }
            Classifier::Logistic { .. } => Ok(()),
            Classifier::GradientBoosting(ensemble) => ensemble.validate(width),
        }
    }

    /// Raw margin (log-odds) for one transformed row
    pub fn decision_function(&self, x: ArrayView1<f64>) -> f64 {
        match self {
            Classifier::Logistic { coef, intercept } => {
                intercept + x.iter().zip(coef).map(|(xi, wi)| xi * wi).sum::<f64>()
            }
            Classifier::GradientBoosting(ensemble) => ensemble.decision_function(x),
        }
    }

    /// Two-column probability matrix, one row per input row
    pub fn predict_proba(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        let mut proba = Array2::zeros((features.nrows(), 2));
        for (i, row) in features.axis_iter(Axis(0)).enumerate() {
            let p = sigmoid(self.decision_function(row));
            if !p.is_finite() {
                return Err(AppError::Processing(
                    "classifier produced a non-finite score".to_string(),
                ));
            }
            proba[[i, 0]] = 1.0 - p;
            proba[[i, 1]] = p;
        }
        Ok(proba)
    }
}

/// Additive ensemble of regression trees on the log-odds scale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    /// Prior log-odds
    pub init: f64,
    pub learning_rate: f64,
    pub trees: Vec<Tree>,
}

impl TreeEnsemble {
    pub fn validate(&self, width: usize) -> Result<()> {
        if self.trees.is_empty() {
            return Err(AppError::Processing("tree ensemble has no trees".to_string()));
        }
        for (idx, tree) in self.trees.iter().enumerate() {
            tree.validate(width)
                .map_err(|e| AppError::Processing(format!("tree {}: {}", idx, e)))?;
        }
        Ok(())
    }

    pub fn decision_function(&self, x: ArrayView1<f64>) -> f64 {
        self.init
            + self.learning_rate
                * self
                    .trees
                    .iter()
                    .map(|tree| tree.predict(x))
                    .sum::<f64>()
    }
}

/// A node in a flattened regression tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        #[serde(default = "default_left")]
        default_left: bool,
    },
    Leaf {
        value: f64,
    },
}

fn default_left() -> bool {
    true
}

/// Regression tree stored as a flat node array; node 0 is the root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    fn validate(&self, width: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("empty tree".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= width {
                    return Err(format!(
                        "node {} splits on feature {} of {}",
                        idx, feature, width
                    ));
                }
                // children strictly after parents rules out cycles
                for child in [left, right] {
                    if *child <= idx || *child >= self.nodes.len() {
                        return Err(format!("node {} has invalid child {}", idx, child));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn predict(&self, x: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                split @ Node::Split { feature, .. } => {
                    idx = Self::child(split, x[*feature]);
                }
            }
        }
    }

    /// Child index a value routes to at a split node
    pub(crate) fn child(node: &Node, value: f64) -> usize {
        match node {
            Node::Split {
                threshold,
                left,
                right,
                default_left,
                ..
            } => {
                let go_left = if value.is_nan() {
                    *default_left
                } else {
                    value <= *threshold
                };
                if go_left {
                    *left
                } else {
                    *right
                }
            }
            Node::Leaf { .. } => unreachable!("leaf nodes have no children"),
        }
    }
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Mean of each column, used as the linear attribution baseline
pub(crate) fn column_means(background: &Array2<f64>) -> Array1<f64> {
    background
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(background.ncols()))
}
