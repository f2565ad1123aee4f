//! Post-hoc feature attributions for the tabular pipelines.
//!
//! The engine is bound once to a background sample (already pushed through
//! the pipeline's preprocessing step) and answers per-row queries with
//! signed per-feature contributions in log-odds space. Contributions are
//! exact Shapley values of the interventional game
//! `v(S) = E_z[f(x_S, z_{~S})]` over the background rows `z`:
//!
//! - logistic models: `coef_i * (x_i - mean(z_i))`
//! - tree ensembles: interventional Tree SHAP, one traversal per
//!   (tree, background row) pair
//!
//! For every row, `expected_value() + sum(contributions) == decision_function(x)`.

use crate::error::{AppError, Result};
use crate::ml::classifier::{column_means, Classifier, Node, Tree, TreeEnsemble};
use crate::ml::preprocess::Preprocessor;
use crate::ml::vectorizer::FeatureRow;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Number of factors reported when the caller does not say otherwise
pub const DEFAULT_TOP_K: usize = 6;

const TRANSFORMER_PREFIXES: [&str; 2] = ["num__", "cat__"];
const CYCLE_ENCODED_PREFIX: &str = "cycle_r_i_";

/// Which way a factor pushed the estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    IncreasesRisk,
    /// Also used for contributions of exactly zero
    DecreasesRisk,
}

impl Direction {
    pub fn from_impact(impact: f64) -> Self {
        if impact > 0.0 {
            Direction::IncreasesRisk
        } else {
            Direction::DecreasesRisk
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::IncreasesRisk => "increases_risk",
            Direction::DecreasesRisk => "decreases_risk",
        }
    }
}

/// One ranked contributor to a tabular prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopFactor {
    pub feature: String,
    pub impact: f64,
    pub direction: Direction,
}

/// Make a transformed feature name readable.
///
/// Transformer prefixes are removed (`num__bmi` -> `bmi`) and the encoded
/// cycle-regularity column is rewritten (`cat__cycle_r_i_4` -> `cycle_r_i=4`).
/// Anything else passes through. Applying it twice changes nothing.
pub fn clean_feature_name(name: &str) -> String {
    let mut cleaned = name.to_string();
    // stripping can splice a new prefix together ("nnum__um__x"), so repeat
    while let Some(prefix) = TRANSFORMER_PREFIXES.iter().find(|p| cleaned.contains(**p)) {
        cleaned = cleaned.replace(prefix, "");
    }

    let parts: Vec<&str> = cleaned.split(CYCLE_ENCODED_PREFIX).collect();
    if parts.len() == 2 {
        cleaned = format!("cycle_r_i={}", parts[1]);
    }
    cleaned
}

/// Rank contributions by absolute size, largest first, keeping the original
/// order among ties, and keep at most `top_k`.
pub fn rank_top_factors(values: &[f64], feature_names: &[String], top_k: usize) -> Vec<TopFactor> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].abs().total_cmp(&values[a].abs()));

    order
        .into_iter()
        .take(top_k)
        .map(|i| TopFactor {
            feature: clean_feature_name(&feature_names[i]),
            impact: values[i],
            direction: Direction::from_impact(values[i]),
        })
        .collect()
}

/// Explainer bound to one pipeline and its background sample
#[derive(Debug, Clone)]
pub struct AttributionEngine {
    classifier: Classifier,
    background: Array2<f64>,
    /// Per-feature background means, the linear baseline
    baseline: Array1<f64>,
    feature_names: Vec<String>,
    expected_value: f64,
}

impl AttributionEngine {
    /// Transform the background through `preprocessor` and bind the explainer to it
    pub fn new(
        preprocessor: &Preprocessor,
        classifier: &Classifier,
        background: &[FeatureRow],
    ) -> Result<Self> {
        if background.is_empty() {
            return Err(AppError::Processing(
                "attribution background sample is empty".to_string(),
            ));
        }

        let background = preprocessor.transform(background)?;
        let feature_names = preprocessor
            .feature_names_out()
            .unwrap_or_else(|| (0..background.ncols()).map(|i| format!("f{}", i)).collect());

        Self::from_transformed(classifier.clone(), background, feature_names)
    }

    /// Bind to a background that is already in the transformed space
    pub fn from_transformed(
        classifier: Classifier,
        background: Array2<f64>,
        feature_names: Vec<String>,
    ) -> Result<Self> {
        if background.nrows() == 0 {
            return Err(AppError::Processing(
                "attribution background sample is empty".to_string(),
            ));
        }
        if feature_names.len() != background.ncols() {
            return Err(AppError::Processing(format!(
                "{} feature names for {} transformed features",
                feature_names.len(),
                background.ncols()
            )));
        }
        classifier.validate(background.ncols())?;

        let expected_value = background
            .axis_iter(Axis(0))
            .map(|z| classifier.decision_function(z))
            .sum::<f64>()
            / background.nrows() as f64;

        tracing::debug!(
            background_rows = background.nrows(),
            features = background.ncols(),
            expected_value,
            "Attribution engine bound to background"
        );

        let baseline = column_means(&background);

        Ok(Self {
            classifier,
            background,
            baseline,
            feature_names,
            expected_value,
        })
    }

    /// Mean model output over the background (log-odds)
    pub fn expected_value(&self) -> f64 {
        self.expected_value
    }

    /// Transformed feature names, raw (uncleaned)
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Signed contribution of every transformed feature for one row
    pub fn explain(&self, x: ArrayView1<f64>) -> Result<Array1<f64>> {
        if x.len() != self.background.ncols() {
            return Err(AppError::Processing(format!(
                "row has {} features, explainer expects {}",
                x.len(),
                self.background.ncols()
            )));
        }

        let phi = match &self.classifier {
            Classifier::Logistic { coef, .. } => Array1::from_iter(
                coef.iter()
                    .zip(x.iter().zip(self.baseline.iter()))
                    .map(|(w, (xi, mi))| w * (xi - mi)),
            ),
            Classifier::GradientBoosting(ensemble) => self.explain_trees(ensemble, x),
        };

        if phi.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Processing(
                "explainer produced non-finite contributions".to_string(),
            ));
        }
        Ok(phi)
    }

    /// Explain a row and keep the `top_k` largest contributors
    pub fn top_factors(&self, x: ArrayView1<f64>, top_k: usize) -> Result<Vec<TopFactor>> {
        let phi = self.explain(x)?;
        let values = phi.to_vec();
        Ok(rank_top_factors(&values, &self.feature_names, top_k))
    }

    fn explain_trees(&self, ensemble: &TreeEnsemble, x: ArrayView1<f64>) -> Array1<f64> {
        let n_features = x.len();
        let mut phi = vec![0.0; n_features];
        let mut path = CoalitionPath::new(n_features);
        let scale = ensemble.learning_rate / self.background.nrows() as f64;

        for z in self.background.axis_iter(Axis(0)) {
            for tree in &ensemble.trees {
                interventional_walk(tree, 0, x, z, scale, &mut path, &mut phi);
            }
        }
        Array1::from(phi)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Side {
    Free,
    Foreground,
    Background,
}

/// Features forced to the foreground or background value on the current path
struct CoalitionPath {
    side: Vec<Side>,
    foreground: Vec<usize>,
    background: Vec<usize>,
}

impl CoalitionPath {
    fn new(n_features: usize) -> Self {
        Self {
            side: vec![Side::Free; n_features],
            foreground: Vec::new(),
            background: Vec::new(),
        }
    }
}

/// Walk one tree for a (foreground, background) pair.
///
/// A leaf reached with foreground set F and background set B is the model
/// output exactly for coalitions S with F ⊆ S and S ∩ B = ∅. Summing the
/// Shapley kernel over the free features gives weight (|F|-1)!|B|!/(|F|+|B|)!
/// for each member of F, and minus |F|!(|B|-1)!/(|F|+|B|)! for each member of B.
fn interventional_walk(
    tree: &Tree,
    idx: usize,
    x: ArrayView1<f64>,
    z: ArrayView1<f64>,
    scale: f64,
    path: &mut CoalitionPath,
    phi: &mut [f64],
) {
    let node = &tree.nodes[idx];
    let feature = match node {
        Node::Leaf { value } => {
            let nf = path.foreground.len();
            let nb = path.background.len();
            let v = value * scale;
            if nf > 0 {
                let w = shapley_weight(nf - 1, nb) * v;
                for &f in &path.foreground {
                    phi[f] += w;
                }
            }
            if nb > 0 {
                let w = shapley_weight(nf, nb - 1) * v;
                for &f in &path.background {
                    phi[f] -= w;
                }
            }
            return;
        }
        Node::Split { feature, .. } => *feature,
    };

    let x_child = Tree::child(node, x[feature]);
    let z_child = Tree::child(node, z[feature]);

    if x_child == z_child {
        interventional_walk(tree, x_child, x, z, scale, path, phi);
        return;
    }

    match path.side[feature] {
        Side::Foreground => interventional_walk(tree, x_child, x, z, scale, path, phi),
        Side::Background => interventional_walk(tree, z_child, x, z, scale, path, phi),
        Side::Free => {
            path.side[feature] = Side::Foreground;
            path.foreground.push(feature);
            interventional_walk(tree, x_child, x, z, scale, path, phi);
            path.foreground.pop();

            path.side[feature] = Side::Background;
            path.background.push(feature);
            interventional_walk(tree, z_child, x, z, scale, path, phi);
            path.background.pop();

            path.side[feature] = Side::Free;
        }
    }
}

/// s! t! / (s + t + 1)!
fn shapley_weight(s: usize, t: usize) -> f64 {
    let n = s + t;
    let k = s.min(t);
    let mut binom = 1.0;
    for i in 0..k {
        binom = binom * (n - i) as f64 / (i + 1) as f64;
    }
    1.0 / ((n + 1) as f64 * binom)
}
