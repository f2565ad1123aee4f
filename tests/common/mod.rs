//! Shared fixtures: a small artifact directory, stub networks and a stub
//! narrator, so the HTTP contract can be exercised without model weights.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use axum::Router;
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::{Array1, Array2, Array4};
use parking_lot::Mutex;
use pcos_screening::{
    api::{build_router, AppState},
    artifacts::{ArtifactStore, LoadedArtifacts},
    config::{ArtifactsConfig, ServerConfig},
    context::ServiceContext,
    error::{AppError, Result},
    ml::{FusionNetwork, ImageNetwork, TabularMode, FUSION_FEATURE_KEYS},
    narration::TextGenerator,
};
use serde_json::{json, Map, Value};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const BOUNDARY: &str = "pcos-test-boundary";

pub fn simple_pipeline() -> Value {
    json!({
        "preprocess": {
            "transformers": [
                {
                    "kind": "numeric",
                    "name": "num",
                    "columns": ["age_yrs", "bmi", "weight_gain"],
                    "impute": [28.0, 24.0, 0.0],
                    "mean": [28.0, 24.0, 0.0],
                    "scale": [5.0, 4.0, 1.0]
                },
                {
                    "kind": "one_hot",
                    "name": "cat",
                    "columns": ["cycle_r_i"],
                    "categories": [["2", "4"]],
                    "impute": ["2"]
                }
            ]
        },
        "classifier": {
            "kind": "logistic",
            "coef": [0.1, 0.6, 0.8, -0.3, 0.3],
            "intercept": -0.5
        }
    })
}

pub fn clinical_pipeline() -> Value {
    json!({
        "preprocess": {
            "transformers": [
                {
                    "kind": "numeric",
                    "name": "num",
                    "columns": ["amh_ng_ml", "follicle_no_l", "follicle_no_r"],
                    "impute": [4.0, 6.0, 6.0]
                },
                {
                    "kind": "one_hot",
                    "name": "cat",
                    "columns": ["cycle_r_i"],
                    "categories": [["2", "4"]],
                    "impute": ["2"]
                }
            ]
        },
        "classifier": {
            "kind": "gradient_boosting",
            "init": -0.2,
            "learning_rate": 1.0,
            "trees": [
                { "nodes": [
                    { "feature": 0, "threshold": 5.0, "left": 1, "right": 2 },
                    { "value": -0.4 },
                    { "value": 0.9 }
                ]},
                { "nodes": [
                    { "feature": 4, "threshold": 0.5, "left": 1, "right": 2 },
                    { "value": -0.2 },
                    { "feature": 1, "threshold": 10.0, "left": 3, "right": 4 },
                    { "value": 0.3 },
                    { "value": 0.7 }
                ]}
            ]
        }
    })
}

fn write(dir: &Path, file: &str, value: &Value) {
    std::fs::write(dir.join(file), value.to_string()).unwrap();
}

/// Write every JSON artifact the service reads into `dir`
pub fn write_artifacts(dir: &Path) {
    write(dir, "risk_thresholds.json", &json!({ "low_max": 0.33, "medium_max": 0.66 }));
    write(
        dir,
        "simple_schema.json",
        &json!({ "features": ["age_yrs", "bmi", "cycle_r_i", "weight_gain"] }),
    );
    write(
        dir,
        "clinical_schema.json",
        &json!({ "features": ["amh_ng_ml", "follicle_no_l", "follicle_no_r", "cycle_r_i"] }),
    );
    write(dir, "pcos_simple_pipeline.json", &simple_pipeline());
    write(dir, "pcos_clinical_pipeline.json", &clinical_pipeline());
    write(
        dir,
        "simple_shap_background.json",
        &json!([
            { "age_yrs": 25, "bmi": 21.5, "cycle_r_i": 2, "weight_gain": 0 },
            { "age_yrs": 31, "bmi": 27.0, "cycle_r_i": 4, "weight_gain": 1 },
            { "age_yrs": 29, "bmi": 23.0, "cycle_r_i": "2", "weight_gain": 0 }
        ]),
    );
    write(
        dir,
        "clinical_shap_background.json",
        &json!([
            { "amh_ng_ml": 3.1, "follicle_no_l": 5, "follicle_no_r": 6, "cycle_r_i": 2 },
            { "amh_ng_ml": 7.8, "follicle_no_l": 14, "follicle_no_r": 12, "cycle_r_i": 4 },
            { "amh_ng_ml": 4.4, "follicle_no_l": 8, "follicle_no_r": 7, "cycle_r_i": 2 },
            { "amh_ng_ml": null, "follicle_no_l": 11, "follicle_no_r": 9, "cycle_r_i": 4 }
        ]),
    );
    write(
        dir,
        "fusion_scaler.json",
        &json!({ "mean": vec![0.0; 19], "scale": vec![1.0; 19] }),
    );
}

pub fn artifact_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_artifacts(dir.path());
    dir
}

pub fn store(dir: &TempDir) -> ArtifactStore {
    ArtifactStore::new(ArtifactsConfig {
        dir: dir.path().to_path_buf(),
        ..Default::default()
    })
}

/// Image network returning fixed logits
pub struct FixedImageNetwork(pub [f32; 2]);

impl ImageNetwork for FixedImageNetwork {
    fn logits(&self, image: &Array4<f32>) -> Result<Array1<f32>> {
        assert_eq!(image.shape(), &[1, 3, 224, 224]);
        Ok(Array1::from(self.0.to_vec()))
    }
}

/// Fusion network whose positive logit is the mean of the scaled clinical row
pub struct MeanFusionNetwork;

impl FusionNetwork for MeanFusionNetwork {
    fn logits(&self, image: &Array4<f32>, clinical: &Array2<f32>) -> Result<Array1<f32>> {
        assert_eq!(image.shape(), &[1, 3, 224, 224]);
        assert_eq!(clinical.shape(), &[1, 19]);
        let mean = clinical.mean().unwrap_or(0.0);
        Ok(Array1::from(vec![0.0, mean / 10.0]))
    }
}

/// Text generator that records prompts and answers with a fixed line
#[derive(Default)]
pub struct StubNarrator {
    pub prompts: Mutex<Vec<String>>,
    pub fail: bool,
}

impl StubNarrator {
    pub fn failing() -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl TextGenerator for StubNarrator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        if self.fail {
            return Err(AppError::Integration {
                integration_source: "stub".to_string(),
                message: "collaborator unavailable".to_string(),
            });
        }
        Ok("  This is a screening estimate, not a diagnosis.  ".to_string())
    }
}

pub fn loaded_artifacts(dir: &TempDir) -> LoadedArtifacts {
    let store = store(dir);
    LoadedArtifacts {
        simple: store.load_tabular(TabularMode::Simple).unwrap(),
        clinical: store.load_tabular(TabularMode::Clinical).unwrap(),
        thresholds: store.load_thresholds().unwrap(),
        fusion_scaler: store.load_fusion_scaler().unwrap(),
        image_network: Box::new(FixedImageNetwork([0.2, 1.1])),
        fusion_network: Box::new(MeanFusionNetwork),
    }
}

pub struct TestApp {
    pub router: Router,
    pub narrator: Arc<StubNarrator>,
    _dir: TempDir,
}

pub fn test_app_with(narrator: StubNarrator, server: ServerConfig) -> TestApp {
    let dir = artifact_dir();
    let narrator = Arc::new(narrator);
    let context = ServiceContext::build(loaded_artifacts(&dir), narrator.clone(), 6).unwrap();
    let router = build_router(AppState::new(Arc::new(context)), &server);
    TestApp {
        router,
        narrator,
        _dir: dir,
    }
}

pub fn test_app() -> TestApp {
    test_app_with(StubNarrator::default(), ServerConfig::default())
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([120, 60, 200]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn full_clinical() -> Map<String, Value> {
    FUSION_FEATURE_KEYS
        .iter()
        .enumerate()
        .map(|(i, k)| (k.to_string(), json!(i as f64 * 0.5)))
        .collect()
}

/// One multipart part
pub enum Part<'a> {
    File {
        name: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
    Text {
        name: &'a str,
        value: &'a str,
    },
}

pub fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body: Vec<u8> = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File {
                name,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"upload\"\r\n\
                         Content-Type: {}\r\n\r\n",
                        name, content_type
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn json_request(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: axum::response::Response) -> Value {
    use http_body_util::BodyExt;
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
