/// HTTP contract tests for the screening API
///
/// Every endpoint runs against real tabular pipelines loaded from a temporary
/// artifact directory, stub image/fusion networks and a stub narrator.
mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use pcos_screening::config::ServerConfig;
use pcos_screening::ml::RiskThresholds;
use serde_json::{json, Value};
use tower::ServiceExt;

fn assert_risk_consistent(body: &Value) {
    let p = body["probability"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&p), "probability {} out of range", p);
    let expected = RiskThresholds::new(0.33, 0.66).unwrap().classify(p);
    assert_eq!(body["risk_level"], json!(expected.to_string()));
}

fn assert_ranked(factors: &[Value]) {
    let impacts: Vec<f64> = factors
        .iter()
        .map(|f| f["impact"].as_f64().unwrap().abs())
        .collect();
    assert!(impacts.windows(2).all(|w| w[0] >= w[1]), "{:?}", impacts);
}

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let response = app
        .router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_predict_simple() {
    let app = test_app();
    let payload = json!({ "age_yrs": 33, "bmi": 31.2, "cycle_r_i": 4, "weight_gain": 1 });
    let response = app
        .router
        .oneshot(json_request("/predict/simple", &payload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_risk_consistent(&body);

    let factors = body["top_factors"].as_array().unwrap();
    assert_eq!(factors.len(), 5);
    assert_ranked(factors);
    for factor in factors {
        let name = factor["feature"].as_str().unwrap();
        assert!(!name.starts_with("num__") && !name.starts_with("cat__"), "{}", name);
        let impact = factor["impact"].as_f64().unwrap();
        let direction = if impact > 0.0 { "increases_risk" } else { "decreases_risk" };
        assert_eq!(factor["direction"], json!(direction));
    }
    assert!(factors.iter().any(|f| f["feature"] == json!("cycle_r_i=4")));

    assert_eq!(
        body["narration"],
        json!("This is a screening estimate, not a diagnosis.")
    );
    assert_eq!(app.narrator.calls(), 1);
    assert!(app.narrator.prompts.lock()[0].contains("Mode: simple"));
}

#[tokio::test]
async fn test_numeric_and_string_cycle_agree() {
    let app = test_app();
    let as_number = json!({ "bmi": 26, "cycle_r_i": 4 });
    let as_string = json!({ "bmi": 26, "cycle_r_i": "4" });

    let a = app
        .router
        .clone()
        .oneshot(json_request("/predict/simple", &as_number))
        .await
        .unwrap();
    let b = app
        .router
        .oneshot(json_request("/predict/simple", &as_string))
        .await
        .unwrap();

    let a = body_json(a).await;
    let b = body_json(b).await;
    assert_eq!(a["probability"], b["probability"]);
    assert_eq!(a["top_factors"], b["top_factors"]);
}

#[tokio::test]
async fn test_float_cycle_matches_integer_category() {
    let app = test_app();
    let mut bodies = Vec::new();
    for cycle in [json!(4), json!(4.0), json!("7")] {
        let response = app
            .router
            .clone()
            .oneshot(json_request(
                "/predict/simple",
                &json!({ "bmi": 26, "cycle_r_i": cycle }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        bodies.push(body_json(response).await);
    }

    assert_eq!(bodies[0]["probability"], bodies[1]["probability"]);
    assert_eq!(bodies[0]["top_factors"], bodies[1]["top_factors"]);
    // an unseen category encodes as all zeros and scores differently
    assert_ne!(bodies[1]["probability"], bodies[2]["probability"]);
}

#[tokio::test]
async fn test_empty_payload_is_imputed() {
    let app = test_app();
    let response = app
        .router
        .oneshot(json_request("/predict/clinical", &json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_risk_consistent(&body_json(response).await);
}

#[tokio::test]
async fn test_predict_clinical_tree_model() {
    let app = test_app();
    let payload = json!({
        "amh_ng_ml": 9.5,
        "follicle_no_l": 14,
        "follicle_no_r": 12,
        "cycle_r_i": 4
    });
    let response = app
        .router
        .oneshot(json_request("/predict/clinical", &payload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_risk_consistent(&body);
    // raw = -0.2 + 0.9 + 0.7 = 1.4
    let expected = 1.0 / (1.0 + (-1.4f64).exp());
    assert!((body["probability"].as_f64().unwrap() - expected).abs() < 1e-9);

    let factors = body["top_factors"].as_array().unwrap();
    assert!(factors.len() <= 6);
    assert_ranked(factors);
    assert_eq!(factors[0]["feature"], json!("amh_ng_ml"));
}

#[tokio::test]
async fn test_tabular_rejects_non_object() {
    let app = test_app();
    let response = app
        .router
        .oneshot(json_request("/predict/simple", &json!([1, 2, 3])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
    assert!(body["detail"].as_str().unwrap().contains("JSON object"));
}

#[tokio::test]
async fn test_tabular_rejects_malformed_json() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/predict/clinical")
        .header("content-type", "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["detail"].is_string());
}

#[tokio::test]
async fn test_narration_failure_fails_request() {
    let app = test_app_with(StubNarrator::failing(), ServerConfig::default());
    let response = app
        .router
        .oneshot(json_request("/predict/simple", &json!({ "bmi": 30 })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["error"]["code"], json!("INTEGRATION_ERROR"));
}

#[tokio::test]
async fn test_image_one_pixel() {
    let app = test_app();
    let png = png_bytes(1, 1);
    let request = multipart_request(
        "/predict/image",
        &[Part::File {
            name: "image",
            content_type: "image/png",
            bytes: &png,
        }],
    );
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_risk_consistent(&body);
    assert_eq!(body["top_factors"], json!([]));
    assert_eq!(app.narrator.calls(), 1);
    assert!(app.narrator.prompts.lock()[0].contains("ultrasound"));
}

#[tokio::test]
async fn test_image_rejects_non_image_content_type() {
    let app = test_app();
    let png = png_bytes(4, 4);
    let request = multipart_request(
        "/predict/image",
        &[Part::File {
            name: "image",
            content_type: "text/plain",
            bytes: &png,
        }],
    );
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["detail"],
        json!("Only image files are allowed")
    );
    assert_eq!(app.narrator.calls(), 0);
}

#[tokio::test]
async fn test_image_rejects_corrupt_bytes() {
    let app = test_app();
    let request = multipart_request(
        "/predict/image",
        &[Part::File {
            name: "image",
            content_type: "image/jpeg",
            bytes: b"\xff\xd8 definitely not a jpeg",
        }],
    );
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["detail"], json!("Invalid image file"));
}

#[tokio::test]
async fn test_image_missing_field() {
    let app = test_app();
    let request = multipart_request(
        "/predict/image",
        &[Part::Text {
            name: "photo",
            value: "x",
        }],
    );
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["detail"],
        json!("Missing form field: image")
    );
}

#[tokio::test]
async fn test_image_rejects_non_multipart_body() {
    let app = test_app();
    let response = app
        .router
        .oneshot(json_request("/predict/image", &json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_over_limit() {
    let server = ServerConfig {
        max_upload_bytes: 512,
        ..Default::default()
    };
    let app = test_app_with(StubNarrator::default(), server);
    let big = vec![0u8; 4096];
    let request = multipart_request(
        "/predict/image",
        &[Part::File {
            name: "image",
            content_type: "image/png",
            bytes: &big,
        }],
    );
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_combined() {
    let app = test_app();
    let png = png_bytes(8, 8);
    let clinical = Value::Object(full_clinical()).to_string();
    let request = multipart_request(
        "/predict/combined",
        &[
            Part::File {
                name: "image",
                content_type: "image/png",
                bytes: &png,
            },
            Part::Text {
                name: "clinical",
                value: &clinical,
            },
        ],
    );
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_risk_consistent(&body);
    assert_eq!(body["top_factors"], json!([]));

    let level = body["risk_level"].as_str().unwrap();
    assert_eq!(
        body["narration"],
        json!(format!(
            "This combined screening estimate suggests a {} risk based on image + clinical inputs.",
            level
        ))
    );
    // the combined path never calls the collaborator
    assert_eq!(app.narrator.calls(), 0);
}

async fn combined_error(clinical: &str) -> (StatusCode, Value) {
    let app = test_app();
    let png = png_bytes(2, 2);
    let request = multipart_request(
        "/predict/combined",
        &[
            Part::File {
                name: "image",
                content_type: "image/png",
                bytes: &png,
            },
            Part::Text {
                name: "clinical",
                value: clinical,
            },
        ],
    );
    let response = app.router.oneshot(request).await.unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

#[tokio::test]
async fn test_combined_missing_clinical_key() {
    let mut payload = full_clinical();
    payload.remove("amh_ng_ml");
    let (status, body) = combined_error(&Value::Object(payload).to_string()).await;

    assert!(status.is_client_error());
    assert_eq!(body["detail"], json!("Missing clinical field: amh_ng_ml"));
}

#[tokio::test]
async fn test_combined_non_numeric_clinical_value() {
    let mut payload = full_clinical();
    payload.insert("bmi".to_string(), json!("abc"));
    let (status, body) = combined_error(&Value::Object(payload).to_string()).await;

    assert!(status.is_client_error());
    assert_eq!(body["detail"], json!("Invalid clinical value for: bmi"));
}

#[tokio::test]
async fn test_combined_invalid_json() {
    let (status, body) = combined_error("{ bmi: 22").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], json!("Invalid clinical JSON"));
}

#[tokio::test]
async fn test_combined_missing_clinical_field() {
    let app = test_app();
    let png = png_bytes(2, 2);
    let request = multipart_request(
        "/predict/combined",
        &[Part::File {
            name: "image",
            content_type: "image/png",
            bytes: &png,
        }],
    );
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["detail"],
        json!("Missing form field: clinical")
    );
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let _ = pcos_screening::metrics::init_metrics();
    let app = test_app();

    let warmup = app
        .router
        .clone()
        .oneshot(json_request("/predict/simple", &json!({ "bmi": 22 })))
        .await
        .unwrap();
    assert_eq!(warmup.status(), StatusCode::OK);

    let response = app
        .router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    use http_body_util::BodyExt;
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("pcos_screening_predictions_total"));
    assert!(text.contains("pcos_screening_http_requests_total"));
}
