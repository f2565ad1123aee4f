use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::metrics::gather_metrics;
use crate::ml::{FusionInput, ImageUpload, TabularMode};
use crate::orchestrator::{note_rejection, Endpoint, PredictionResult};
use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, Multipart, State,
    },
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};

pub const IMAGE_FIELD: &str = "image";
pub const CLINICAL_FIELD: &str = "clinical";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness; the process only listens once every artifact has loaded
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Prometheus text exposition
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

pub async fn predict_simple(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<PredictionResult>> {
    predict_tabular(state, TabularMode::Simple, body).await
}

pub async fn predict_clinical(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<PredictionResult>> {
    predict_tabular(state, TabularMode::Clinical, body).await
}

async fn predict_tabular(
    state: AppState,
    mode: TabularMode,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<PredictionResult>> {
    let payload = json_object(body).inspect_err(|e| note_rejection(mode.into(), e))?;
    let result = state.orchestrator.predict_tabular(mode, payload).await?;
    Ok(Json(result))
}

/// Multipart form with one `image` file field
pub async fn predict_image(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>> {
    let mut form = read_form(multipart)
        .await
        .inspect_err(|e| note_rejection(Endpoint::Image, e))?;
    let upload = form
        .take_image()
        .inspect_err(|e| note_rejection(Endpoint::Image, e))?;

    let result = state.orchestrator.predict_image(upload).await?;
    Ok(Json(result))
}

/// Multipart form with an `image` file field and a `clinical` JSON text field
pub async fn predict_combined(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>> {
    let input = read_form(multipart)
        .await
        .and_then(|mut form| {
            let image = form.take_image()?;
            let clinical = form.take_clinical()?;
            Ok(FusionInput { image, clinical })
        })
        .inspect_err(|e| note_rejection(Endpoint::Combined, e))?;

    let result = state.orchestrator.predict_combined(input).await?;
    Ok(Json(result))
}

fn json_object(
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Map<String, Value>> {
    let Json(value) = body?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::Validation(
            "Request body must be a JSON object".to_string(),
        )),
    }
}

/// Fields of interest from a prediction form; others are ignored
#[derive(Debug, Default)]
struct PredictionForm {
    image: Option<ImageUpload>,
    clinical: Option<String>,
}

impl PredictionForm {
    fn take_image(&mut self) -> Result<ImageUpload> {
        self.image.take().ok_or_else(|| missing_field(IMAGE_FIELD))
    }

    fn take_clinical(&mut self) -> Result<String> {
        self.clinical.take().ok_or_else(|| missing_field(CLINICAL_FIELD))
    }
}

fn missing_field(name: &str) -> AppError {
    AppError::Validation(format!("Missing form field: {}", name))
}

/// Drain the whole form into memory (the body limit layer caps its size)
async fn read_form(
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<PredictionForm> {
    let mut multipart = multipart?;
    let mut form = PredictionForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            IMAGE_FIELD => {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                form.image = Some(ImageUpload::new(content_type, bytes.to_vec()));
            }
            CLINICAL_FIELD => {
                form.clinical = Some(field.text().await?);
            }
            _ => {
                tracing::debug!(field = %name, "Ignoring unexpected form field");
            }
        }
    }

    Ok(form)
}
