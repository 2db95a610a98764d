use std::collections::HashMap;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequest, Json, Multipart, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::{
    app_state::AppState,
    documents,
    error::ApiError,
    register::{self, DocumentUpload, RegistrationResponse, RegistrationSubmission},
};

const FORM_ERROR: &str = "Error procesando los datos del formulario";
const FRONT_FIELD: &str = "dniDelante";
const BACK_FIELD: &str = "dniDetras";

// --- Payloads ---

#[derive(Deserialize, Default)]
pub struct WorkerLookupPayload {
    #[serde(default)]
    dni: String,
    #[serde(default)]
    correo: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    let body_limit = app_state.config.max_upload_bytes;
    Router::new()
        .route(
            "/register-worker",
            post(register_worker_handler)
                .options(preflight_handler)
                .fallback(method_not_allowed),
        )
        .route(
            "/worker-documents",
            post(worker_documents_handler)
                .options(preflight_handler)
                .fallback(method_not_allowed),
        )
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app_state)
}

// --- Extractor del formulario de alta ---

/// Acepta `multipart/form-data` (lo normal) o un JSON con las imágenes
/// como data-URL en base64.
pub struct RegistrationForm(pub RegistrationSubmission);

#[async_trait]
impl<S> FromRequest<S> for RegistrationForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        let submission = if is_multipart {
            let multipart = Multipart::from_request(req, state).await.map_err(form_error)?;
            read_multipart(multipart).await?
        } else {
            let Json(body) = Json::<Map<String, Value>>::from_request(req, state)
                .await
                .map_err(form_error)?;
            read_json(body)?
        };
        Ok(Self(submission))
    }
}

fn form_error(cause: impl std::fmt::Display) -> ApiError {
    warn!("Formulario ilegible: {cause}");
    ApiError::BadRequest(FORM_ERROR.to_string())
}

async fn read_multipart(mut multipart: Multipart) -> Result<RegistrationSubmission, ApiError> {
    let mut form = RegistrationSubmission::default();
    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == FRONT_FIELD || name == BACK_FIELD {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(form_error)?.to_vec();
            let upload = DocumentUpload {
                bytes,
                file_name,
                content_type,
            };
            if name == FRONT_FIELD {
                form.dni_delante = Some(upload);
            } else {
                form.dni_detras = Some(upload);
            }
        } else if field.file_name().is_some() {
            // Adjuntos que no son el DNI: se descartan sin leerlos como texto.
            debug!("Adjunto ignorado en el campo '{name}'");
        } else if !name.is_empty() {
            let value = field.text().await.map_err(form_error)?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

fn read_json(body: Map<String, Value>) -> Result<RegistrationSubmission, ApiError> {
    let mut fields: HashMap<String, String> = body
        .iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key.clone(), s.clone())),
            Value::Number(n) => Some((key.clone(), n.to_string())),
            _ => None,
        })
        .collect();

    let mut image = |field: &str| -> Result<Option<DocumentUpload>, ApiError> {
        let raw = fields.remove(field).unwrap_or_default();
        let file_name = fields.remove(&format!("{field}Nombre"));
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let (content_type, bytes) = decode_data_url(&raw)?;
        Ok(Some(DocumentUpload {
            bytes,
            file_name,
            content_type,
        }))
    };
    let dni_delante = image(FRONT_FIELD)?;
    let dni_detras = image(BACK_FIELD)?;

    Ok(RegistrationSubmission {
        fields,
        dni_delante,
        dni_detras,
    })
}

/// `data:image/png;base64,AAAA` → (`image/png`, bytes). Sin prefijo se asume
/// base64 plano.
fn decode_data_url(raw: &str) -> Result<(Option<String>, Vec<u8>), ApiError> {
    let (content_type, payload) = match raw.strip_prefix("data:").and_then(|rest| rest.split_once(',')) {
        Some((header, payload)) => {
            let mime = header.trim_end_matches(";base64");
            ((!mime.is_empty()).then(|| mime.to_string()), payload)
        }
        None => (None, raw),
    };
    let bytes = STANDARD.decode(payload.trim()).map_err(form_error)?;
    Ok((content_type, bytes))
}

// --- Handlers ---

#[axum::debug_handler]
async fn register_worker_handler(
    State(state): State<AppState>,
    RegistrationForm(submission): RegistrationForm,
) -> Result<Json<RegistrationResponse>, ApiError> {
    let worker = submission.validate()?;
    let response = register::register_worker(&state, worker).await?;
    Ok(Json(response))
}

#[axum::debug_handler]
async fn worker_documents_handler(
    State(state): State<AppState>,
    payload: Result<Json<WorkerLookupPayload>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(payload) = payload.map_err(|e| {
        warn!("Cuerpo de consulta inválido: {e}");
        ApiError::BadRequest("DNI y correo son obligatorios".to_string())
    })?;
    let (dni, correo) = (payload.dni.trim(), payload.correo.trim());
    if dni.is_empty() || correo.is_empty() {
        return Err(ApiError::BadRequest("DNI y correo son obligatorios".to_string()));
    }

    info!("📂 Consulta de documentos para DNI {dni}");
    let body = documents::worker_documents(&state, dni, correo).await?;
    Ok(Json(body))
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "cachedResponses": state.cache.len() }))
}

async fn preflight_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}
