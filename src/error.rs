//! Errores de la frontera HTTP y su traducción a códigos de estado.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Faltan campos obligatorios: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("{0}")]
    BadRequest(String),

    #[error("Ya existe un trabajador registrado con ese DNI o correo electrónico")]
    Duplicate,

    #[error("{0}")]
    NotFound(String),

    #[error("Método no permitido")]
    MethodNotAllowed,

    /// Error no recuperable. `details` sólo se rellena fuera de producción.
    #[error("{message}")]
    Internal {
        message: String,
        details: Option<String>,
    },
}

impl ApiError {
    /// Registra la causa completa y construye un 500 con mensaje genérico.
    pub fn internal(message: &str, cause: &anyhow::Error, expose_details: bool) -> Self {
        error!("{message}: {cause:#}");
        Self::Internal {
            message: message.to_string(),
            details: expose_details.then(|| format!("{cause:#}")),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingFields(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Duplicate => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::MissingFields(fields) => json!({
                "error": "Todos los campos son obligatorios",
                "camposFaltantes": fields,
            }),
            Self::Internal { message, details } => match details {
                Some(details) => json!({ "error": message, "details": details }),
                None => json!({ "error": message, "details": "Por favor, inténtalo de nuevo" }),
            },
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
