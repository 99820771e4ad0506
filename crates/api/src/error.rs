//! HTTP error mapping

use alerting::{AlertError, RegistryError, TransitionError};
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use data_validator::ValidationReport;
use ingestion::{FieldError, IngestError};
use serde::Serialize;
use storage::StorageError;
use thiserror::Error;
use tracing::error;

/// Errors returned by handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Alert(#[from] AlertError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<FieldError>,
}

fn fields_of(report: &ValidationReport) -> Vec<FieldError> {
    report
        .field_errors()
        .into_iter()
        .map(|(field, message)| FieldError { field, message })
        .collect()
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Ingest(e) => match e {
                IngestError::Validation(_) | IngestError::BatchTooLarge { .. } => {
                    StatusCode::BAD_REQUEST
                }
                IngestError::DuplicateMeasurement { .. } => StatusCode::CONFLICT,
                IngestError::NotFound { .. } => StatusCode::NOT_FOUND,
                IngestError::Evaluation { .. } | IngestError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Alert(e) => match e {
                AlertError::NotFound(_) => StatusCode::NOT_FOUND,
                AlertError::Transition(TransitionError::InvalidTransition { .. })
                | AlertError::Contended { .. } => StatusCode::CONFLICT,
                AlertError::Transition(TransitionError::UnknownAction(_)) => {
                    StatusCode::BAD_REQUEST
                }
                AlertError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Registry(e) => match e {
                RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
                RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
                RegistryError::DuplicateConfiguration { .. } => StatusCode::CONFLICT,
                RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Storage(StorageError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn fields(&self) -> Vec<FieldError> {
        match self {
            ApiError::Ingest(IngestError::Validation(report))
            | ApiError::Registry(RegistryError::Validation(report)) => fields_of(report),
            ApiError::BadRequest(message) => vec![FieldError {
                field: "body",
                message: message.clone(),
            }],
            _ => Vec::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            error: message,
            fields: self.fields(),
        };
        (status, Json(body)).into_response()
    }
}
