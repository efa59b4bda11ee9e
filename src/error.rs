use std::time::Duration;

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::{
    capture::CaptureError,
    dao::storage::StorageError,
    inference::ClassifierError,
    state::{AbortError, ApplyError, PlanError},
};

/// Errors raised by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The user or platform refused camera access.
    #[error("camera permission denied: {0}")]
    DevicePermissionDenied(String),
    /// No usable camera, or the camera broke mid-round.
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    /// Lifecycle misuse (e.g. finishing a round that never began).
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The classifier could not be reached or answered garbage.
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),
    /// The classifier did not answer within the bounded wait.
    #[error("classifier timed out after {0:?}")]
    ClassifierTimeout(Duration),
    /// Rejected manual score edit.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Completing a game where nobody scored.
    #[error("nothing to record: both scores are zero")]
    NothingToRecord,
    /// The stats backend rejected a write.
    #[error("persistence unavailable")]
    PersistenceUnavailable(#[source] StorageError),
    /// Transition side effects exceeded their time limit.
    #[error("operation timed out")]
    Timeout,
}

/// Error category shown next to the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DevicePermissionDenied,
    DeviceUnavailable,
    InvalidState,
    ClassifierUnavailable,
    ClassifierTimeout,
    InvalidInput,
    NothingToRecord,
    PersistenceUnavailable,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::DevicePermissionDenied => "device permission denied",
            ErrorKind::DeviceUnavailable => "device unavailable",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::ClassifierUnavailable => "classifier unavailable",
            ErrorKind::ClassifierTimeout => "classifier timeout",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::NothingToRecord => "nothing to record",
            ErrorKind::PersistenceUnavailable => "persistence unavailable",
            ErrorKind::Timeout => "timeout",
        }
    }

    /// Whether the failure concerns the capture device.
    pub fn is_device(self) -> bool {
        matches!(
            self,
            ErrorKind::DevicePermissionDenied | ErrorKind::DeviceUnavailable
        )
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::DevicePermissionDenied(_) => ErrorKind::DevicePermissionDenied,
            EngineError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            EngineError::InvalidState(_) => ErrorKind::InvalidState,
            EngineError::ClassifierUnavailable(_) => ErrorKind::ClassifierUnavailable,
            EngineError::ClassifierTimeout(_) => ErrorKind::ClassifierTimeout,
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::NothingToRecord => ErrorKind::NothingToRecord,
            EngineError::PersistenceUnavailable(_) => ErrorKind::PersistenceUnavailable,
            EngineError::Timeout => ErrorKind::Timeout,
        }
    }
}

impl From<CaptureError> for EngineError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied(message) => EngineError::DevicePermissionDenied(message),
            CaptureError::Unavailable(message) => EngineError::DeviceUnavailable(message),
            invalid @ CaptureError::InvalidState { .. } => {
                EngineError::InvalidState(invalid.to_string())
            }
        }
    }
}

impl From<ClassifierError> for EngineError {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::Unavailable(message) => EngineError::ClassifierUnavailable(message),
            ClassifierError::Timeout(after) => EngineError::ClassifierTimeout(after),
            ClassifierError::Cancelled => {
                EngineError::InvalidState("classification superseded".into())
            }
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        EngineError::PersistenceUnavailable(err)
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or out-of-range input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Camera access refused.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Unknown path parameter.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Device, classifier or storage failure.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::InvalidInput(_) => AppError::BadRequest(message),
            EngineError::InvalidState(_) | EngineError::NothingToRecord => {
                AppError::Conflict(message)
            }
            EngineError::DevicePermissionDenied(_) => AppError::Forbidden(message),
            EngineError::DeviceUnavailable(_)
            | EngineError::ClassifierUnavailable(_)
            | EngineError::ClassifierTimeout(_)
            | EngineError::PersistenceUnavailable(_)
            | EngineError::Timeout => AppError::ServiceUnavailable(message),
        }
    }
}

/// JSON body returned with every error status.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

impl From<PlanError> for EngineError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                EngineError::InvalidState("state transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => EngineError::InvalidState(invalid.to_string()),
        }
    }
}

impl From<ApplyError> for EngineError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => EngineError::InvalidState("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                EngineError::InvalidState("pending transition does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => EngineError::InvalidState(format!(
                "state changed during transition (expected {expected}, got {actual})"
            )),
            ApplyError::VersionMismatch { expected, actual } => {
                EngineError::InvalidState(format!(
                    "state version mismatch during transition (expected {expected}, got {actual})"
                ))
            }
        }
    }
}

impl From<AbortError> for EngineError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => EngineError::InvalidState("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                EngineError::InvalidState("transition plan does not match".into())
            }
        }
    }
}
