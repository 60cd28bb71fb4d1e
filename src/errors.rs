use crate::store::StoreError;
use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("not signed in")]
    NotSignedIn,

    #[error("sign-in failed: {0}")]
    Auth(String),

    #[error("task {0} not found")]
    NotFound(String),

    #[error("task {0} is already completed")]
    AlreadyCompleted(String),

    #[error("only the administrator account may reset data")]
    Forbidden,

    #[error("reset needs a valid confirmation token; request a new one")]
    ConfirmationRequired,

    #[error(
        "reset was rejected by the data store (permission denied); \
         check the store's access rules for the tasks and stats collections"
    )]
    ResetPermissionDenied,

    #[error("{op} failed: {source}")]
    Write {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn write(op: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Write { op, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotSignedIn | AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyCompleted(_) | AppError::ConfirmationRequired => StatusCode::CONFLICT,
            AppError::Forbidden | AppError::ResetPermissionDenied => StatusCode::FORBIDDEN,
            AppError::Write { source, .. } | AppError::Store(source) => match source {
                StoreError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                StoreError::PreconditionFailed { .. } => StatusCode::CONFLICT,
                StoreError::Malformed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), self.to_string()).into_response()
    }
}
