use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use settlement_engine::{traits::SettlementDbError, WorkflowError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("Authentication Error. {0}")]
    AuthenticationError(#[from] AuthError),
    #[error("Insufficient Permissions. {0}")]
    InsufficientPermissions(String),
    #[error(transparent)]
    WorkflowError(#[from] WorkflowError),
}

impl From<SettlementDbError> for ServerError {
    fn from(e: SettlementDbError) -> Self {
        Self::WorkflowError(WorkflowError::from(e))
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationError(e) => match e {
                AuthError::MissingToken => StatusCode::UNAUTHORIZED,
                AuthError::ValidationError(_) => StatusCode::UNAUTHORIZED,
                AuthError::PoorlyFormattedToken(_) => StatusCode::BAD_REQUEST,
            },
            Self::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            Self::WorkflowError(e) => match e {
                WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
                WorkflowError::InvalidTransition(_) => StatusCode::CONFLICT,
                WorkflowError::ApprovalRequired => StatusCode::CONFLICT,
                WorkflowError::SelfApprovalForbidden => StatusCode::CONFLICT,
                WorkflowError::Conflict(_) => StatusCode::CONFLICT,
                WorkflowError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                WorkflowError::GatewayFailure(_) => StatusCode::BAD_GATEWAY,
                WorkflowError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
                WorkflowError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let Self::WorkflowError(WorkflowError::RateLimited { retry_after_secs }) = self {
            builder.insert_header(("Retry-After", retry_after_secs.to_string()));
        }
        builder
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("No bearer token was provided.")]
    MissingToken,
    #[error("Access token is invalid. {0}")]
    ValidationError(String),
    #[error("Access token is not in the correct format. {0}")]
    PoorlyFormattedToken(String),
}
