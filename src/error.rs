use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Client '{0}' not found")]
    ClientNotFound(String),

    #[error("Product '{0}' not found")]
    ProductNotFound(String),

    #[error("Product '{0}' is inactive")]
    ProductInactive(String),

    #[error("Order '{0}' not found")]
    OrderNotFound(String),

    #[error("User '{0}' not found")]
    UserNotFound(String),

    #[error("Insufficient stock for product '{0}'")]
    InsufficientStock(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Replica token mismatch")]
    ReplicaTokenMismatch,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<rocksdb::Error> for DbError {
    fn from(err: rocksdb::Error) -> Self {
        DbError::StorageError(err.to_string())
    }
}

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let status = match &self {
            DbError::ClientNotFound(_)
            | DbError::ProductNotFound(_)
            | DbError::OrderNotFound(_)
            | DbError::UserNotFound(_) => StatusCode::NOT_FOUND,
            DbError::InsufficientStock(_) => StatusCode::CONFLICT,
            DbError::BadRequest(_) | DbError::ProductInactive(_) => StatusCode::BAD_REQUEST,
            DbError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DbError::Forbidden(_) | DbError::ReplicaTokenMismatch => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
