use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::publisher::PublishError;
use crate::query::QueryError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Store read failed: {0}")]
    StoreRead(String),

    #[error("Not available in this run mode: {0}")]
    NotEnabled(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        HttpResponse::build(code).json(ErrorResponse {
            error: self.to_string(),
            code: code.as_u16(),
        })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Publish(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotEnabled(_) => StatusCode::NOT_FOUND,
            AppError::StoreRead(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PublishError> for AppError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Validation(e) => AppError::Validation(e.to_string()),
            PublishError::Serialization(e) => AppError::Internal(e),
            e @ PublishError::Delivery { .. } => AppError::Publish(e.to_string()),
        }
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        AppError::StoreRead(err.to_string())
    }
}
