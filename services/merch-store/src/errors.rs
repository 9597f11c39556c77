use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MerchStoreError>;

#[derive(Error, Debug)]
pub enum MerchStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Unit of work exceeded its deadline of {0} ms")]
    Timeout(u64),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("Insufficient funds: {user} cannot spend {required} coins")]
    InsufficientFunds { user: String, required: i64 },

    #[error("Invalid amount: {0}, amount must be positive")]
    InvalidAmount(i64),

    #[error("Cannot transfer coins to yourself")]
    SelfTransfer,

    #[error("User already exists: {0}")]
    DuplicateUser(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Ledger inconsistency: {0}")]
    LedgerInconsistency(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<argon2::password_hash::Error> for MerchStoreError {
    fn from(err: argon2::password_hash::Error) -> Self {
        MerchStoreError::Internal(format!("Credential hashing error: {}", err))
    }
}

impl ResponseError for MerchStoreError {
    fn error_response(&self) -> HttpResponse {
        // Infrastructure details stay in the logs.
        let message = match self {
            MerchStoreError::Database(_)
            | MerchStoreError::LedgerInconsistency(_)
            | MerchStoreError::Internal(_) => "Internal server error".to_string(),
            MerchStoreError::Token(_) => "Invalid token".to_string(),
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(json!({ "errors": message }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            MerchStoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MerchStoreError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            MerchStoreError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            MerchStoreError::Validation(_) => StatusCode::BAD_REQUEST,
            MerchStoreError::ItemNotFound(_) => StatusCode::BAD_REQUEST,
            MerchStoreError::UserNotFound(_) => StatusCode::BAD_REQUEST,
            MerchStoreError::RecipientNotFound(_) => StatusCode::BAD_REQUEST,
            MerchStoreError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
            MerchStoreError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            MerchStoreError::SelfTransfer => StatusCode::BAD_REQUEST,
            MerchStoreError::DuplicateUser(_) => StatusCode::CONFLICT,
            MerchStoreError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            MerchStoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            MerchStoreError::Token(_) => StatusCode::UNAUTHORIZED,
            MerchStoreError::LedgerInconsistency(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MerchStoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl MerchStoreError {
    /// Stable label for logs and the rejection counter.
    pub fn error_type(&self) -> &'static str {
        match self {
            MerchStoreError::Database(_) => "database_error",
            MerchStoreError::StoreUnavailable(_) => "store_unavailable",
            MerchStoreError::Timeout(_) => "timeout",
            MerchStoreError::Validation(_) => "validation_error",
            MerchStoreError::ItemNotFound(_) => "not_found",
            MerchStoreError::UserNotFound(_) => "not_found",
            MerchStoreError::RecipientNotFound(_) => "not_found",
            MerchStoreError::InsufficientFunds { .. } => "insufficient_funds",
            MerchStoreError::InvalidAmount(_) => "invalid_amount",
            MerchStoreError::SelfTransfer => "self_transfer",
            MerchStoreError::DuplicateUser(_) => "conflict",
            MerchStoreError::InvalidCredentials => "invalid_credentials",
            MerchStoreError::Unauthorized => "unauthorized",
            MerchStoreError::Token(_) => "unauthorized",
            MerchStoreError::LedgerInconsistency(_) => "ledger_inconsistency",
            MerchStoreError::Internal(_) => "internal_error",
        }
    }

    /// Business-rule and input rejections that leave the store untouched.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}
