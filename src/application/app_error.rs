use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Too many requests. Please slow down.")]
    RateLimited,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found")]
    NotFound,

    #[error("No local user matches the event: {0}")]
    UserNotResolvable(String),

    #[error("Unknown catalog code: {0}")]
    UnknownCatalogCode(String),

    #[error("Billing provider request failed: {0}")]
    ProviderApi(String),

    #[error("Billing provider rejected our credentials")]
    ProviderAuth,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether a webhook delivery that hit this error should be redelivered
    /// by the provider. Expected conditions (unknown user, unknown code,
    /// malformed input) are acknowledged instead, to avoid retry storms.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(_) => true,
            AppError::Internal(_) => true,
            AppError::ProviderApi(_) => true,
            AppError::ProviderAuth => true,
            AppError::RateLimited => true,

            AppError::NotFound => false,
            AppError::InvalidInput(_) => false,
            AppError::InvalidCredentials => false,
            AppError::UserNotResolvable(_) => false,
            AppError::UnknownCatalogCode(_) => false,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound,
            other => AppError::Database(other.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ErrorCode {
    DatabaseError,
    InvalidCredentials,
    RateLimited,
    InvalidInput,
    NotFound,
    UserNotResolvable,
    UnknownCatalogCode,
    ProviderError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::UserNotResolvable => "USER_NOT_RESOLVABLE",
            ErrorCode::UnknownCatalogCode => "UNKNOWN_CATALOG_CODE",
            ErrorCode::ProviderError => "PROVIDER_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
