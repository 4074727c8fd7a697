pub type AccessResult<T> = Result<T, AccessError>;

#[derive(thiserror::Error, Debug)]
pub enum AccessError {
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),
    #[error("not authorized: {0}")]
    NotAuthorized(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AccessError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_authenticated(message: impl Into<String>) -> Self {
        Self::NotAuthenticated(message.into())
    }

    pub fn not_authorized(message: impl Into<String>) -> Self {
        Self::NotAuthorized(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Short machine-readable tag for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AccessError::Precondition(_) => "precondition",
            AccessError::InvalidArgument(_) => "invalid_argument",
            AccessError::NotAuthenticated(_) => "not_authenticated",
            AccessError::NotAuthorized(_) => "not_authorized",
            AccessError::Configuration(_) => "configuration",
            AccessError::Database(_) => "database",
            AccessError::Migration(_) => "migration",
            AccessError::Internal(_) => "internal",
        }
    }
}

impl From<anyhow::Error> for AccessError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}
