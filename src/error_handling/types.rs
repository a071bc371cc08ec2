use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    MissingSecret(String),
    BadAddress(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::MissingSecret(e) => write!(f, "Secret configuration error: {}", e),
            ConfigError::BadAddress(e) => write!(f, "Address error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed(sqlx::Error),
    QueryFailed(sqlx::Error),
    Corrupted(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(e) => write!(f, "Storage connection failed: {}", e),
            StorageError::QueryFailed(e) => write!(f, "Storage query failed: {}", e),
            StorageError::Corrupted(e) => write!(f, "Stored data is corrupted: {}", e),
        }
    }
}

impl StorageError {
    /// True when the query hit a UNIQUE constraint, so callers can turn a
    /// duplicate insert into a field-level validation error instead of a 500.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StorageError::QueryFailed(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum AuthError {
    InvalidCredentials,
    MalformedToken,
    TokenExpired,
    TokenRevoked,
    WrongTokenKind,
    InvalidIdToken(String),
    VerificationUnavailable(String),
    StorageError(StorageError),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "Invalid credentials"),
            AuthError::MalformedToken => write!(f, "Malformed token"),
            AuthError::TokenExpired => write!(f, "Token expired"),
            AuthError::TokenRevoked => write!(f, "Token has been revoked"),
            AuthError::WrongTokenKind => write!(f, "Wrong token kind for this operation"),
            AuthError::InvalidIdToken(e) => write!(f, "Invalid identity token: {}", e),
            AuthError::VerificationUnavailable(e) => {
                write!(f, "Identity verification unavailable: {}", e)
            }
            AuthError::StorageError(e) => write!(f, "Auth storage error: {}", e),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::StorageError(err)
    }
}

#[derive(Debug)]
pub enum InferenceError {
    Unreachable(String),
    Timeout,
    ModelMissing(String),
    BadStatus(u16),
    MalformedResponse(String),
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::Unreachable(e) => write!(f, "Inference server unreachable: {}", e),
            InferenceError::Timeout => write!(f, "Inference request timed out"),
            InferenceError::ModelMissing(m) => write!(f, "Model '{}' is not available", m),
            InferenceError::BadStatus(s) => write!(f, "Inference server returned status {}", s),
            InferenceError::MalformedResponse(e) => {
                write!(f, "Malformed inference response: {}", e)
            }
        }
    }
}

impl std::error::Error for InferenceError {}

/// Error surfaced to HTTP clients. Carries enough to pick a status code and a
/// JSON body; storage failures collapse to `Internal` so schema details never
/// leak into responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 with a field-level message, rendered as `{"errors": {field: message}}`
    Validation { field: &'static str, message: String },
    /// 400 with a `detail` message
    BadRequest(String),
    /// 401
    Unauthorized(String),
    /// 404
    NotFound(String),
    /// 503, inference dependency down or model missing
    Upstream(String),
    /// 500, opaque
    Internal,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Validation { field, message } => write!(f, "{}: {}", field, message),
            ApiError::BadRequest(e) => write!(f, "Bad request: {}", e),
            ApiError::Unauthorized(e) => write!(f, "Unauthorized: {}", e),
            ApiError::NotFound(e) => write!(f, "Not found: {}", e),
            ApiError::Upstream(e) => write!(f, "Upstream dependency failed: {}", e),
            ApiError::Internal => write!(f, "Internal server error"),
        }
    }
}

impl std::error::Error for ApiError {}

impl warp::reject::Reject for ApiError {}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        log::error!("storage error: {}", err);
        ApiError::Internal
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => {
                ApiError::Unauthorized("Invalid credentials".to_string())
            }
            AuthError::MalformedToken | AuthError::WrongTokenKind => {
                ApiError::Unauthorized("Token is invalid".to_string())
            }
            AuthError::TokenExpired => ApiError::Unauthorized("Token has expired".to_string()),
            AuthError::TokenRevoked => ApiError::Unauthorized("Token has been revoked".to_string()),
            AuthError::InvalidIdToken(e) => ApiError::BadRequest(e),
            AuthError::VerificationUnavailable(_) => {
                ApiError::Unauthorized("Authentication failed".to_string())
            }
            AuthError::StorageError(e) => e.into(),
        }
    }
}

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}
