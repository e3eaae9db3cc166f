/// Error Module
///
/// This module defines the error types shared by the sample programs.
/// Every statement call returns a `Result`, and callers branch on it with
/// `?` or `match` rather than checking status codes by hand.
use postgres::error::SqlState;
use thiserror::Error;

/// How a failed transactional step should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// A concurrent transaction touched overlapping rows; re-running the
    /// whole transaction may succeed.
    Conflict,
    /// Anything else. Retrying will not help.
    Fatal,
}

/// Error type for the sample programs.
///
/// This enum covers all error scenarios that can occur:
/// - Connection setup (TLS bootstrap, connecting)
/// - Statement execution, with the transfer-only conflict refinement
/// - Configuration loading and argument validation
#[derive(Error, Debug)]
pub enum YsqlError {
    /// The backend connection could not be established
    #[error("Connection to database failed: {0}")]
    Connection(String),

    /// TLS connector construction failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// OpenSSL rejected a certificate or connector setting
    #[error("TLS error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    /// A statement failed or returned an unexpected kind of result
    #[error("{context} failed: {message}")]
    Statement {
        context: String,
        code: Option<SqlState>,
        message: String,
    },

    /// A transfer step failed with a serialization failure
    #[error("{context} failed with a serialization conflict: {message}")]
    Conflict { context: String, message: String },

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parsing errors
    #[error("Configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A caller passed a value the operation cannot accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl YsqlError {
    /// Returns true for the retryable serialization-failure case.
    pub fn is_conflict(&self) -> bool {
        matches!(self, YsqlError::Conflict { .. })
    }

    /// Classifies this error for the transfer retry decision.
    pub fn failure_class(&self) -> FailureClass {
        if self.is_conflict() {
            FailureClass::Conflict
        } else {
            FailureClass::Fatal
        }
    }

    /// The SQL state reported by the server, if any.
    pub fn sql_state(&self) -> Option<SqlState> {
        match self {
            YsqlError::Statement { code, .. } => code.clone(),
            YsqlError::Conflict { .. } => Some(SqlState::T_R_SERIALIZATION_FAILURE),
            _ => None,
        }
    }
}

/// Type alias for Result to use YsqlError as the error type.
pub type Result<T> = std::result::Result<T, YsqlError>;
