/// Core Module
///
/// Shared infrastructure for the sample programs: database access and
/// error handling.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{FailureClass, Result, YsqlError};
