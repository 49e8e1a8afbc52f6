//! Health monitor error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type HealthResult<T> = Result<T, HealthError>;
