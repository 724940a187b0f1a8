//! Failures raised by data sources.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a statistics data source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("survey not found: {survey_id}")]
    SurveyNotFound { survey_id: Uuid },

    #[error("malformed {what} payload: {message}")]
    Malformed { what: &'static str, message: String },

    #[error("data source unavailable: {message}")]
    Unavailable { message: String },
}

impl SourceError {
    pub fn malformed(what: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;
