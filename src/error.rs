use thiserror::Error;

/// Recoverable conditions inside the fusion core.
///
/// Callers log these and continue with the next line, entity, or record;
/// only configuration-level failures (missing files, unwritable output)
/// abort a run, and those travel as `anyhow::Error` at the command layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FuseError {
    #[error("malformed run line: {reason}")]
    MalformedLine { reason: String },

    #[error("invalid numeric field: {value:?}")]
    NumberFormat { value: String },

    #[error("no ranking entry for {key:?}")]
    NotFound { key: String },

    #[error("feature vector has {found} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("entity {entity:?} absent from entity ranking for query {query:?}")]
    MissingUpstreamScore { query: String, entity: String },
}

impl FuseError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedLine {
            reason: reason.into(),
        }
    }

    pub fn number(value: impl Into<String>) -> Self {
        Self::NumberFormat {
            value: value.into(),
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }
}

pub type FuseResult<T> = Result<T, FuseError>;
