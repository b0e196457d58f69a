use thiserror::Error;

/// Validation failures for inbound payloads.
///
/// A payload that fails validation is rejected before any shared state
/// is touched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("invalid '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid params: {0}")]
    InvalidParams(String),
}

impl ProtocolError {
    pub fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField { field, reason: reason.into() }
    }
}
