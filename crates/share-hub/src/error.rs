use share_protocol::{
    AgentId, ProtocolError, ERR_AUTH_REJECTED, ERR_INVALID_PARAMS, ERR_REPUTATION,
    ERR_UNKNOWN_AGENT,
};
use share_state::StateError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HubError {
    #[error("agent {0} is not connected")]
    UnknownAgent(AgentId),

    #[error("credential rejected for agent {0}")]
    AuthRejected(AgentId),

    #[error(transparent)]
    Validation(#[from] ProtocolError),

    #[error(transparent)]
    State(StateError),
}

impl From<StateError> for HubError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Invalid(e) => Self::Validation(e),
            other => Self::State(other),
        }
    }
}

impl HubError {
    /// JSON-RPC error code reported to the caller.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::UnknownAgent(_) => ERR_UNKNOWN_AGENT,
            Self::AuthRejected(_) => ERR_AUTH_REJECTED,
            Self::Validation(_) => ERR_INVALID_PARAMS,
            Self::State(_) => ERR_REPUTATION,
        }
    }
}
