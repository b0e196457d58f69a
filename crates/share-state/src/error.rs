use share_protocol::{AgentId, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("task {0} is already completed")]
    AlreadyCompleted(String),

    #[error("rating {0} is outside [0.0, 1.0]")]
    InvalidRating(f64),

    #[error("task {0} has not completed yet")]
    TaskNotComplete(String),

    #[error("agent {agent_id} cannot rate its own task {task_id}")]
    SelfRating { task_id: String, agent_id: AgentId },

    #[error("agent {agent_id} does not hold the claim on '{entity_id}'")]
    NotClaimant {
        entity_id: String,
        agent_id: AgentId,
        holder: Option<AgentId>,
    },

    #[error(transparent)]
    Invalid(#[from] ProtocolError),
}
