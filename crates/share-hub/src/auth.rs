use share_protocol::AgentId;

/// Seam to the external credential issuer.
///
/// The hub never inspects credentials itself; it asks a validator and
/// trusts the boolean it gets back.
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, agent_id: &AgentId, credential: &str) -> bool;
}

impl<F> CredentialValidator for F
where
    F: Fn(&AgentId, &str) -> bool + Send + Sync,
{
    fn validate(&self, agent_id: &AgentId, credential: &str) -> bool {
        self(agent_id, credential)
    }
}
