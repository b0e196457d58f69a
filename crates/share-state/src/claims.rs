//! Advisory exclusive claims over shared entities.
//!
//! Each entity id is either Free (absent from the table) or Claimed by
//! exactly one agent. Transitions happen inside the map's per-shard lock:
//! `claim` is a single check-and-set through the entry API and `release`
//! is a conditional remove, so concurrent callers on the same entity see a
//! single linearizable history while unrelated entities proceed in parallel.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use share_protocol::{AgentId, ClaimInfo, ProtocolError, MAX_IDENTIFIER_LEN};

use crate::StateError;

/// Result of a claim attempt. Contention is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The entity was Free and now belongs to the caller.
    Granted,
    /// The caller already held the entity; nothing changed.
    AlreadyHeld,
    /// Another agent holds the entity.
    Conflict { holder: AgentId },
}

impl ClaimOutcome {
    /// Whether the caller holds the entity after the attempt.
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Granted | Self::AlreadyHeld)
    }

    pub fn holder(&self) -> Option<&AgentId> {
        match self {
            Self::Conflict { holder } => Some(holder),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ClaimTable {
    claims: DashMap<String, ClaimInfo>,
}

impl ClaimTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, entity_id: &str, agent_id: &AgentId) -> Result<ClaimOutcome, StateError> {
        self.claim_at(entity_id, agent_id, Utc::now())
    }

    pub fn claim_at(
        &self,
        entity_id: &str,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StateError> {
        validate_entity_id(entity_id)?;

        let outcome = match self.claims.entry(entity_id.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get().claimant_agent_id == *agent_id {
                    ClaimOutcome::AlreadyHeld
                } else {
                    ClaimOutcome::Conflict {
                        holder: existing.get().claimant_agent_id.clone(),
                    }
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(ClaimInfo {
                    entity_id: entity_id.to_string(),
                    claimant_agent_id: agent_id.clone(),
                    claimed_at: now,
                });
                ClaimOutcome::Granted
            }
        };

        match &outcome {
            ClaimOutcome::Granted => {
                tracing::debug!(entity_id, agent_id = %agent_id, "Claim granted")
            }
            ClaimOutcome::Conflict { holder } => {
                tracing::debug!(entity_id, agent_id = %agent_id, holder = %holder, "Claim conflict")
            }
            ClaimOutcome::AlreadyHeld => {}
        }
        Ok(outcome)
    }

    /// Release a claim. Only the current claimant may release; any other
    /// caller gets `NotClaimant` and the table is left untouched.
    pub fn release(&self, entity_id: &str, agent_id: &AgentId) -> Result<ClaimInfo, StateError> {
        validate_entity_id(entity_id)?;

        match self
            .claims
            .remove_if(entity_id, |_, claim| claim.claimant_agent_id == *agent_id)
        {
            Some((_, claim)) => {
                tracing::debug!(entity_id, agent_id = %agent_id, "Claim released");
                Ok(claim)
            }
            None => Err(StateError::NotClaimant {
                entity_id: entity_id.to_string(),
                agent_id: agent_id.clone(),
                holder: self.holder(entity_id).map(|c| c.claimant_agent_id),
            }),
        }
    }

    /// Drop every claim held by `agent_id`, returning the freed entity ids.
    pub fn release_all(&self, agent_id: &AgentId) -> Vec<String> {
        let mut released = Vec::new();
        self.claims.retain(|entity_id, claim| {
            if claim.claimant_agent_id == *agent_id {
                released.push(entity_id.clone());
                false
            } else {
                true
            }
        });
        if !released.is_empty() {
            tracing::debug!(agent_id = %agent_id, count = released.len(), "Released all claims");
        }
        released
    }

    pub fn holder(&self, entity_id: &str) -> Option<ClaimInfo> {
        self.claims.get(entity_id).map(|c| c.value().clone())
    }

    pub fn held_by(&self, agent_id: &AgentId) -> Vec<ClaimInfo> {
        let mut held: Vec<ClaimInfo> = self
            .claims
            .iter()
            .filter(|c| c.claimant_agent_id == *agent_id)
            .map(|c| c.value().clone())
            .collect();
        held.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        held
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

fn validate_entity_id(entity_id: &str) -> Result<(), StateError> {
    if entity_id.trim().is_empty() {
        return Err(ProtocolError::field("entity_id", "must not be empty").into());
    }
    if entity_id.len() > MAX_IDENTIFIER_LEN {
        return Err(ProtocolError::field(
            "entity_id",
            format!("longer than {MAX_IDENTIFIER_LEN} bytes"),
        )
        .into());
    }
    Ok(())
}
