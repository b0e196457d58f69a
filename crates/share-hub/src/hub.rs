//! The hub service object.
//!
//! Lock order is always registry entry first, then subscription index or
//! claim table. Nothing in the index or the claim table calls back into the
//! registry, so holding an agent's registry entry while mutating them is
//! what makes subscribe/claim atomic with respect to disconnect.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;

use share_protocol::{
    topics, AgentId, AgentStats, ClaimInfo, ConnectedAgent, ConnectedPayload, LeaderboardEntry,
    ProtocolError, PublishParams, PushMessage, SubscriptionFilter, TaskOutcome,
    MAX_IDENTIFIER_LEN,
};
use share_state::{
    ClaimOutcome, ClaimTable, ReputationEngine, SubscriptionId, SubscriptionIndex,
};

use crate::auth::CredentialValidator;
use crate::dispatcher::{presence_event, Dispatcher, PublishReceipt};
use crate::error::HubError;
use crate::registry::{close_with, AgentConnection, ConnectionHandle, ConnectionRegistry, SessionId};
use crate::settings::HubSettings;

pub struct Hub {
    settings: HubSettings,
    registry: ConnectionRegistry,
    subscriptions: SubscriptionIndex,
    claims: ClaimTable,
    reputation: ReputationEngine,
    dispatcher: Dispatcher,
}

impl Hub {
    pub fn new(settings: HubSettings) -> Self {
        let dispatcher = Dispatcher::new(&settings.delivery);
        let reputation = ReputationEngine::new(settings.reputation.clone());
        Self {
            settings,
            registry: ConnectionRegistry::new(),
            subscriptions: SubscriptionIndex::new(),
            claims: ClaimTable::new(),
            reputation,
            dispatcher,
        }
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    pub fn reputation(&self) -> &ReputationEngine {
        &self.reputation
    }

    // ── Connections ──

    /// Check the credential with `validator`, then connect.
    pub fn authenticate(
        &self,
        validator: &dyn CredentialValidator,
        agent_id: &AgentId,
        credential: &str,
        name: Option<String>,
    ) -> Result<ConnectionHandle, HubError> {
        validate_agent_id(agent_id)?;
        if !validator.validate(agent_id, credential) {
            tracing::warn!(agent_id = %agent_id, "Credential rejected");
            return Err(HubError::AuthRejected(agent_id.clone()));
        }
        self.connect(agent_id, name)
    }

    /// Register a connection for an already-authenticated agent.
    ///
    /// A previous connection for the same agent is superseded: it receives
    /// a `superseded` push, its channel is closed and the subscriptions
    /// created through it are removed. Its claims stay with the agent.
    pub fn connect(
        &self,
        agent_id: &AgentId,
        name: Option<String>,
    ) -> Result<ConnectionHandle, HubError> {
        validate_agent_id(agent_id)?;

        let display_name = name.clone().unwrap_or_else(|| agent_id.to_string());
        let (sender, outbound) = mpsc::channel(self.settings.delivery.outbound_queue_capacity);
        let (session_id, replaced) = self.registry.insert(agent_id, name, sender, Utc::now());

        match replaced {
            Some(old) => {
                tracing::info!(
                    agent_id = %agent_id,
                    old_session = old.session_id,
                    new_session = session_id,
                    "Connection superseded"
                );
                self.drop_subscriptions(&old);
                close_with(old, PushMessage::superseded());
            }
            None => {
                tracing::info!(agent_id = %agent_id, session_id, "Agent connected");
                if self.settings.delivery.announce_presence {
                    self.announce(agent_id, &display_name, topics::AGENT_CONNECTED);
                }
            }
        }

        let payload = ConnectedPayload {
            agent_id: agent_id.clone(),
            session_id,
            connected_agents: self.registry.list(),
        };
        self.registry.deliver(agent_id, PushMessage::connected(payload));

        Ok(ConnectionHandle {
            agent_id: agent_id.clone(),
            session_id,
            outbound,
        })
    }

    /// Explicit disconnect: removes the connection, its subscriptions and
    /// every claim the agent holds.
    pub fn disconnect(&self, agent_id: &AgentId) -> Result<(), HubError> {
        let (connection, released) = self
            .registry
            .remove(agent_id, |c| self.release_held(c))
            .ok_or_else(|| HubError::UnknownAgent(agent_id.clone()))?;
        self.finish_cleanup(connection, released, "disconnect");
        Ok(())
    }

    /// Transport-side close. A no-op if the session was already replaced
    /// or removed. Returns whether anything was cleaned up.
    pub fn disconnect_session(&self, agent_id: &AgentId, session_id: SessionId) -> bool {
        match self
            .registry
            .remove_session(agent_id, session_id, |c| self.release_held(c))
        {
            Some((connection, released)) => {
                self.finish_cleanup(connection, released, "transport closed");
                true
            }
            None => false,
        }
    }

    pub fn heartbeat(&self, agent_id: &AgentId) -> Result<(), HubError> {
        if self.registry.touch(agent_id, Utc::now()) {
            Ok(())
        } else {
            Err(HubError::UnknownAgent(agent_id.clone()))
        }
    }

    /// Any inbound traffic counts as liveness.
    pub fn touch(&self, agent_id: &AgentId) -> bool {
        self.registry.touch(agent_id, Utc::now())
    }

    pub fn is_connected(&self, agent_id: &AgentId) -> bool {
        self.registry.is_connected(agent_id)
    }

    pub fn is_current_session(&self, agent_id: &AgentId, session_id: SessionId) -> bool {
        self.registry.is_current_session(agent_id, session_id)
    }

    pub fn list_connected(&self) -> BTreeSet<AgentId> {
        self.registry.connected_ids()
    }

    pub fn connected_agents(&self) -> Vec<ConnectedAgent> {
        self.registry.list()
    }

    /// Evict every connection silent for longer than the heartbeat timeout,
    /// with the same cleanup as an explicit disconnect.
    pub fn sweep_stale(&self) -> Vec<AgentId> {
        self.sweep_stale_at(Utc::now())
    }

    pub fn sweep_stale_at(&self, now: DateTime<Utc>) -> Vec<AgentId> {
        let timeout = self.heartbeat_timeout();
        let mut evicted = Vec::new();
        for agent_id in self.registry.stale(now, timeout) {
            // Re-checked under the entry lock; a heartbeat may have landed since.
            let removed = self
                .registry
                .remove_if_stale(&agent_id, now, timeout, |c| self.release_held(c));
            if let Some((connection, released)) = removed {
                tracing::warn!(
                    agent_id = %agent_id,
                    last_heartbeat = %connection.last_heartbeat,
                    "Evicting silent connection"
                );
                self.finish_cleanup(connection, released, "heartbeat timeout");
                evicted.push(agent_id);
            }
        }
        evicted
    }

    // ── Subscriptions ──

    pub fn subscribe(
        &self,
        agent_id: &AgentId,
        filter: SubscriptionFilter,
    ) -> Result<SubscriptionId, HubError> {
        self.registry
            .with_connection(agent_id, |connection| -> Result<SubscriptionId, HubError> {
                let id = self.subscriptions.subscribe(agent_id, filter)?;
                connection.subscriptions.insert(id.clone());
                Ok(id)
            })
            .unwrap_or_else(|| Err(HubError::UnknownAgent(agent_id.clone())))
    }

    /// Remove one of the caller's own subscriptions. Unknown ids and ids
    /// owned by other agents return false and change nothing.
    pub fn unsubscribe(&self, agent_id: &AgentId, subscription_id: &str) -> Result<bool, HubError> {
        self.registry
            .with_connection(agent_id, |connection| {
                let owned = self
                    .subscriptions
                    .get(subscription_id)
                    .is_some_and(|s| s.agent_id == *agent_id);
                if !owned {
                    return false;
                }
                self.subscriptions.unsubscribe(subscription_id);
                connection.subscriptions.remove(subscription_id);
                true
            })
            .ok_or_else(|| HubError::UnknownAgent(agent_id.clone()))
    }

    // ── Publishing ──

    /// Validate, stamp and route an event from `source`.
    ///
    /// Validation happens before anything is stamped or routed, so a
    /// rejected publish leaves no trace.
    pub fn publish(&self, source: &AgentId, params: PublishParams) -> Result<PublishReceipt, HubError> {
        if !self.registry.is_connected(source) {
            return Err(HubError::UnknownAgent(source.clone()));
        }
        params.validate()?;

        let now = Utc::now();
        let event = params.into_event(source.clone(), now);
        self.registry.record_sent(source);

        let mut conflict_with = None;
        if !event.is_expired_at(now) {
            if let Some(notice) = self.dispatcher.conflict_notice(&self.claims, &event, now) {
                conflict_with = notice.target_agent_ids.last().cloned();
                tracing::info!(
                    entity_id = ?event.entity_id,
                    publisher = %source,
                    holder = ?conflict_with,
                    "Publish on claimed entity"
                );
                self.dispatcher
                    .dispatch(&self.registry, &self.subscriptions, &notice, now);
            }
        }

        let recipients = self
            .dispatcher
            .dispatch(&self.registry, &self.subscriptions, &event, now);

        Ok(PublishReceipt {
            event_id: event.id,
            recipients,
            conflict_with,
        })
    }

    // ── Claims ──

    pub fn claim(&self, agent_id: &AgentId, entity_id: &str) -> Result<ClaimOutcome, HubError> {
        self.registry
            .with_connection(agent_id, |_| self.claims.claim(entity_id, agent_id))
            .ok_or_else(|| HubError::UnknownAgent(agent_id.clone()))?
            .map_err(HubError::from)
    }

    pub fn release(&self, agent_id: &AgentId, entity_id: &str) -> Result<ClaimInfo, HubError> {
        self.registry
            .with_connection(agent_id, |_| self.claims.release(entity_id, agent_id))
            .ok_or_else(|| HubError::UnknownAgent(agent_id.clone()))?
            .map_err(HubError::from)
    }

    pub fn get_claim(&self, entity_id: &str) -> Option<ClaimInfo> {
        self.claims.holder(entity_id)
    }

    pub fn claims_held_by(&self, agent_id: &AgentId) -> Vec<ClaimInfo> {
        self.claims.held_by(agent_id)
    }

    // ── Reputation ──

    pub fn start_task(&self, agent_id: &AgentId, task_type: &str) -> Result<String, HubError> {
        Ok(self.reputation.start_task(agent_id, task_type)?)
    }

    pub fn complete_task(&self, task_id: &str, outcome: TaskOutcome) -> Result<(), HubError> {
        Ok(self.reputation.complete_task(task_id, outcome)?)
    }

    pub fn rate_task(&self, task_id: &str, rater: &AgentId, rating: f64) -> Result<(), HubError> {
        Ok(self.reputation.rate_task(task_id, rater, rating)?)
    }

    pub fn trust_score(&self, agent_id: &AgentId) -> f64 {
        self.reputation.trust_score(agent_id)
    }

    pub fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        self.reputation.leaderboard(limit)
    }

    pub fn agent_stats(&self, agent_id: &AgentId) -> AgentStats {
        self.reputation.agent_stats(agent_id)
    }

    // ── Internals ──

    fn heartbeat_timeout(&self) -> Duration {
        let secs = self.settings.liveness.heartbeat_timeout_secs.min(u32::MAX as u64);
        Duration::seconds(secs as i64)
    }

    fn drop_subscriptions(&self, connection: &AgentConnection) {
        for id in &connection.subscriptions {
            self.subscriptions.unsubscribe(id);
        }
    }

    /// Cascade run under the departing entry's registry lock: a reconnect
    /// of the same agent cannot claim anything until this has finished.
    fn release_held(&self, connection: &AgentConnection) -> Vec<String> {
        self.drop_subscriptions(connection);
        self.claims.release_all(&connection.agent_id)
    }

    /// Log and announce a departure. Dropping the entry closes its outbound
    /// channel.
    fn finish_cleanup(&self, connection: AgentConnection, released: Vec<String>, reason: &str) {
        let agent_id = connection.agent_id.clone();
        let name = connection.name.clone();
        tracing::info!(
            agent_id = %agent_id,
            session_id = connection.session_id,
            subscriptions = connection.subscriptions.len(),
            claims_released = released.len(),
            reason,
            "Agent disconnected"
        );
        drop(connection);

        if self.settings.delivery.announce_presence {
            self.announce(&agent_id, &name, topics::AGENT_DISCONNECTED);
        }
    }

    fn announce(&self, agent_id: &AgentId, name: &str, topic: &str) {
        let now = Utc::now();
        let event = presence_event(agent_id, name, topic, now);
        self.dispatcher
            .dispatch(&self.registry, &self.subscriptions, &event, now);
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("connections", &self.registry.len())
            .field("subscriptions", &self.subscriptions.len())
            .field("claims", &self.claims.len())
            .finish()
    }
}

fn validate_agent_id(agent_id: &AgentId) -> Result<(), ProtocolError> {
    if agent_id.as_str().trim().is_empty() {
        return Err(ProtocolError::field("agent_id", "must not be empty"));
    }
    if agent_id.as_str().len() > MAX_IDENTIFIER_LEN {
        return Err(ProtocolError::field(
            "agent_id",
            format!("longer than {MAX_IDENTIFIER_LEN} bytes"),
        ));
    }
    if agent_id.is_system() {
        return Err(ProtocolError::field("agent_id", "reserved for hub-generated events"));
    }
    Ok(())
}
