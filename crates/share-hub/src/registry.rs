//! Live connection registry: at most one connection per agent.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;

use share_protocol::{AgentId, ConnectedAgent, ConnectionStatus, PushMessage};
use share_state::SubscriptionId;

/// Identifies one connection of an agent. A reconnect gets a new session,
/// so transports can tell whether they still own the registry entry.
pub type SessionId = u64;

/// What a transport holds after a successful connect.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub agent_id: AgentId,
    pub session_id: SessionId,
    /// Pushes addressed to this connection, in enqueue order. Closed when
    /// the connection is superseded, disconnected or evicted.
    pub outbound: mpsc::Receiver<PushMessage>,
}

/// Registry entry for one live connection.
#[derive(Debug)]
pub struct AgentConnection {
    pub agent_id: AgentId,
    pub name: String,
    pub session_id: SessionId,
    pub status: ConnectionStatus,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    /// Subscriptions created through this connection.
    pub subscriptions: HashSet<SubscriptionId>,
    pub events_sent: u64,
    pub events_received: u64,
    sender: mpsc::Sender<PushMessage>,
}

impl AgentConnection {
    /// Enqueue a push without waiting. Returns false if the queue is full
    /// or the transport has gone away.
    fn try_push(&mut self, message: PushMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    agent_id = %self.agent_id,
                    session_id = self.session_id,
                    "Outbound queue full, dropping push"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn summary(&self) -> ConnectedAgent {
        ConnectedAgent {
            agent_id: self.agent_id.clone(),
            name: self.name.clone(),
            status: self.status,
            connected_at: self.connected_at,
            last_heartbeat: self.last_heartbeat,
            subscriptions: self.subscriptions.len(),
            events_sent: self.events_sent,
            events_received: self.events_received,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<AgentId, AgentConnection>,
    next_session: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `agent_id`, replacing any existing one.
    ///
    /// Returns the new session id and the replaced connection, if any. The
    /// caller is responsible for cleaning up after the replaced entry.
    pub fn insert(
        &self,
        agent_id: &AgentId,
        name: Option<String>,
        sender: mpsc::Sender<PushMessage>,
        now: DateTime<Utc>,
    ) -> (SessionId, Option<AgentConnection>) {
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let connection = AgentConnection {
            agent_id: agent_id.clone(),
            name: name.unwrap_or_else(|| agent_id.to_string()),
            session_id,
            status: ConnectionStatus::Online,
            connected_at: now,
            last_heartbeat: now,
            subscriptions: HashSet::new(),
            events_sent: 0,
            events_received: 0,
            sender,
        };
        let replaced = self.connections.insert(agent_id.clone(), connection);
        (session_id, replaced)
    }

    /// Remove the entry for `agent_id`.
    ///
    /// Every removal runs `cascade` on the departing entry while its lock is
    /// still held, so no request for the same agent can interleave with the
    /// cleanup. The entry leaves marked offline.
    pub fn remove<T>(
        &self,
        agent_id: &AgentId,
        cascade: impl FnOnce(&AgentConnection) -> T,
    ) -> Option<(AgentConnection, T)> {
        self.remove_where(agent_id, |_| true, cascade)
    }

    /// Remove the entry only if it still belongs to `session_id`.
    pub fn remove_session<T>(
        &self,
        agent_id: &AgentId,
        session_id: SessionId,
        cascade: impl FnOnce(&AgentConnection) -> T,
    ) -> Option<(AgentConnection, T)> {
        self.remove_where(agent_id, |c| c.session_id == session_id, cascade)
    }

    /// Remove the entry if it has been silent for longer than `timeout`.
    pub fn remove_if_stale<T>(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
        timeout: Duration,
        cascade: impl FnOnce(&AgentConnection) -> T,
    ) -> Option<(AgentConnection, T)> {
        self.remove_where(agent_id, |c| now - c.last_heartbeat > timeout, cascade)
    }

    fn remove_where<T>(
        &self,
        agent_id: &AgentId,
        should_remove: impl FnOnce(&AgentConnection) -> bool,
        cascade: impl FnOnce(&AgentConnection) -> T,
    ) -> Option<(AgentConnection, T)> {
        let mut cascaded = None;
        let removed = self.connections.remove_if_mut(agent_id, |_, c| {
            if !should_remove(c) {
                return false;
            }
            c.status = ConnectionStatus::Offline;
            cascaded = Some(cascade(c));
            true
        });
        match (removed, cascaded) {
            (Some((_, connection)), Some(cascaded)) => Some((connection, cascaded)),
            _ => None,
        }
    }

    /// Agents whose last heartbeat is older than `timeout`.
    pub fn stale(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<AgentId> {
        self.connections
            .iter()
            .filter(|c| now - c.last_heartbeat > timeout)
            .map(|c| c.key().clone())
            .collect()
    }

    /// Refresh the liveness timestamp. Returns false if the agent is not connected.
    pub fn touch(&self, agent_id: &AgentId, now: DateTime<Utc>) -> bool {
        match self.connections.get_mut(agent_id) {
            Some(mut c) => {
                c.last_heartbeat = now.max(c.last_heartbeat);
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self, agent_id: &AgentId) -> bool {
        self.connections.contains_key(agent_id)
    }

    pub fn is_current_session(&self, agent_id: &AgentId, session_id: SessionId) -> bool {
        self.connections
            .get(agent_id)
            .is_some_and(|c| c.session_id == session_id)
    }

    /// Run `f` against the agent's entry while holding its lock, so the
    /// connection cannot be removed concurrently.
    pub fn with_connection<T>(
        &self,
        agent_id: &AgentId,
        f: impl FnOnce(&mut AgentConnection) -> T,
    ) -> Option<T> {
        self.connections.get_mut(agent_id).map(|mut c| f(c.value_mut()))
    }

    /// Enqueue a push for `agent_id`. Returns true if it was accepted.
    pub fn deliver(&self, agent_id: &AgentId, message: PushMessage) -> bool {
        let is_event = matches!(message, PushMessage::NewEvent { .. });
        match self.connections.get_mut(agent_id) {
            Some(mut c) => {
                let delivered = c.try_push(message);
                if delivered && is_event {
                    c.events_received += 1;
                }
                delivered
            }
            None => false,
        }
    }

    pub fn record_sent(&self, agent_id: &AgentId) {
        if let Some(mut c) = self.connections.get_mut(agent_id) {
            c.events_sent += 1;
        }
    }

    pub fn connected_ids(&self) -> BTreeSet<AgentId> {
        self.connections.iter().map(|c| c.key().clone()).collect()
    }

    /// Snapshot of every live connection, ordered by agent id.
    pub fn list(&self) -> Vec<ConnectedAgent> {
        let mut agents: Vec<ConnectedAgent> =
            self.connections.iter().map(|c| c.summary()).collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<ConnectedAgent> {
        self.connections.get(agent_id).map(|c| c.summary())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Hand a replaced or removed connection its final push. Dropping the entry
/// afterwards closes the outbound channel.
pub(crate) fn close_with(mut connection: AgentConnection, message: PushMessage) {
    connection.try_push(message);
}
