use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{MAX_DESCRIPTION_LEN, MAX_IDENTIFIER_LEN, TOPIC_WILDCARD};
use crate::error::ProtocolError;
use crate::identity::AgentId;

/// A piece of live context relayed from one agent to its subscribers.
///
/// Only `topic`, `entity_id`, `entity_type`, `source_agent_id`, `priority`
/// and `target_agent_ids` take part in routing. `data` is carried opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareEvent {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    pub source_agent_id: AgentId,
    /// Explicit audience. Empty means "every matching subscriber".
    #[serde(default)]
    pub target_agent_ids: Vec<AgentId>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub priority: i32,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ShareEvent {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub fn is_targeted(&self) -> bool {
        !self.target_agent_ids.is_empty()
    }
}

/// Publish request payload as sent by an agent.
///
/// The hub stamps `id`, `source_agent_id` and `published_at` when turning
/// it into a [`ShareEvent`], so a publisher cannot impersonate another agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishParams {
    pub topic: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub target_agent_ids: Vec<AgentId>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PublishParams {
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into(), ..Default::default() }
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        check_identifier("topic", &self.topic)?;
        if self.topic == TOPIC_WILDCARD {
            return Err(ProtocolError::field("topic", "wildcard is only valid in subscriptions"));
        }
        if let Some(entity_id) = &self.entity_id {
            check_identifier("entity_id", entity_id)?;
        }
        if let Some(entity_type) = &self.entity_type {
            check_identifier("entity_type", entity_type)?;
        }
        for target in &self.target_agent_ids {
            check_identifier("target_agent_ids", target.as_str())?;
        }
        if self.description.len() > MAX_DESCRIPTION_LEN {
            return Err(ProtocolError::field(
                "description",
                format!("longer than {MAX_DESCRIPTION_LEN} bytes"),
            ));
        }
        if !(self.data.is_object() || self.data.is_null()) {
            return Err(ProtocolError::field("data", "must be a JSON object"));
        }
        Ok(())
    }

    /// Stamp the payload into a routable event. Call [`validate`](Self::validate) first.
    pub fn into_event(self, source: AgentId, now: DateTime<Utc>) -> ShareEvent {
        let data = match self.data {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        ShareEvent {
            id: Uuid::new_v4().to_string(),
            topic: self.topic,
            event_type: self.event_type,
            action: self.action,
            description: self.description,
            entity_id: self.entity_id,
            entity_type: self.entity_type,
            source_agent_id: source,
            target_agent_ids: self.target_agent_ids,
            data,
            priority: self.priority,
            published_at: now,
            expires_at: self.expires_at,
        }
    }
}

/// What a subscription wants to see. Every empty set means "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    #[serde(default)]
    pub topics: HashSet<String>,
    #[serde(default)]
    pub entity_ids: HashSet<String>,
    #[serde(default)]
    pub entity_types: HashSet<String>,
    #[serde(default)]
    pub source_agent_ids: HashSet<AgentId>,
    #[serde(default)]
    pub min_priority: i32,
}

impl SubscriptionFilter {
    /// A filter that receives every event.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_entities<I, S>(mut self, entity_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity_ids = entity_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AgentId>,
    {
        self.source_agent_ids = sources.into_iter().map(Into::into).collect();
        self
    }

    /// True when the topic constraint is absent (empty set or `"*"`).
    pub fn matches_all_topics(&self) -> bool {
        self.topics.is_empty() || self.topics.contains(TOPIC_WILDCARD)
    }

    /// Filter match, ignoring explicit targeting (the index applies that).
    pub fn matches(&self, event: &ShareEvent) -> bool {
        if event.priority < self.min_priority {
            return false;
        }
        if !self.matches_all_topics() && !self.topics.contains(&event.topic) {
            return false;
        }
        if !self.entity_ids.is_empty()
            && !event.entity_id.as_ref().is_some_and(|e| self.entity_ids.contains(e))
        {
            return false;
        }
        if !self.entity_types.is_empty()
            && !event.entity_type.as_ref().is_some_and(|t| self.entity_types.contains(t))
        {
            return false;
        }
        if !self.source_agent_ids.is_empty() && !self.source_agent_ids.contains(&event.source_agent_id) {
            return false;
        }
        true
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        for topic in &self.topics {
            check_identifier("topics", topic)?;
        }
        for entity_id in &self.entity_ids {
            check_identifier("entity_ids", entity_id)?;
        }
        for entity_type in &self.entity_types {
            check_identifier("entity_types", entity_type)?;
        }
        for source in &self.source_agent_ids {
            check_identifier("source_agent_ids", source.as_str())?;
        }
        Ok(())
    }
}

/// Non-blank and at most `MAX_IDENTIFIER_LEN` bytes.
pub fn check_identifier(field: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        return Err(ProtocolError::field(field, "must not be empty"));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(ProtocolError::field(
            field,
            format!("longer than {MAX_IDENTIFIER_LEN} bytes"),
        ));
    }
    Ok(())
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Success,
    Failure,
    Timeout,
    Partial,
}

impl TaskOutcome {
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, Self::Failure | Self::Timeout)
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::Partial => "partial",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskOutcome {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "timeout" => Ok(Self::Timeout),
            "partial" => Ok(Self::Partial),
            other => Err(ProtocolError::field("outcome", format!("unknown outcome '{other}'"))),
        }
    }
}

/// Liveness of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Online,
    Offline,
}

/// Discovery view of a connected agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedAgent {
    pub agent_id: AgentId,
    pub name: String,
    pub status: ConnectionStatus,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub subscriptions: usize,
    pub events_sent: u64,
    pub events_received: u64,
}

/// An advisory exclusive claim on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimInfo {
    pub entity_id: String,
    pub claimant_agent_id: AgentId,
    pub claimed_at: DateTime<Utc>,
}

/// One row of the trust leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub agent_id: AgentId,
    pub trust_score: f64,
    pub total_tasks: usize,
    pub success_rate: f64,
}

/// Aggregate task statistics for an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent_id: AgentId,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub success_rate: f64,
    pub avg_duration_ms: Option<f64>,
    pub avg_rating: Option<f64>,
    pub trust_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(topic: &str) -> ShareEvent {
        PublishParams::new(topic).into_event(AgentId::from("src"), Utc::now())
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = SubscriptionFilter::all();
        assert!(filter.matches(&event("anything")));
        assert!(filter.matches(&event("task.assigned")));
    }

    #[test]
    fn topic_filter_is_exact() {
        let filter = SubscriptionFilter::topics(["t1"]);
        assert!(filter.matches(&event("t1")));
        assert!(!filter.matches(&event("t2")));
        assert!(!filter.matches(&event("t1.sub")));
    }

    #[test]
    fn wildcard_topic_matches_everything() {
        let filter = SubscriptionFilter::topics(["*"]);
        assert!(filter.matches(&event("whatever")));
    }

    #[test]
    fn entity_filter_requires_entity() {
        let filter = SubscriptionFilter::all().with_entities(["customer-42"]);
        assert!(!filter.matches(&event("t")));

        let mut params = PublishParams::new("t");
        params.entity_id = Some("customer-42".into());
        let ev = params.into_event(AgentId::from("src"), Utc::now());
        assert!(filter.matches(&ev));
    }

    #[test]
    fn source_and_priority_filters() {
        let mut filter = SubscriptionFilter::all().with_sources(["alice"]);
        filter.min_priority = 5;

        let mut params = PublishParams::new("t");
        params.priority = 5;
        let from_alice = params.clone().into_event(AgentId::from("alice"), Utc::now());
        let from_bob = params.into_event(AgentId::from("bob"), Utc::now());
        assert!(filter.matches(&from_alice));
        assert!(!filter.matches(&from_bob));

        let low = PublishParams::new("t").into_event(AgentId::from("alice"), Utc::now());
        assert!(!filter.matches(&low));
    }

    #[test]
    fn publish_validation_rejects_bad_payloads() {
        assert!(PublishParams::new("").validate().is_err());
        assert!(PublishParams::new("*").validate().is_err());

        let mut params = PublishParams::new("t");
        params.data = serde_json::json!([1, 2, 3]);
        assert!(params.validate().is_err());

        let mut params = PublishParams::new("t");
        params.entity_id = Some("  ".into());
        assert!(params.validate().is_err());

        let mut params = PublishParams::new("t");
        params.data = serde_json::json!({"k": "v"});
        assert!(params.validate().is_ok());
    }

    #[test]
    fn filter_validation_rejects_blank_entries() {
        let filter = SubscriptionFilter::topics([""]);
        assert!(filter.validate().is_err());
        assert!(SubscriptionFilter::topics(["ok"]).validate().is_ok());
    }

    #[test]
    fn outcome_parses_case_insensitively() {
        assert_eq!("SUCCESS".parse::<TaskOutcome>().unwrap(), TaskOutcome::Success);
        assert_eq!("timeout".parse::<TaskOutcome>().unwrap(), TaskOutcome::Timeout);
        assert!("pending".parse::<TaskOutcome>().is_err());
    }

    #[test]
    fn expiry_is_checked_against_now() {
        let now = Utc::now();
        let mut params = PublishParams::new("t");
        params.expires_at = Some(now - chrono::Duration::seconds(1));
        let ev = params.into_event(AgentId::from("src"), now);
        assert!(ev.is_expired_at(now));
    }
}
