//! Publish fan-out.
//!
//! Routing is fire-and-forget: each recipient's push is placed on that
//! connection's bounded outbound queue without waiting, so one slow
//! subscriber never delays the publisher or anyone else. Queues are FIFO,
//! which keeps every publisher's events in publish order per recipient.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use share_protocol::{
    topics, AgentId, PublishParams, PushMessage, ShareEvent, CONFLICT_PRIORITY,
};
use share_state::{ClaimTable, SubscriptionIndex};

use crate::registry::ConnectionRegistry;
use crate::settings::DeliverySettings;

/// Returned to the publisher once an event has been routed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishReceipt {
    pub event_id: String,
    /// Connections that accepted the push.
    pub recipients: usize,
    /// Set when the event named an entity claimed by another agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_with: Option<AgentId>,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    notify_conflicts: bool,
}

impl Dispatcher {
    pub fn new(settings: &DeliverySettings) -> Self {
        Self {
            notify_conflicts: settings.notify_conflicts,
        }
    }

    /// Push `event` to every connection with a matching subscription and
    /// return how many accepted it. Expired events reach nobody.
    pub fn dispatch(
        &self,
        registry: &ConnectionRegistry,
        index: &SubscriptionIndex,
        event: &ShareEvent,
        now: DateTime<Utc>,
    ) -> usize {
        if event.is_expired_at(now) {
            tracing::debug!(event_id = %event.id, topic = %event.topic, "Dropping expired event");
            return 0;
        }

        let mut recipients: Vec<AgentId> = index.match_event(event).into_iter().collect();
        recipients.sort();

        let delivered = recipients
            .iter()
            .filter(|agent| registry.deliver(agent, PushMessage::new_event(event.clone())))
            .count();

        tracing::debug!(
            event_id = %event.id,
            topic = %event.topic,
            source = %event.source_agent_id,
            matched = recipients.len(),
            delivered,
            "Event dispatched"
        );
        delivered
    }

    /// Build the notice sent when `event` touches an entity claimed by
    /// someone other than its publisher. Both parties are targeted.
    pub fn conflict_notice(
        &self,
        claims: &ClaimTable,
        event: &ShareEvent,
        now: DateTime<Utc>,
    ) -> Option<ShareEvent> {
        if !self.notify_conflicts || event.source_agent_id.is_system() {
            return None;
        }
        let entity_id = event.entity_id.as_deref()?;
        let claim = claims.holder(entity_id)?;
        if claim.claimant_agent_id == event.source_agent_id {
            return None;
        }

        let holder = claim.claimant_agent_id;
        let mut params = PublishParams::new(topics::CONFLICT_DETECTED);
        params.event_type = "conflict".into();
        params.action = "entity_conflict".into();
        params.description = format!(
            "{} published '{}' on {} which is claimed by {}",
            event.source_agent_id, event.topic, entity_id, holder
        );
        params.entity_id = Some(entity_id.to_string());
        params.entity_type = event.entity_type.clone();
        params.target_agent_ids = vec![event.source_agent_id.clone(), holder.clone()];
        params.priority = CONFLICT_PRIORITY;
        params.data = json!({
            "original_owner": holder,
            "conflicting_agent": event.source_agent_id,
            "conflicting_event_id": event.id,
            "claimed_at": claim.claimed_at,
        });
        Some(params.into_event(AgentId::system(), now))
    }
}

/// A hub-authored presence event for `agent_id`.
pub fn presence_event(agent_id: &AgentId, name: &str, topic: &str, now: DateTime<Utc>) -> ShareEvent {
    let mut params = PublishParams::new(topic);
    params.event_type = "presence".into();
    params.action = topic.rsplit('.').next().unwrap_or(topic).to_string();
    params.description = format!("{name} {}", params.action);
    params.data = json!({ "agent_id": agent_id, "name": name });
    params.into_event(AgentId::system(), now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(source: &str, entity: Option<&str>) -> ShareEvent {
        let mut params = PublishParams::new("entity.modified");
        params.entity_id = entity.map(String::from);
        params.into_event(AgentId::from(source), Utc::now())
    }

    #[test]
    fn conflict_notice_targets_publisher_and_holder() {
        let claims = ClaimTable::new();
        claims.claim("customer-42", &AgentId::from("A")).unwrap();
        let dispatcher = Dispatcher::new(&DeliverySettings::default());

        let notice = dispatcher
            .conflict_notice(&claims, &event("B", Some("customer-42")), Utc::now())
            .unwrap();
        assert_eq!(notice.topic, topics::CONFLICT_DETECTED);
        assert!(notice.source_agent_id.is_system());
        assert_eq!(notice.priority, CONFLICT_PRIORITY);
        assert_eq!(
            notice.target_agent_ids,
            vec![AgentId::from("B"), AgentId::from("A")]
        );
        assert_eq!(notice.data["original_owner"], "A");
        assert_eq!(notice.data["conflicting_agent"], "B");
    }

    #[test]
    fn no_notice_for_holder_or_unclaimed_entities() {
        let claims = ClaimTable::new();
        claims.claim("customer-42", &AgentId::from("A")).unwrap();
        let dispatcher = Dispatcher::new(&DeliverySettings::default());
        let now = Utc::now();

        assert!(dispatcher.conflict_notice(&claims, &event("A", Some("customer-42")), now).is_none());
        assert!(dispatcher.conflict_notice(&claims, &event("B", Some("other")), now).is_none());
        assert!(dispatcher.conflict_notice(&claims, &event("B", None), now).is_none());
    }

    #[test]
    fn notices_can_be_disabled() {
        let claims = ClaimTable::new();
        claims.claim("e", &AgentId::from("A")).unwrap();
        let settings = DeliverySettings {
            notify_conflicts: false,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(&settings);
        assert!(dispatcher.conflict_notice(&claims, &event("B", Some("e")), Utc::now()).is_none());
    }

    #[test]
    fn presence_event_is_system_authored() {
        let e = presence_event(&AgentId::from("A"), "alpha", topics::AGENT_CONNECTED, Utc::now());
        assert!(e.source_agent_id.is_system());
        assert_eq!(e.action, "connected");
        assert_eq!(e.data["agent_id"], "A");
        assert_eq!(e.data["name"], "alpha");
    }
}
