//! Subscription index: filter sets keyed by id, plus a topic index so a
//! publish only inspects subscriptions that could possibly match.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use share_protocol::{AgentId, ShareEvent, SubscriptionFilter};

use crate::StateError;

pub type SubscriptionId = String;

/// A stored filter owned by one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub agent_id: AgentId,
    pub filter: SubscriptionFilter,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    subscriptions: DashMap<SubscriptionId, Subscription>,
    /// topic -> ids of subscriptions naming that topic.
    by_topic: DashMap<String, HashSet<SubscriptionId>>,
    /// Subscriptions with no topic constraint.
    any_topic: DashSet<SubscriptionId>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new filter set for `agent_id`. Invalid filters are rejected
    /// before anything is inserted.
    pub fn subscribe(
        &self,
        agent_id: &AgentId,
        filter: SubscriptionFilter,
    ) -> Result<SubscriptionId, StateError> {
        filter.validate()?;

        let id = Uuid::new_v4().to_string();
        let subscription = Subscription {
            id: id.clone(),
            agent_id: agent_id.clone(),
            filter,
            created_at: Utc::now(),
        };

        if subscription.filter.matches_all_topics() {
            self.any_topic.insert(id.clone());
        } else {
            for topic in &subscription.filter.topics {
                self.by_topic
                    .entry(topic.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }
        self.subscriptions.insert(id.clone(), subscription);

        tracing::debug!(agent_id = %agent_id, subscription_id = %id, "Subscription added");
        Ok(id)
    }

    /// Remove a subscription by id, returning it if it existed.
    pub fn unsubscribe(&self, subscription_id: &str) -> Option<Subscription> {
        let (_, subscription) = self.subscriptions.remove(subscription_id)?;

        if subscription.filter.matches_all_topics() {
            self.any_topic.remove(subscription_id);
        } else {
            for topic in &subscription.filter.topics {
                self.by_topic.remove_if_mut(topic, |_, ids| {
                    ids.remove(subscription_id);
                    ids.is_empty()
                });
            }
        }
        Some(subscription)
    }

    pub fn get(&self, subscription_id: &str) -> Option<Subscription> {
        self.subscriptions.get(subscription_id).map(|s| s.value().clone())
    }

    /// Every agent with at least one subscription matching `event`.
    ///
    /// When the event names explicit targets the result is narrowed to
    /// those targets; targeting never adds agents without a matching
    /// subscription.
    pub fn match_event(&self, event: &ShareEvent) -> HashSet<AgentId> {
        let mut candidates: Vec<SubscriptionId> =
            self.any_topic.iter().map(|id| id.key().clone()).collect();
        if let Some(ids) = self.by_topic.get(&event.topic) {
            candidates.extend(ids.iter().cloned());
        }

        let targets: Option<HashSet<&AgentId>> = event
            .is_targeted()
            .then(|| event.target_agent_ids.iter().collect());

        let mut recipients = HashSet::new();
        for id in candidates {
            let Some(subscription) = self.subscriptions.get(&id) else {
                continue;
            };
            if recipients.contains(&subscription.agent_id) {
                continue;
            }
            if let Some(targets) = &targets {
                if !targets.contains(&subscription.agent_id) {
                    continue;
                }
            }
            if subscription.filter.matches(event) {
                recipients.insert(subscription.agent_id.clone());
            }
        }
        recipients
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use share_protocol::PublishParams;

    fn event_from(source: &str, topic: &str) -> ShareEvent {
        PublishParams::new(topic).into_event(AgentId::from(source), Utc::now())
    }

    #[test]
    fn topic_subscription_only_sees_its_topic() {
        let index = SubscriptionIndex::new();
        let w = AgentId::from("W");
        index.subscribe(&w, SubscriptionFilter::topics(["task.assigned"])).unwrap();

        assert!(index.match_event(&event_from("R", "research.done")).is_empty());
        assert!(index.match_event(&event_from("R", "task.assigned")).contains(&w));
    }

    #[test]
    fn multiple_subscriptions_yield_one_recipient() {
        let index = SubscriptionIndex::new();
        let a = AgentId::from("A");
        index.subscribe(&a, SubscriptionFilter::all()).unwrap();
        index.subscribe(&a, SubscriptionFilter::topics(["t"])).unwrap();

        let recipients = index.match_event(&event_from("X", "t"));
        assert_eq!(recipients.len(), 1);
    }

    #[test]
    fn targeting_narrows_but_never_widens() {
        let index = SubscriptionIndex::new();
        let (a, b) = (AgentId::from("A"), AgentId::from("B"));
        index.subscribe(&a, SubscriptionFilter::all()).unwrap();
        index.subscribe(&b, SubscriptionFilter::all()).unwrap();

        let mut params = PublishParams::new("t");
        params.target_agent_ids = vec![a.clone(), AgentId::from("C")];
        let event = params.into_event(AgentId::from("X"), Utc::now());

        let recipients = index.match_event(&event);
        assert_eq!(recipients, HashSet::from([a]));
    }

    #[test]
    fn unsubscribe_removes_from_topic_index() {
        let index = SubscriptionIndex::new();
        let a = AgentId::from("A");
        let id = index.subscribe(&a, SubscriptionFilter::topics(["t"])).unwrap();

        assert!(index.unsubscribe(&id).is_some());
        assert!(index.unsubscribe(&id).is_none());
        assert!(index.match_event(&event_from("X", "t")).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn invalid_filter_leaves_index_untouched() {
        let index = SubscriptionIndex::new();
        let result = index.subscribe(&AgentId::from("A"), SubscriptionFilter::topics(["ok", " "]));
        assert!(matches!(result, Err(StateError::Invalid(_))));
        assert!(index.is_empty());
    }
}
