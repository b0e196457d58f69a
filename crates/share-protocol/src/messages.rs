use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::JSONRPC_VERSION;
use crate::identity::AgentId;
use crate::types::*;

/// JSON-RPC 2.0 request envelope sent by agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl HubRequest {
    pub fn new(method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            id: Some(serde_json::Value::String(uuid::Uuid::new_v4().to_string())),
            params,
        }
    }
}

/// JSON-RPC response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubResponse {
    pub jsonrpc: String,
    pub id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl HubResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: None,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ── Request payloads ──

/// `hub.connect` - the only method accepted before a session is established.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectParams {
    pub agent_id: AgentId,
    pub credential: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeParams {
    pub subscription_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimParams {
    pub entity_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTaskParams {
    /// Defaults to the calling agent.
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    pub task_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteTaskParams {
    pub task_id: String,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateTaskParams {
    pub task_id: String,
    pub rating: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentParams {
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardParams {
    #[serde(default = "default_leaderboard_limit")]
    pub limit: usize,
}

fn default_leaderboard_limit() -> usize {
    10
}

// ── Realtime pushes ──

/// Payload of the `connected` push sent once a session is established.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPayload {
    pub agent_id: AgentId,
    pub session_id: u64,
    pub connected_agents: Vec<ConnectedAgent>,
}

/// Server-to-agent message on the realtime channel.
///
/// Serialized as `{"type": "...", "data": ..., "timestamp": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    Connected {
        data: ConnectedPayload,
        timestamp: DateTime<Utc>,
    },
    NewEvent {
        data: ShareEvent,
        timestamp: DateTime<Utc>,
    },
    /// The session was replaced by a newer connection for the same agent.
    Superseded {
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
}

impl PushMessage {
    pub fn new_event(event: ShareEvent) -> Self {
        Self::NewEvent { data: event, timestamp: Utc::now() }
    }

    pub fn connected(data: ConnectedPayload) -> Self {
        Self::Connected { data, timestamp: Utc::now() }
    }

    pub fn superseded() -> Self {
        Self::Superseded { timestamp: Utc::now() }
    }

    pub fn pong() -> Self {
        Self::Pong { timestamp: Utc::now() }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat { timestamp: Utc::now() }
    }

    /// Whether the transport should close the channel after writing this message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Superseded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_push_has_flat_envelope() {
        let event = PublishParams::new("task.assigned").into_event(AgentId::from("a"), Utc::now());
        let value = serde_json::to_value(PushMessage::new_event(event)).unwrap();
        assert_eq!(value["type"], "new_event");
        assert_eq!(value["data"]["topic"], "task.assigned");
        assert_eq!(value["data"]["source_agent_id"], "a");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn request_accepts_numeric_ids_and_missing_params() {
        let req: HubRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"hub.list_agents","id":7}"#).unwrap();
        assert_eq!(req.id, Some(serde_json::json!(7)));
        assert!(req.params.is_null());
    }

    #[test]
    fn error_response_omits_result() {
        let resp = HubResponse::error(None, -32601, "nope".into());
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], -32601);
    }

    #[test]
    fn leaderboard_limit_defaults() {
        let params: LeaderboardParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(params.limit, 10);
    }
}
