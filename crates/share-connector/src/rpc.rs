//! JSON-RPC request routing shared by the TCP and WebSocket transports.
//!
//! Methods:
//! - `hub.connect` - authenticate and open a session (first request only)
//! - `hub.disconnect` - close the session and release everything it held
//! - `hub.heartbeat` - refresh liveness
//! - `hub.subscribe` / `hub.unsubscribe` - manage filter sets
//! - `hub.publish` - route an event to matching subscribers
//! - `hub.claim` / `hub.release` / `hub.get_claim` - advisory entity claims
//! - `hub.list_agents` - currently connected agents
//! - `hub.start_task` / `hub.complete_task` / `hub.rate_task` - task lifecycle
//! - `hub.trust_score` / `hub.leaderboard` / `hub.agent_stats` - reputation reads

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use share_hub::{
    ClaimOutcome, ConnectionHandle, CredentialValidator, Hub, HubError, SessionId, StateError,
};
use share_protocol::*;

use crate::auth::RateLimiter;

/// Everything a transport needs to serve requests.
#[derive(Clone)]
pub struct ServerContext {
    pub hub: Arc<Hub>,
    pub validator: Arc<dyn CredentialValidator>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl ServerContext {
    pub fn new(
        hub: Arc<Hub>,
        validator: Arc<dyn CredentialValidator>,
        rate_limiter: Option<RateLimiter>,
    ) -> Self {
        Self {
            hub,
            validator,
            rate_limiter: rate_limiter.map(Arc::new),
        }
    }

    /// Transport-side close of a session. The agent's rate bucket is
    /// dropped unless a newer session for the same agent is still live.
    pub fn close_session(&self, session: &Session) {
        self.hub.disconnect_session(&session.agent_id, session.session_id);
        if let Some(limiter) = &self.rate_limiter {
            if !self.hub.is_connected(&session.agent_id) {
                limiter.forget(&session.agent_id);
            }
        }
    }
}

/// The agent bound to a transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub agent_id: AgentId,
    pub session_id: SessionId,
}

impl From<&ConnectionHandle> for Session {
    fn from(handle: &ConnectionHandle) -> Self {
        Self {
            agent_id: handle.agent_id.clone(),
            session_id: handle.session_id,
        }
    }
}

/// Response to a request on an established session.
#[derive(Debug)]
pub struct Reply {
    pub response: HubResponse,
    /// The transport should close after sending the response.
    pub close: bool,
}

impl From<HubResponse> for Reply {
    fn from(response: HubResponse) -> Self {
        Self {
            response,
            close: false,
        }
    }
}

/// Parse one request line. Malformed input yields the error response to send.
pub fn parse_request(raw: &str) -> Result<HubRequest, HubResponse> {
    let request: HubRequest = serde_json::from_str(raw)
        .map_err(|e| HubResponse::error(None, ERR_PARSE, format!("Invalid JSON: {}", e)))?;
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(HubResponse::error(
            request.id,
            ERR_INVALID_REQUEST,
            format!("Unsupported jsonrpc version '{}'", request.jsonrpc),
        ));
    }
    if request.method.trim().is_empty() {
        return Err(HubResponse::error(
            request.id,
            ERR_INVALID_REQUEST,
            "Missing method".to_string(),
        ));
    }
    Ok(request)
}

/// Handle a request on a socket that has no session yet. Only
/// `hub.connect` is accepted; on success the handle is returned alongside
/// the response.
pub fn process_unbound(
    ctx: &ServerContext,
    request: HubRequest,
) -> (HubResponse, Option<ConnectionHandle>) {
    let id = request.id.clone();
    if request.method != METHOD_CONNECT {
        return (
            HubResponse::error(
                id,
                ERR_NOT_CONNECTED,
                format!("Call {} before {}", METHOD_CONNECT, request.method),
            ),
            None,
        );
    }

    let params: ConnectParams = match parse_params(&request.params) {
        Ok(p) => p,
        Err(e) => return (invalid_params(id, e), None),
    };
    match ctx.hub.authenticate(
        ctx.validator.as_ref(),
        &params.agent_id,
        &params.credential,
        params.name,
    ) {
        Ok(handle) => {
            let result = json!({
                "agent_id": handle.agent_id,
                "session_id": handle.session_id,
                "connected_agents": ctx.hub.connected_agents(),
            });
            (HubResponse::success(id, result), Some(handle))
        }
        Err(e) => (hub_error(id, e), None),
    }
}

/// Handle a request on an established session.
/// Gate every inbound message of an established session: it must still be
/// the agent's current session and within the rate limit. Admitted traffic
/// counts as liveness.
pub fn admit(
    ctx: &ServerContext,
    session: &Session,
    id: Option<Value>,
    method: &str,
) -> Result<(), Reply> {
    let agent_id = &session.agent_id;
    if !ctx.hub.is_current_session(agent_id, session.session_id) {
        return Err(Reply {
            response: HubResponse::error(
                id,
                ERR_NOT_CONNECTED,
                "Session is no longer active".to_string(),
            ),
            close: true,
        });
    }
    if let Some(limiter) = &ctx.rate_limiter {
        if !limiter.check(agent_id) {
            tracing::debug!(agent_id = %agent_id, method, "Rate limited");
            return Err(
                HubResponse::error(id, ERR_RATE_LIMITED, "Rate limit exceeded".to_string()).into(),
            );
        }
    }
    ctx.hub.touch(agent_id);
    Ok(())
}

pub fn process_request(ctx: &ServerContext, session: &Session, request: HubRequest) -> Reply {
    let id = request.id.clone();
    let agent_id = &session.agent_id;

    if let Err(reply) = admit(ctx, session, id.clone(), &request.method) {
        return reply;
    }

    let hub = ctx.hub.as_ref();
    let params = &request.params;
    match request.method.as_str() {
        METHOD_CONNECT => HubResponse::error(
            id,
            ERR_INVALID_REQUEST,
            "Session already established".to_string(),
        )
        .into(),
        METHOD_DISCONNECT => handle_disconnect(id, ctx, session),
        METHOD_HEARTBEAT => handle_heartbeat(id, hub, agent_id).into(),
        METHOD_SUBSCRIBE => handle_subscribe(id, params, hub, agent_id).into(),
        METHOD_UNSUBSCRIBE => handle_unsubscribe(id, params, hub, agent_id).into(),
        METHOD_PUBLISH => handle_publish(id, params, hub, agent_id).into(),
        METHOD_CLAIM => handle_claim(id, params, hub, agent_id).into(),
        METHOD_RELEASE => handle_release(id, params, hub, agent_id).into(),
        METHOD_GET_CLAIM => handle_get_claim(id, params, hub).into(),
        METHOD_LIST_AGENTS => {
            HubResponse::success(id, json!({ "agents": hub.connected_agents() })).into()
        }
        METHOD_START_TASK => handle_start_task(id, params, hub, agent_id).into(),
        METHOD_COMPLETE_TASK => handle_complete_task(id, params, hub).into(),
        METHOD_RATE_TASK => handle_rate_task(id, params, hub, agent_id).into(),
        METHOD_TRUST_SCORE => handle_trust_score(id, params, hub, agent_id).into(),
        METHOD_LEADERBOARD => handle_leaderboard(id, params, hub).into(),
        METHOD_AGENT_STATS => handle_agent_stats(id, params, hub, agent_id).into(),
        _ => HubResponse::error(
            id,
            ERR_METHOD_NOT_FOUND,
            format!("Unknown method: {}", request.method),
        )
        .into(),
    }
}

type RequestId = Option<Value>;

fn handle_disconnect(id: RequestId, ctx: &ServerContext, session: &Session) -> Reply {
    let response = match ctx.hub.disconnect(&session.agent_id) {
        Ok(()) => {
            if let Some(limiter) = &ctx.rate_limiter {
                limiter.forget(&session.agent_id);
            }
            HubResponse::success(id, json!({ "disconnected": true }))
        }
        Err(e) => hub_error(id, e),
    };
    Reply {
        response,
        close: true,
    }
}

fn handle_heartbeat(id: RequestId, hub: &Hub, agent_id: &AgentId) -> HubResponse {
    match hub.heartbeat(agent_id) {
        Ok(()) => HubResponse::success(id, json!({ "ok": true, "timestamp": chrono::Utc::now() })),
        Err(e) => hub_error(id, e),
    }
}

fn handle_subscribe(id: RequestId, params: &Value, hub: &Hub, agent_id: &AgentId) -> HubResponse {
    let filter: SubscriptionFilter = match parse_params(params) {
        Ok(f) => f,
        Err(e) => return invalid_params(id, e),
    };
    match hub.subscribe(agent_id, filter) {
        Ok(subscription_id) => {
            HubResponse::success(id, json!({ "subscription_id": subscription_id }))
        }
        Err(e) => hub_error(id, e),
    }
}

fn handle_unsubscribe(id: RequestId, params: &Value, hub: &Hub, agent_id: &AgentId) -> HubResponse {
    let params: UnsubscribeParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return invalid_params(id, e),
    };
    match hub.unsubscribe(agent_id, &params.subscription_id) {
        Ok(removed) => HubResponse::success(id, json!({ "unsubscribed": removed })),
        Err(e) => hub_error(id, e),
    }
}

fn handle_publish(id: RequestId, params: &Value, hub: &Hub, agent_id: &AgentId) -> HubResponse {
    let params: PublishParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return invalid_params(id, e),
    };
    match hub.publish(agent_id, params) {
        Ok(receipt) => HubResponse::success(id, json!(receipt)),
        Err(e) => hub_error(id, e),
    }
}

fn handle_claim(id: RequestId, params: &Value, hub: &Hub, agent_id: &AgentId) -> HubResponse {
    let params: ClaimParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return invalid_params(id, e),
    };
    match hub.claim(agent_id, &params.entity_id) {
        Ok(ClaimOutcome::Granted | ClaimOutcome::AlreadyHeld) => HubResponse::success(
            id,
            json!({ "claimed": true, "entity_id": params.entity_id, "holder": agent_id }),
        ),
        Ok(ClaimOutcome::Conflict { holder }) => HubResponse::success(
            id,
            json!({ "claimed": false, "entity_id": params.entity_id, "holder": holder }),
        ),
        Err(e) => hub_error(id, e),
    }
}

fn handle_release(id: RequestId, params: &Value, hub: &Hub, agent_id: &AgentId) -> HubResponse {
    let params: ClaimParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return invalid_params(id, e),
    };
    match hub.release(agent_id, &params.entity_id) {
        Ok(_) => HubResponse::success(
            id,
            json!({ "released": true, "entity_id": params.entity_id }),
        ),
        Err(HubError::State(StateError::NotClaimant { holder, .. })) => HubResponse::success(
            id,
            json!({ "released": false, "entity_id": params.entity_id, "holder": holder }),
        ),
        Err(e) => hub_error(id, e),
    }
}

fn handle_get_claim(id: RequestId, params: &Value, hub: &Hub) -> HubResponse {
    let params: ClaimParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return invalid_params(id, e),
    };
    let claim = hub.get_claim(&params.entity_id);
    HubResponse::success(
        id,
        json!({
            "entity_id": params.entity_id,
            "holder": claim.as_ref().map(|c| &c.claimant_agent_id),
            "claim": claim,
        }),
    )
}

fn handle_start_task(id: RequestId, params: &Value, hub: &Hub, caller: &AgentId) -> HubResponse {
    let params: StartTaskParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return invalid_params(id, e),
    };
    let agent_id = params.agent_id.unwrap_or_else(|| caller.clone());
    // Tasks may be opened on behalf of another agent only while it is connected.
    if agent_id != *caller && !hub.is_connected(&agent_id) {
        return hub_error(id, HubError::UnknownAgent(agent_id));
    }
    match hub.start_task(&agent_id, &params.task_type) {
        Ok(task_id) => HubResponse::success(id, json!({ "task_id": task_id, "agent_id": agent_id })),
        Err(e) => hub_error(id, e),
    }
}

fn handle_complete_task(id: RequestId, params: &Value, hub: &Hub) -> HubResponse {
    let params: CompleteTaskParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return invalid_params(id, e),
    };
    match hub.complete_task(&params.task_id, params.outcome) {
        Ok(()) => HubResponse::success(
            id,
            json!({ "task_id": params.task_id, "outcome": params.outcome }),
        ),
        Err(e) => hub_error(id, e),
    }
}

fn handle_rate_task(id: RequestId, params: &Value, hub: &Hub, rater: &AgentId) -> HubResponse {
    let params: RateTaskParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return invalid_params(id, e),
    };
    match hub.rate_task(&params.task_id, rater, params.rating) {
        Ok(()) => HubResponse::success(id, json!({ "task_id": params.task_id, "rated": true })),
        Err(e) => hub_error(id, e),
    }
}

fn handle_trust_score(id: RequestId, params: &Value, hub: &Hub, caller: &AgentId) -> HubResponse {
    let agent_id = match target_agent(params, caller) {
        Ok(a) => a,
        Err(e) => return invalid_params(id, e),
    };
    let trust_score = hub.trust_score(&agent_id);
    HubResponse::success(id, json!({ "agent_id": agent_id, "trust_score": trust_score }))
}

fn handle_leaderboard(id: RequestId, params: &Value, hub: &Hub) -> HubResponse {
    let params: LeaderboardParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return invalid_params(id, e),
    };
    HubResponse::success(id, json!({ "leaderboard": hub.leaderboard(params.limit) }))
}

fn handle_agent_stats(id: RequestId, params: &Value, hub: &Hub, caller: &AgentId) -> HubResponse {
    let agent_id = match target_agent(params, caller) {
        Ok(a) => a,
        Err(e) => return invalid_params(id, e),
    };
    HubResponse::success(id, json!(hub.agent_stats(&agent_id)))
}

// ── Helpers ──

/// Missing params are treated as an empty object so all-default payloads
/// may omit them.
fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T, String> {
    let value = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// `agent_id` from params, defaulting to the caller.
fn target_agent(params: &Value, caller: &AgentId) -> Result<AgentId, String> {
    match params.get("agent_id") {
        None | Some(Value::Null) => Ok(caller.clone()),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(AgentId::new(s.as_str())),
        Some(_) => Err("agent_id must be a non-empty string".to_string()),
    }
}

fn invalid_params(id: RequestId, reason: String) -> HubResponse {
    HubResponse::error(id, ERR_INVALID_PARAMS, format!("Invalid params: {}", reason))
}

fn hub_error(id: RequestId, err: HubError) -> HubResponse {
    HubResponse::error(id, err.rpc_code(), err.to_string())
}
