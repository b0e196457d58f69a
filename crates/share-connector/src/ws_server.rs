//! WebSocket transport and read-only HTTP discovery endpoints.
//!
//! Routes:
//! - `GET /ws` - realtime session; credentials in `x-agent-id`/`x-api-key`
//!   headers or `agent_id`/`api_key` query parameters
//! - `GET /health`
//! - `GET /api/agents`
//! - `GET /api/agents/:agent_id/stats`
//! - `GET /api/leaderboard?limit=N`
//! - `GET /api/trust/:agent_id`

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use share_hub::{ConnectionHandle, HubError};
use share_protocol::{AgentId, PushMessage, PROTOCOL_VERSION};

use crate::rpc::{admit, parse_request, process_request, ServerContext, Session};

const AGENT_ID_HEADER: &str = "x-agent-id";
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
struct WebState {
    ctx: ServerContext,
    heartbeat_interval: Duration,
}

pub struct WsServer {
    bind_addr: String,
    ctx: ServerContext,
    heartbeat_interval: Duration,
}

impl WsServer {
    pub fn new(bind_addr: String, ctx: ServerContext, heartbeat_interval: Duration) -> Self {
        Self {
            bind_addr,
            ctx,
            heartbeat_interval,
        }
    }

    pub fn router(&self) -> Router {
        router(self.ctx.clone(), self.heartbeat_interval)
    }

    pub async fn run(self) -> Result<(), anyhow::Error> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        let app = self.router();
        tracing::info!(addr = %listener.local_addr()?, "WebSocket server listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

pub fn router(ctx: ServerContext, heartbeat_interval: Duration) -> Router {
    let state = WebState {
        ctx,
        heartbeat_interval,
    };
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(api_health))
        .route("/api/agents", get(api_agents))
        .route("/api/agents/:agent_id/stats", get(api_agent_stats))
        .route("/api/leaderboard", get(api_leaderboard))
        .route("/api/trust/:agent_id", get(api_trust))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── HTTP ──

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    version: &'static str,
    connected_agents: usize,
}

async fn api_health(State(web): State<WebState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        version: PROTOCOL_VERSION,
        connected_agents: web.ctx.hub.list_connected().len(),
    })
}

async fn api_agents(State(web): State<WebState>) -> impl IntoResponse {
    Json(serde_json::json!({ "agents": web.ctx.hub.connected_agents() }))
}

async fn api_agent_stats(
    State(web): State<WebState>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    Json(web.ctx.hub.agent_stats(&AgentId::new(agent_id)))
}

#[derive(Deserialize)]
struct LeaderboardQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

async fn api_leaderboard(
    State(web): State<WebState>,
    Query(query): Query<LeaderboardQuery>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "leaderboard": web.ctx.hub.leaderboard(query.limit) }))
}

async fn api_trust(State(web): State<WebState>, Path(agent_id): Path<String>) -> impl IntoResponse {
    let agent_id = AgentId::new(agent_id);
    let trust_score = web.ctx.hub.trust_score(&agent_id);
    Json(serde_json::json!({ "agent_id": agent_id, "trust_score": trust_score }))
}

// ── WebSocket ──

#[derive(Debug, Default, Deserialize)]
struct WsAuthQuery {
    agent_id: Option<String>,
    api_key: Option<String>,
    name: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<WsAuthQuery>,
    State(web): State<WebState>,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let agent_id = header(AGENT_ID_HEADER).or(query.agent_id);
    let api_key = header(API_KEY_HEADER).or(query.api_key);

    let (Some(agent_id), Some(api_key)) = (agent_id, api_key) else {
        return (StatusCode::UNAUTHORIZED, "missing agent id or api key").into_response();
    };

    let agent_id = AgentId::new(agent_id);
    let handle = match web.ctx.hub.authenticate(
        web.ctx.validator.as_ref(),
        &agent_id,
        &api_key,
        query.name,
    ) {
        Ok(handle) => handle,
        Err(HubError::AuthRejected(_)) => {
            return (StatusCode::UNAUTHORIZED, "credential rejected").into_response();
        }
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let failed_ctx = web.ctx.clone();
    let failed_session = Session::from(&handle);
    ws.on_failed_upgrade(move |e| {
        tracing::warn!(agent_id = %failed_session.agent_id, error = %e, "WebSocket upgrade failed");
        failed_ctx.close_session(&failed_session);
    })
    .on_upgrade(move |socket| session_loop(socket, web, handle))
}

async fn session_loop(socket: WebSocket, web: WebState, mut handle: ConnectionHandle) {
    let session = Session::from(&handle);
    let ctx = web.ctx;
    let (mut sender, mut receiver) = socket.split();

    let mut idle = tokio::time::interval(web.heartbeat_interval);
    idle.reset();

    loop {
        let outgoing = tokio::select! {
            frame = receiver.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(agent_id = %session.agent_id, error = %e, "WebSocket read failed");
                        break;
                    }
                };
                let reply = if text.trim() == "ping" {
                    admit(&ctx, &session, None, "ping").err()
                } else {
                    Some(match parse_request(&text) {
                        Ok(request) => process_request(&ctx, &session, request),
                        Err(response) => response.into(),
                    })
                };
                match reply {
                    Some(reply) => Outgoing {
                        text: serde_json::to_string(&reply.response).ok(),
                        close: reply.close,
                    },
                    None => Outgoing::push(&PushMessage::pong()),
                }
            }
            push = handle.outbound.recv() => match push {
                Some(push) => Outgoing {
                    text: serde_json::to_string(&push).ok(),
                    close: push.is_terminal(),
                },
                None => break,
            },
            _ = idle.tick() => Outgoing::push(&PushMessage::heartbeat()),
        };

        if let Some(text) = outgoing.text {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
            idle.reset();
        }
        if outgoing.close {
            break;
        }
    }

    let _ = sender.close().await;
    ctx.close_session(&session);
    tracing::debug!(agent_id = %session.agent_id, "WebSocket session ended");
}

struct Outgoing {
    text: Option<String>,
    close: bool,
}

impl Outgoing {
    fn push(message: &PushMessage) -> Self {
        Self {
            text: serde_json::to_string(message).ok(),
            close: false,
        }
    }
}
