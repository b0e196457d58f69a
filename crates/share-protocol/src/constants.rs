pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "0.2.0";

/// Author of hub-generated events (conflicts, presence).
pub const SYSTEM_AGENT_ID: &str = "system";

/// Topic entry that matches every topic.
pub const TOPIC_WILDCARD: &str = "*";

pub const MAX_IDENTIFIER_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 16 * 1024;

pub const DEFAULT_RPC_PORT: u16 = 9470;
pub const DEFAULT_WS_PORT: u16 = 9471;

/// Priority given to hub-generated conflict notices.
pub const CONFLICT_PRIORITY: i32 = 10;

// ── JSON-RPC methods ──

pub const METHOD_CONNECT: &str = "hub.connect";
pub const METHOD_DISCONNECT: &str = "hub.disconnect";
pub const METHOD_HEARTBEAT: &str = "hub.heartbeat";
pub const METHOD_SUBSCRIBE: &str = "hub.subscribe";
pub const METHOD_UNSUBSCRIBE: &str = "hub.unsubscribe";
pub const METHOD_PUBLISH: &str = "hub.publish";
pub const METHOD_CLAIM: &str = "hub.claim";
pub const METHOD_RELEASE: &str = "hub.release";
pub const METHOD_GET_CLAIM: &str = "hub.get_claim";
pub const METHOD_LIST_AGENTS: &str = "hub.list_agents";
pub const METHOD_START_TASK: &str = "hub.start_task";
pub const METHOD_COMPLETE_TASK: &str = "hub.complete_task";
pub const METHOD_RATE_TASK: &str = "hub.rate_task";
pub const METHOD_TRUST_SCORE: &str = "hub.trust_score";
pub const METHOD_LEADERBOARD: &str = "hub.leaderboard";
pub const METHOD_AGENT_STATS: &str = "hub.agent_stats";

// ── JSON-RPC error codes ──

pub const ERR_PARSE: i32 = -32700;
pub const ERR_INVALID_REQUEST: i32 = -32600;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_UNKNOWN_AGENT: i32 = -32001;
pub const ERR_AUTH_REJECTED: i32 = -32002;
pub const ERR_NOT_CONNECTED: i32 = -32003;
pub const ERR_REPUTATION: i32 = -32004;
pub const ERR_RATE_LIMITED: i32 = -32005;

/// Standard topic vocabulary. Topics stay free-form strings; these are the
/// ones agents conventionally agree on.
pub mod topics {
    pub const ENTITY_CREATED: &str = "entity.created";
    pub const ENTITY_MODIFIED: &str = "entity.modified";
    pub const ENTITY_DELETED: &str = "entity.deleted";
    pub const ACTION_STARTED: &str = "action.started";
    pub const ACTION_COMPLETED: &str = "action.completed";
    pub const ACTION_FAILED: &str = "action.failed";
    pub const DECISION_MADE: &str = "decision.made";
    pub const TOOL_CALLED: &str = "tool.called";
    pub const TOOL_RESULT: &str = "tool.result";
    pub const HELP_REQUESTED: &str = "help.requested";
    pub const HANDOFF: &str = "handoff";
    pub const CONFLICT_DETECTED: &str = "conflict.detected";
    pub const AGENT_CONNECTED: &str = "agent.connected";
    pub const AGENT_DISCONNECTED: &str = "agent.disconnected";
}
