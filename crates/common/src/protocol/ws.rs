// WebSocket message types for the bellhop-relay.v1 protocol.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{EventEnvelope, Scope, SignalKind};

/// All message types in the bellhop-relay.v1 WebSocket protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Server -> Client: sent once after the transport opens.
    Welcome {
        connection_id: Uuid,
        heartbeat_interval_ms: u32,
    },

    /// Client -> Server: join the caller's own user scope.
    JoinUser { user_id: String },

    /// Client -> Server: join an organization scope.
    JoinOrg { org_id: String },

    /// Client -> Server: join a role room within an organization.
    JoinRole { org_id: String, role: String },

    /// Client -> Server: join the waiter room of an organization.
    JoinWaiter { org_id: String },

    /// Server -> Client: acknowledgement of a join.
    Joined { scope: Scope },

    /// Server -> Client: a delivered event.
    Event { envelope: EventEnvelope },

    /// Client -> Server: ring another user's call bell. The payload is
    /// relayed verbatim.
    CallBell {
        target_user: String,
        payload: serde_json::Value,
    },

    /// Client -> Server: WebRTC session negotiation addressed to one user.
    WebrtcSignal {
        target_user: String,
        kind: SignalKind,
        payload: serde_json::Value,
    },

    /// Server -> Client: error.
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}
