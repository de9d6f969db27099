// Core domain types shared across all Bellhop crates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A named delivery group of live connections.
///
/// Scopes have no persistent identity: a scope exists only as the set of
/// connections currently joined to it and disappears when that set empties.
/// Equality and hashing are structural, so `user:42` and `user:042` are
/// distinct and no string-format parsing is needed at lookup time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    /// Single-owner scope: a connection holds at most one `user` scope.
    User { id: String },
    Org { id: String },
    Role { org: String, role: String },
    /// Ad-hoc channel, e.g. a table or a ward.
    Channel { name: String },
    /// The implicit broadcast scope covering every live connection.
    All,
}

impl Scope {
    pub fn user(id: impl Into<String>) -> Self {
        Self::User { id: id.into() }
    }

    pub fn org(id: impl Into<String>) -> Self {
        Self::Org { id: id.into() }
    }

    pub fn role(org: impl Into<String>, role: impl Into<String>) -> Self {
        Self::Role { org: org.into(), role: role.into() }
    }

    /// The waiter room is the `waiter` role scope of an organization.
    pub fn waiter(org: impl Into<String>) -> Self {
        Self::Role { org: org.into(), role: "waiter".to_string() }
    }

    pub fn channel(name: impl Into<String>) -> Self {
        Self::Channel { name: name.into() }
    }

    /// Whether this scope belongs to the single-owner `user` class.
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { id } => write!(f, "user:{id}"),
            Self::Org { id } => write!(f, "org:{id}"),
            Self::Role { org, role } => write!(f, "role:{org}:{role}"),
            Self::Channel { name } => write!(f, "channel:{name}"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Error parsing a canonical scope string such as `user:42`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid scope `{input}`: {reason}")]
pub struct ParseScopeError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for Scope {
    type Err = ParseScopeError;

    /// Parse the canonical rendering produced by [`Scope::fmt`].
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseScopeError { input: input.to_string(), reason };

        if input == "all" {
            return Ok(Self::All);
        }

        let (prefix, rest) = input.split_once(':').ok_or_else(|| err("missing `:` separator"))?;
        if rest.is_empty() {
            return Err(err("missing identifier"));
        }

        match prefix {
            "user" => Ok(Self::user(rest)),
            "org" => Ok(Self::org(rest)),
            "channel" => Ok(Self::channel(rest)),
            "role" => {
                let (org, role) = rest.split_once(':').ok_or_else(|| err("role scope needs `role:<org>:<role>`"))?;
                if org.is_empty() || role.is_empty() {
                    return Err(err("role scope needs `role:<org>:<role>`"));
                }
                Ok(Self::role(org, role))
            }
            _ => Err(err("unknown scope kind")),
        }
    }
}

/// The kind of an event envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Notification,
    ContentRefresh,
    ContentUpdate,
    CacheInvalidate,
    Signal,
}

impl EventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::ContentRefresh => "content_refresh",
            Self::ContentUpdate => "content_update",
            Self::CacheInvalidate => "cache_invalidate",
            Self::Signal => "signal",
        }
    }
}

/// Where an event should be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Target {
    Scope { scope: Scope },
    Broadcast,
}

impl Target {
    pub fn scope(scope: Scope) -> Self {
        Self::Scope { scope }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scope { scope } => scope.fmt(f),
            Self::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// The unit of delivery through the relay.
///
/// The payload is opaque to the relay apart from the fields used for
/// fingerprinting and logging. The id and timestamp are synthesized at
/// ingress, not supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub kind: EventKind,
    pub target: Target,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(kind: EventKind, target: Target, payload: serde_json::Value) -> Self {
        Self { id: Uuid::new_v4(), kind, target, payload, emitted_at: Utc::now() }
    }
}

/// Kind of a peer-to-peer signaling message. The payload itself is never
/// inspected by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    CallBell,
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CallBell => "call-bell",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
        }
    }
}

/// A push-delivery registration for one user.
///
/// At most one live record exists per user; inserting a new one supersedes
/// the old endpoint atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub user_id: String,
    /// Delivery-endpoint descriptor, opaque JSON handed to the push
    /// collaborator verbatim.
    pub endpoint: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl PushSubscription {
    pub fn new(user_id: impl Into<String>, endpoint: serde_json::Value) -> Self {
        Self { user_id: user_id.into(), endpoint, created_at: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scope_display_is_canonical() {
        assert_eq!(Scope::user("42").to_string(), "user:42");
        assert_eq!(Scope::org("7").to_string(), "org:7");
        assert_eq!(Scope::role("7", "waiter").to_string(), "role:7:waiter");
        assert_eq!(Scope::channel("lobby").to_string(), "channel:lobby");
        assert_eq!(Scope::All.to_string(), "all");
    }

    #[test]
    fn scope_parse_roundtrip() {
        for scope in [
            Scope::user("42"),
            Scope::org("7"),
            Scope::role("7", "waiter"),
            Scope::channel("lobby"),
            Scope::All,
        ] {
            let parsed: Scope = scope.to_string().parse().expect("canonical form should parse");
            assert_eq!(parsed, scope);
        }
    }

    #[test]
    fn scope_parse_rejects_malformed_input() {
        assert!("".parse::<Scope>().is_err());
        assert!("user".parse::<Scope>().is_err());
        assert!("user:".parse::<Scope>().is_err());
        assert!("role:7".parse::<Scope>().is_err());
        assert!("role:7:".parse::<Scope>().is_err());
        assert!("group:9".parse::<Scope>().is_err());
    }

    #[test]
    fn scope_equality_is_structural() {
        assert_eq!(Scope::user("42"), Scope::user("42"));
        assert_ne!(Scope::user("42"), Scope::org("42"));
        assert_ne!(Scope::role("1", "waiter"), Scope::role("1", "chef"));
    }

    #[test]
    fn waiter_scope_is_a_role_scope() {
        assert_eq!(Scope::waiter("7"), Scope::role("7", "waiter"));
        assert!(!Scope::waiter("7").is_user());
        assert!(Scope::user("9").is_user());
    }

    #[test]
    fn envelope_synthesizes_id_and_timestamp() {
        let a = EventEnvelope::new(
            EventKind::Notification,
            Target::scope(Scope::user("1")),
            json!({"message": "hi"}),
        );
        let b = EventEnvelope::new(
            EventKind::Notification,
            Target::scope(Scope::user("1")),
            json!({"message": "hi"}),
        );
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&EventKind::ContentRefresh).unwrap(), "\"content_refresh\"");
        assert_eq!(serde_json::to_string(&EventKind::CacheInvalidate).unwrap(), "\"cache_invalidate\"");
    }

    #[test]
    fn signal_kind_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&SignalKind::IceCandidate).unwrap(), "\"ice-candidate\"");
        assert_eq!(serde_json::to_string(&SignalKind::CallBell).unwrap(), "\"call-bell\"");
    }

    #[test]
    fn target_display() {
        assert_eq!(Target::Broadcast.to_string(), "broadcast");
        assert_eq!(Target::scope(Scope::org("7")).to_string(), "org:7");
    }
}
