use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Action parameters, keyed deterministically so stored JSON is canonical.
pub type Params = BTreeMap<String, Value>;

/// Scope qualifying a permission, e.g. `{recipient: alice@example.com}`.
pub type Scope = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    // Reserved for a future reaper; nothing produces it.
    Expired,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Running => "running",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ActionStatus::Pending),
            "running" => Some(ActionStatus::Running),
            "completed" => Some(ActionStatus::Completed),
            "failed" => Some(ActionStatus::Failed),
            "expired" => Some(ActionStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expiration {
    OneHour,
    Today,
    Indefinite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDef {
    pub name: String,
    pub description: String,
    /// Recognized scope parameter name -> human description. Scope keys in
    /// grants and checks must be a subset of these.
    #[serde(default)]
    pub parameter_schema: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub id: String,
    pub handler_id: String,
    pub permission_name: String,
    pub scope: Scope,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: String,
    pub revoked: bool,
}

impl PermissionGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredPermission {
    pub name: String,
    pub scope: Scope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: String,
    pub handler_id: String,
    pub action_name: String,
    pub params: Params,
    pub status: ActionStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Cached at enqueue time for UI display; `None` for self-gated actions.
    pub required_permission_name: Option<String>,
    pub required_scope: Scope,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: String,
    pub status: ActionStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub required_permission: Option<RequiredPermission>,
}

impl ActionResult {
    pub fn is_pending(&self) -> bool {
        self.status == ActionStatus::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.status == ActionStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_str_roundtrip() {
        for status in [
            ActionStatus::Pending,
            ActionStatus::Running,
            ActionStatus::Completed,
            ActionStatus::Failed,
            ActionStatus::Expired,
        ] {
            assert_eq!(ActionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ActionStatus::parse("bogus"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(ActionStatus::Completed.is_terminal());
        assert!(ActionStatus::Failed.is_terminal());
        assert!(!ActionStatus::Pending.is_terminal());
        assert!(!ActionStatus::Running.is_terminal());
    }

    #[test]
    fn grant_expiry_is_lazy_and_boundary_exclusive() {
        let now = Utc::now();
        let grant = PermissionGrant {
            id: "grant_a".to_string(),
            handler_id: "echo".to_string(),
            permission_name: "speak".to_string(),
            scope: Scope::new(),
            granted_at: now,
            expires_at: Some(now + chrono::Duration::hours(1)),
            granted_by: "user".to_string(),
            revoked: false,
        };
        assert!(!grant.is_expired(now));
        assert!(grant.is_expired(now + chrono::Duration::hours(1)));

        let indefinite = PermissionGrant {
            expires_at: None,
            ..grant
        };
        assert!(!indefinite.is_expired(now + chrono::Duration::days(3650)));
    }
}
