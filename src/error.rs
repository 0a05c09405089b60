use crate::models::ActionStatus;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("handler not found: {0}")]
    UnknownHandler(String),
    #[error("action not found: {0}")]
    UnknownAction(String),
    #[error("grant not found: {0}")]
    UnknownGrant(String),
    #[error("permission {permission_name} is not defined by handler {handler_id}")]
    UnknownPermission {
        handler_id: String,
        permission_name: String,
    },
    #[error("scope key {key} is not declared by permission {permission_name}")]
    UnknownScopeKey {
        permission_name: String,
        key: String,
    },
    #[error("handler already registered: {0}")]
    DuplicateHandler(String),
    #[error("handler {handler_id} declares permission {name} more than once")]
    DuplicatePermission { handler_id: String, name: String },
    #[error("handler id must not be empty")]
    EmptyHandlerId,
    #[error("invalid transition for action {action_id}: {from} -> {to}")]
    InvalidTransition {
        action_id: String,
        from: ActionStatus,
        to: ActionStatus,
    },
    #[error("permission still missing for action {0}")]
    PermissionStillMissing(String),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::Internal(err.to_string())
    }
}
