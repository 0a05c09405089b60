use async_trait::async_trait;
use serde_json::{json, Value};

use crate::models::{ActionRequest, Params, PermissionDef, RequiredPermission, Scope};

/// A plugin exposing side-effecting actions behind the permission gate.
///
/// Handlers are registered once at startup and owned by the registry for the
/// process lifetime; they are never persisted.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn handler_id(&self) -> &str;

    fn human_name(&self) -> &str;

    fn permissions(&self) -> &[PermissionDef];

    /// Which permission (and scope) gates the given call. Returning `None`
    /// marks the action always-permitted; the handler self-gates. Must be
    /// pure.
    fn required_permission(&self, _action_name: &str, _params: &Params) -> Option<RequiredPermission> {
        self.permissions().first().map(|def| RequiredPermission {
            name: def.name.clone(),
            scope: Scope::new(),
        })
    }

    /// Performs the side effect. Errors are captured onto the action row,
    /// never propagated to the requester.
    async fn execute(&self, action_name: &str, params: &Params) -> anyhow::Result<Value>;

    /// UI display data for a request; opaque to the core.
    fn render_request(&self, request: &ActionRequest) -> Value {
        json!({
            "handler": self.human_name(),
            "action": request.action_name,
            "params": request.params,
            "status": request.status,
            "permission_needed": request.required_permission_name,
            "permission_scope": request.required_scope,
        })
    }

    /// Tool definition forwarded to agent collaborators; opaque to the core.
    fn tool_schema(&self) -> Value {
        let actions: Vec<Value> = self
            .permissions()
            .iter()
            .map(|def| {
                json!({
                    "name": def.name,
                    "description": def.description,
                    "parameters": def.parameter_schema,
                })
            })
            .collect();

        json!({
            "tool_id": self.handler_id(),
            "name": self.human_name(),
            "actions": actions,
        })
    }
}
