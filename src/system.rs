use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::Config,
    error::GateError,
    events::{Event, EventBus},
    handler::ActionHandler,
    models::{
        ActionRequest, ActionResult, ActionStatus, Expiration, Params, PermissionGrant,
        RequiredPermission, Scope,
    },
    permissions::PermissionManager,
    registry::HandlerRegistry,
    store::{new_id, Store, MEMORY_PATH},
};

/// Orchestrator tying the gate together: every requested action executes
/// immediately if a matching grant exists, otherwise it is parked PENDING
/// until a human approves or denies it.
///
/// All public methods serialize on one process-wide lock, so state-machine
/// transitions and event emissions are totally ordered per action.
pub struct ActionSystem {
    store: Store,
    registry: Arc<HandlerRegistry>,
    permissions: PermissionManager,
    events: EventBus,
    clock: Arc<dyn Clock>,
    gate: Mutex<()>,
}

impl ActionSystem {
    pub async fn open(path: &str) -> Result<Self, GateError> {
        Self::open_with_clock(path, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        path: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GateError> {
        let store = Store::open(path).await?;
        let registry = Arc::new(HandlerRegistry::new());
        let permissions = PermissionManager::new(store.clone(), registry.clone(), clock.clone());

        Ok(Self {
            store,
            registry,
            permissions,
            events: EventBus::new(),
            clock,
            gate: Mutex::new(()),
        })
    }

    pub async fn in_memory() -> Result<Self, GateError> {
        Self::open(MEMORY_PATH).await
    }

    pub async fn from_config(config: &Config) -> Result<Self, GateError> {
        Self::open(&config.database_path).await
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn close(&self) {
        self.store.close().await;
    }

    pub fn register_handler(&self, handler: Arc<dyn ActionHandler>) -> Result<(), GateError> {
        self.registry.register(handler)
    }

    pub fn list_handlers(&self) -> Result<Vec<Arc<dyn ActionHandler>>, GateError> {
        self.registry.list()
    }

    pub fn tool_schemas(&self) -> Result<Vec<Value>, GateError> {
        Ok(self
            .registry
            .list()?
            .iter()
            .map(|handler| handler.tool_schema())
            .collect())
    }

    /// Executes immediately when the gate passes, otherwise persists the
    /// action PENDING and notifies observers.
    pub async fn request_action(
        &self,
        handler_id: &str,
        action_name: &str,
        params: Params,
    ) -> Result<ActionResult, GateError> {
        let _gate = self.gate.lock().await;

        let handler = self.registry.get(handler_id)?;
        let required = handler.required_permission(action_name, &params);
        let permitted = match &required {
            Some(req) => self.permissions.check(handler_id, &req.name, &req.scope).await?,
            None => true,
        };

        let action = ActionRequest {
            id: new_id("act"),
            handler_id: handler_id.to_string(),
            action_name: action_name.to_string(),
            params,
            status: if permitted {
                ActionStatus::Running
            } else {
                ActionStatus::Pending
            },
            result: None,
            error: None,
            required_permission_name: required.as_ref().map(|req| req.name.clone()),
            required_scope: required
                .as_ref()
                .map(|req| req.scope.clone())
                .unwrap_or_default(),
            created_at: self.clock.now(),
            completed_at: None,
        };
        self.store.save_action(&action).await?;

        match required {
            Some(req) if !permitted => {
                info!(
                    action_id = %action.id,
                    handler_id,
                    action_name,
                    permission = %req.name,
                    "action enqueued pending approval"
                );
                self.events.emit(&Event::ActionEnqueued {
                    action: action.clone(),
                });
                self.events.emit(&Event::PermissionNeeded {
                    handler_id: handler_id.to_string(),
                    permission_name: req.name.clone(),
                    scope: req.scope.clone(),
                });
                Ok(ActionResult {
                    action_id: action.id,
                    status: ActionStatus::Pending,
                    result: None,
                    error: None,
                    required_permission: Some(req),
                })
            }
            _ => self.execute(handler.as_ref(), action).await,
        }
    }

    /// Re-checks the gate for a PENDING action and executes it. The grant
    /// must have been added in the interim; otherwise the action stays
    /// PENDING and `PermissionStillMissing` is returned.
    pub async fn approve_action(&self, action_id: &str) -> Result<ActionResult, GateError> {
        let _gate = self.gate.lock().await;

        let action = self.load_action(action_id).await?;
        if action.status != ActionStatus::Pending {
            return Err(GateError::InvalidTransition {
                action_id: action.id,
                from: action.status,
                to: ActionStatus::Running,
            });
        }

        let handler = self.registry.get(&action.handler_id)?;
        let permitted = match &action.required_permission_name {
            Some(name) => {
                self.permissions
                    .check(&action.handler_id, name, &action.required_scope)
                    .await?
            }
            None => true,
        };
        if !permitted {
            return Err(GateError::PermissionStillMissing(action.id));
        }

        let running = self
            .store
            .update_action_status(&action.id, ActionStatus::Running, None, None, None)
            .await?;
        self.execute(handler.as_ref(), running).await
    }

    /// PENDING -> FAILED without execution.
    pub async fn deny_action(
        &self,
        action_id: &str,
        reason: &str,
    ) -> Result<ActionResult, GateError> {
        let _gate = self.gate.lock().await;

        let action = self.load_action(action_id).await?;
        if action.status != ActionStatus::Pending {
            return Err(GateError::InvalidTransition {
                action_id: action.id,
                from: action.status,
                to: ActionStatus::Failed,
            });
        }

        let message = format!("denied: {reason}");
        let denied = self
            .store
            .update_action_status(
                &action.id,
                ActionStatus::Failed,
                None,
                Some(&message),
                Some(self.clock.now()),
            )
            .await?;
        info!(action_id = %denied.id, handler_id = %denied.handler_id, "action denied");
        self.events.emit(&Event::ActionFailed {
            action: denied.clone(),
        });

        Ok(ActionResult {
            action_id: denied.id,
            status: ActionStatus::Failed,
            result: None,
            error: Some(message),
            required_permission: None,
        })
    }

    pub async fn get_action(&self, action_id: &str) -> Result<ActionRequest, GateError> {
        let _gate = self.gate.lock().await;
        self.load_action(action_id).await
    }

    pub async fn list_pending_actions(&self) -> Result<Vec<ActionRequest>, GateError> {
        let _gate = self.gate.lock().await;
        self.store.list_pending_actions().await
    }

    pub async fn list_actions_by_handler(
        &self,
        handler_id: &str,
    ) -> Result<Vec<ActionRequest>, GateError> {
        let _gate = self.gate.lock().await;
        self.store.list_actions_by_handler(handler_id).await
    }

    pub async fn check_permission(
        &self,
        handler_id: &str,
        permission_name: &str,
        scope: &Scope,
    ) -> Result<bool, GateError> {
        let _gate = self.gate.lock().await;
        self.permissions.check(handler_id, permission_name, scope).await
    }

    /// Writes a grant. Pending actions newly covered by it are NOT executed;
    /// execution always goes through `approve_action`.
    pub async fn grant_permission(
        &self,
        handler_id: &str,
        permission_name: &str,
        scope: Scope,
        expiration: Expiration,
        granted_by: &str,
    ) -> Result<PermissionGrant, GateError> {
        let _gate = self.gate.lock().await;

        let grant = self
            .permissions
            .grant(handler_id, permission_name, scope, expiration, granted_by)
            .await?;
        info!(
            grant_id = %grant.id,
            handler_id,
            permission = permission_name,
            granted_by,
            "permission granted"
        );
        self.events.emit(&Event::PermissionGranted {
            grant: grant.clone(),
        });
        Ok(grant)
    }

    pub async fn revoke_permission(&self, grant_id: &str) -> Result<bool, GateError> {
        let _gate = self.gate.lock().await;

        let grant = self
            .store
            .get_grant(grant_id)
            .await?
            .ok_or_else(|| GateError::UnknownGrant(grant_id.to_string()))?;
        let revoked = self.permissions.revoke(grant_id).await?;
        if revoked {
            info!(grant_id, handler_id = %grant.handler_id, "permission revoked");
            self.events.emit(&Event::PermissionRevoked {
                grant: PermissionGrant {
                    revoked: true,
                    ..grant
                },
            });
        }
        Ok(revoked)
    }

    pub async fn list_grants(
        &self,
        handler_id: Option<&str>,
    ) -> Result<Vec<PermissionGrant>, GateError> {
        let _gate = self.gate.lock().await;
        self.permissions.list_grants(handler_id).await
    }

    async fn load_action(&self, action_id: &str) -> Result<ActionRequest, GateError> {
        self.store
            .get_action(action_id)
            .await?
            .ok_or_else(|| GateError::UnknownAction(action_id.to_string()))
    }

    /// Runs a RUNNING action to its terminal state. Handler failures land on
    /// the row, never in the returned `Err`; the row is durable before any
    /// event fires.
    async fn execute(
        &self,
        handler: &dyn ActionHandler,
        action: ActionRequest,
    ) -> Result<ActionResult, GateError> {
        let required = required_of(&action);
        match handler.execute(&action.action_name, &action.params).await {
            Ok(value) => {
                let completed = self
                    .store
                    .update_action_status(
                        &action.id,
                        ActionStatus::Completed,
                        Some(&value),
                        None,
                        Some(self.clock.now()),
                    )
                    .await?;
                info!(
                    action_id = %completed.id,
                    handler_id = %completed.handler_id,
                    action_name = %completed.action_name,
                    "action completed"
                );
                self.events.emit(&Event::ActionCompleted {
                    action: completed.clone(),
                });
                Ok(ActionResult {
                    action_id: completed.id,
                    status: ActionStatus::Completed,
                    result: completed.result,
                    error: None,
                    required_permission: required,
                })
            }
            Err(err) => {
                let message = err.to_string();
                let failed = self
                    .store
                    .update_action_status(
                        &action.id,
                        ActionStatus::Failed,
                        None,
                        Some(&message),
                        Some(self.clock.now()),
                    )
                    .await?;
                warn!(
                    action_id = %failed.id,
                    handler_id = %failed.handler_id,
                    error = %message,
                    "action failed"
                );
                self.events.emit(&Event::ActionFailed {
                    action: failed.clone(),
                });
                Ok(ActionResult {
                    action_id: failed.id,
                    status: ActionStatus::Failed,
                    result: None,
                    error: Some(message),
                    required_permission: required,
                })
            }
        }
    }
}

fn required_of(action: &ActionRequest) -> Option<RequiredPermission> {
    action
        .required_permission_name
        .as_ref()
        .map(|name| RequiredPermission {
            name: name.clone(),
            scope: action.required_scope.clone(),
        })
}
