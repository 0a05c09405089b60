use std::sync::Arc;

use chrono::{DateTime, Days, Duration, NaiveTime, Utc};

use crate::{
    clock::Clock,
    error::GateError,
    models::{Expiration, PermissionGrant, Scope},
    registry::HandlerRegistry,
    store::{new_id, Store},
};

/// A grant covers a check when every key the grant pins is present in the
/// check scope with the same value. Keys the grant does not mention are
/// unconstrained, so the empty grant scope covers everything.
pub fn scope_covers(grant_scope: &Scope, check_scope: &Scope) -> bool {
    grant_scope
        .iter()
        .all(|(key, value)| check_scope.get(key) == Some(value))
}

fn expires_at_for(expiration: Expiration, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match expiration {
        Expiration::OneHour => Some(now + Duration::hours(1)),
        // Next 00:00:00 UTC strictly after now, even at exact midnight.
        Expiration::Today => Some(
            (now.date_naive() + Days::new(1))
                .and_time(NaiveTime::MIN)
                .and_utc(),
        ),
        Expiration::Indefinite => None,
    }
}

/// Stateless grant logic layered over the store. Expiration is evaluated at
/// read time against the injected clock; no background reaper runs.
pub struct PermissionManager {
    store: Store,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
}

impl PermissionManager {
    pub fn new(store: Store, registry: Arc<HandlerRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            registry,
            clock,
        }
    }

    pub async fn check(
        &self,
        handler_id: &str,
        permission_name: &str,
        scope: &Scope,
    ) -> Result<bool, GateError> {
        self.validate(handler_id, permission_name, scope)?;

        let now = self.clock.now();
        let grants = self
            .store
            .get_active_grants(handler_id, permission_name, now)
            .await?;

        Ok(grants.iter().any(|grant| scope_covers(&grant.scope, scope)))
    }

    pub async fn grant(
        &self,
        handler_id: &str,
        permission_name: &str,
        scope: Scope,
        expiration: Expiration,
        granted_by: &str,
    ) -> Result<PermissionGrant, GateError> {
        self.validate(handler_id, permission_name, &scope)?;

        let now = self.clock.now();
        let grant = PermissionGrant {
            id: new_id("grant"),
            handler_id: handler_id.to_string(),
            permission_name: permission_name.to_string(),
            scope,
            granted_at: now,
            expires_at: expires_at_for(expiration, now),
            granted_by: granted_by.to_string(),
            revoked: false,
        };
        self.store.save_grant(&grant).await?;
        Ok(grant)
    }

    pub async fn revoke(&self, grant_id: &str) -> Result<bool, GateError> {
        self.store.revoke_grant(grant_id).await
    }

    pub async fn list_grants(
        &self,
        handler_id: Option<&str>,
    ) -> Result<Vec<PermissionGrant>, GateError> {
        self.store
            .list_active_grants(handler_id, self.clock.now())
            .await
    }

    fn validate(
        &self,
        handler_id: &str,
        permission_name: &str,
        scope: &Scope,
    ) -> Result<(), GateError> {
        let handler = self.registry.get(handler_id)?;
        let def = handler
            .permissions()
            .iter()
            .find(|def| def.name == permission_name)
            .ok_or_else(|| GateError::UnknownPermission {
                handler_id: handler_id.to_string(),
                permission_name: permission_name.to_string(),
            })?;

        for key in scope.keys() {
            if !def.parameter_schema.contains_key(key) {
                return Err(GateError::UnknownScopeKey {
                    permission_name: permission_name.to_string(),
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }
}
