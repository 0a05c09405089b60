use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use uuid::Uuid;

use crate::{
    error::GateError,
    models::{ActionRequest, ActionStatus, Params, PermissionGrant, Scope},
};

/// Path sentinel for a non-durable store with the same API.
pub const MEMORY_PATH: &str = ":memory:";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS permission_grants (
    id TEXT PRIMARY KEY,
    handler_id TEXT NOT NULL,
    permission_name TEXT NOT NULL,
    scope_json TEXT NOT NULL DEFAULT '{}',
    granted_at TEXT NOT NULL,
    expires_at TEXT,
    granted_by TEXT NOT NULL DEFAULT 'user',
    revoked INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS action_requests (
    id TEXT PRIMARY KEY,
    handler_id TEXT NOT NULL,
    action_name TEXT NOT NULL,
    params_json TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'pending',
    result_json TEXT,
    error TEXT,
    required_permission_name TEXT,
    required_scope_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_grants_lookup
    ON permission_grants(handler_id, permission_name, revoked);

CREATE INDEX IF NOT EXISTS idx_actions_status
    ON action_requests(status);
"#;

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7())
}

// PENDING -> RUNNING (approve), PENDING -> FAILED (deny),
// RUNNING -> COMPLETED | FAILED (execution outcome). Nothing else.
fn transition_allowed(from: ActionStatus, to: ActionStatus) -> bool {
    matches!(
        (from, to),
        (ActionStatus::Pending, ActionStatus::Running)
            | (ActionStatus::Pending, ActionStatus::Failed)
            | (ActionStatus::Running, ActionStatus::Completed)
            | (ActionStatus::Running, ActionStatus::Failed)
    )
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(path: &str) -> Result<Self, GateError> {
        let options = if path == MEMORY_PATH {
            SqliteConnectOptions::new().in_memory(true)
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5))
        };

        // Single-writer store; one connection also keeps an in-memory
        // database alive between calls.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn save_grant(&self, grant: &PermissionGrant) -> Result<(), GateError> {
        sqlx::query(
            r#"
            INSERT INTO permission_grants
              (id, handler_id, permission_name, scope_json, granted_at, expires_at, granted_by, revoked)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&grant.id)
        .bind(&grant.handler_id)
        .bind(&grant.permission_name)
        .bind(to_json(&grant.scope)?)
        .bind(grant.granted_at)
        .bind(grant.expires_at)
        .bind(&grant.granted_by)
        .bind(grant.revoked)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_grant(&self, grant_id: &str) -> Result<Option<PermissionGrant>, GateError> {
        let row = sqlx::query("SELECT * FROM permission_grants WHERE id = ?1")
            .bind(grant_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_grant).transpose()
    }

    /// Unrevoked, unexpired grants for one permission. Scope matching is the
    /// caller's job.
    pub async fn get_active_grants(
        &self,
        handler_id: &str,
        permission_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PermissionGrant>, GateError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM permission_grants
            WHERE handler_id = ?1
              AND permission_name = ?2
              AND revoked = 0
              AND (expires_at IS NULL OR expires_at > ?3)
            "#,
        )
        .bind(handler_id)
        .bind(permission_name)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_grant).collect()
    }

    pub async fn list_active_grants(
        &self,
        handler_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PermissionGrant>, GateError> {
        let rows = match handler_id {
            Some(handler_id) => {
                sqlx::query(
                    r#"
                    SELECT * FROM permission_grants
                    WHERE handler_id = ?1
                      AND revoked = 0
                      AND (expires_at IS NULL OR expires_at > ?2)
                    ORDER BY granted_at
                    "#,
                )
                .bind(handler_id)
                .bind(now)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM permission_grants
                    WHERE revoked = 0
                      AND (expires_at IS NULL OR expires_at > ?1)
                    ORDER BY granted_at
                    "#,
                )
                .bind(now)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_grant).collect()
    }

    /// Soft-delete. Returns whether a row flipped; already-revoked and
    /// missing ids both return false.
    pub async fn revoke_grant(&self, grant_id: &str) -> Result<bool, GateError> {
        let result = sqlx::query(
            "UPDATE permission_grants SET revoked = 1 WHERE id = ?1 AND revoked = 0",
        )
        .bind(grant_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn save_action(&self, action: &ActionRequest) -> Result<(), GateError> {
        sqlx::query(
            r#"
            INSERT INTO action_requests
              (id, handler_id, action_name, params_json, status, result_json, error,
               required_permission_name, required_scope_json, created_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&action.id)
        .bind(&action.handler_id)
        .bind(&action.action_name)
        .bind(to_json(&action.params)?)
        .bind(action.status.as_str())
        .bind(action.result.as_ref().map(to_json).transpose()?)
        .bind(&action.error)
        .bind(&action.required_permission_name)
        .bind(to_json(&action.required_scope)?)
        .bind(action.created_at)
        .bind(action.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Applies one state-machine edge, validating the current row's status
    /// under the same transaction. Returns the updated row.
    pub async fn update_action_status(
        &self,
        action_id: &str,
        status: ActionStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<ActionRequest, GateError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM action_requests WHERE id = ?1")
            .bind(action_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| GateError::UnknownAction(action_id.to_string()))?;

        let mut action = row_to_action(&row)?;
        if !transition_allowed(action.status, status) {
            return Err(GateError::InvalidTransition {
                action_id: action.id,
                from: action.status,
                to: status,
            });
        }

        sqlx::query(
            r#"
            UPDATE action_requests
            SET status = ?1, result_json = ?2, error = ?3, completed_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(status.as_str())
        .bind(result.map(to_json).transpose()?)
        .bind(error)
        .bind(completed_at)
        .bind(action_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        action.status = status;
        action.result = result.cloned();
        action.error = error.map(str::to_string);
        action.completed_at = completed_at;
        Ok(action)
    }

    pub async fn get_action(&self, action_id: &str) -> Result<Option<ActionRequest>, GateError> {
        let row = sqlx::query("SELECT * FROM action_requests WHERE id = ?1")
            .bind(action_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_action).transpose()
    }

    pub async fn list_pending_actions(&self) -> Result<Vec<ActionRequest>, GateError> {
        let rows = sqlx::query(
            "SELECT * FROM action_requests WHERE status = 'pending' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_action).collect()
    }

    pub async fn list_actions_by_handler(
        &self,
        handler_id: &str,
    ) -> Result<Vec<ActionRequest>, GateError> {
        let rows =
            sqlx::query("SELECT * FROM action_requests WHERE handler_id = ?1 ORDER BY created_at")
                .bind(handler_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(row_to_action).collect()
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, GateError> {
    serde_json::to_string(value).map_err(GateError::internal)
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, GateError> {
    serde_json::from_str(raw).map_err(GateError::internal)
}

fn row_to_grant(row: &SqliteRow) -> Result<PermissionGrant, GateError> {
    let scope_json: String = row.try_get("scope_json")?;
    Ok(PermissionGrant {
        id: row.try_get("id")?,
        handler_id: row.try_get("handler_id")?,
        permission_name: row.try_get("permission_name")?,
        scope: from_json::<Scope>(&scope_json)?,
        granted_at: row.try_get("granted_at")?,
        expires_at: row.try_get("expires_at")?,
        granted_by: row.try_get("granted_by")?,
        revoked: row.try_get("revoked")?,
    })
}

fn row_to_action(row: &SqliteRow) -> Result<ActionRequest, GateError> {
    let params_json: String = row.try_get("params_json")?;
    let required_scope_json: String = row.try_get("required_scope_json")?;
    let status_raw: String = row.try_get("status")?;
    let status = ActionStatus::parse(&status_raw)
        .ok_or_else(|| GateError::internal(format!("unknown action status: {status_raw}")))?;
    let result_json: Option<String> = row.try_get("result_json")?;
    let result = result_json.as_deref().map(from_json).transpose()?;

    Ok(ActionRequest {
        id: row.try_get("id")?,
        handler_id: row.try_get("handler_id")?,
        action_name: row.try_get("action_name")?,
        params: from_json::<Params>(&params_json)?,
        status,
        result,
        error: row.try_get("error")?,
        required_permission_name: row.try_get("required_permission_name")?,
        required_scope: from_json::<Scope>(&required_scope_json)?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}
