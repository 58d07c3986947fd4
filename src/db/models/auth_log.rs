//! Authentication event log (`erdms_auth_log`). Append-only.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthLogEntry {
    pub id: u64,
    pub user_id: Option<u32>,
    pub username: Option<String>,
    pub event_type: String,
    pub auth_method: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Authentication event types
pub mod events {
    pub const LOGIN_SUCCESS: &str = "login_success";
    pub const LOGIN_FAILED: &str = "login_failed";
    pub const LOGOUT: &str = "logout";
}

/// Authentication methods
pub mod methods {
    pub const ENTRA_ID: &str = "entra_id";
}

/// Record an authentication event
#[allow(clippy::too_many_arguments)]
pub async fn log_auth_event(
    db: &MySqlPool,
    user_id: Option<u32>,
    username: Option<&str>,
    event_type: &str,
    auth_method: &str,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO erdms_auth_log
            (user_id, username, event_type, auth_method, ip_address, user_agent, error_message)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(username)
    .bind(event_type)
    .bind(auth_method)
    .bind(ip_address)
    .bind(user_agent)
    .bind(error_message)
    .execute(db)
    .await?;

    tracing::debug!(
        event_type = event_type,
        username = username,
        "Auth event recorded"
    );
    Ok(())
}
