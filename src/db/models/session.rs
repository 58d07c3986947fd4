//! Login sessions (`erdms_sessions`).
//!
//! A session is created at the OAuth callback and lives exactly as long as
//! the access token it carries. Expiry is enforced on every lookup and a
//! background sweep removes dead rows.

use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;

use super::user::{find_user_by_id, User};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: u32,
    pub entra_access_token: Option<String>,
    pub entra_refresh_token: Option<String>,
    pub entra_id_token: Option<String>,
    pub token_expires_at: NaiveDateTime,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: NaiveDateTime,
    pub last_activity: NaiveDateTime,
}

/// Tokens captured from the authorization-code exchange.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    /// Lifetime of the access token in seconds
    pub expires_in: i64,
}

/// True once the session's token lifetime has elapsed.
pub fn session_expired(expires_at: &NaiveDateTime, now: &NaiveDateTime) -> bool {
    expires_at <= now
}

pub async fn create_session(
    db: &MySqlPool,
    user_id: u32,
    tokens: &SessionTokens,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<String, sqlx::Error> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let expires_at = Utc::now().naive_utc() + Duration::seconds(tokens.expires_in.max(0));

    sqlx::query(
        r#"
        INSERT INTO erdms_sessions
            (id, user_id, entra_access_token, entra_refresh_token, entra_id_token,
             token_expires_at, ip_address, user_agent)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session_id)
    .bind(user_id)
    .bind(&tokens.access_token)
    .bind(&tokens.refresh_token)
    .bind(&tokens.id_token)
    .bind(expires_at)
    .bind(ip_address)
    .bind(user_agent)
    .execute(db)
    .await?;

    tracing::debug!(session_id = %session_id, user_id = user_id, "Session created");
    Ok(session_id)
}

/// Resolve a session id to the session and its (active) user.
/// Expired sessions and sessions of deactivated users yield `None`.
pub async fn find_session(
    db: &MySqlPool,
    session_id: &str,
) -> Result<Option<(Session, User)>, sqlx::Error> {
    let session: Option<Session> = sqlx::query_as("SELECT * FROM erdms_sessions WHERE id = ?")
        .bind(session_id)
        .fetch_optional(db)
        .await?;

    let Some(session) = session else {
        return Ok(None);
    };

    if session_expired(&session.token_expires_at, &Utc::now().naive_utc()) {
        delete_session(db, session_id).await?;
        return Ok(None);
    }

    let Some(user) = find_user_by_id(db, session.user_id).await? else {
        return Ok(None);
    };

    Ok(Some((session, user)))
}

pub async fn update_session_activity(db: &MySqlPool, session_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE erdms_sessions SET last_activity = NOW() WHERE id = ?")
        .bind(session_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn delete_session(db: &MySqlPool, session_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM erdms_sessions WHERE id = ?")
        .bind(session_id)
        .execute(db)
        .await?;
    tracing::debug!(session_id = %session_id, "Session deleted");
    Ok(())
}

/// Remove all sessions past their token expiry. Returns the number purged.
pub async fn purge_expired_sessions(db: &MySqlPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM erdms_sessions WHERE token_expires_at <= ?")
        .bind(Utc::now().naive_utc())
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_expiry_boundary() {
        let created = chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let expires_at = created + Duration::seconds(3600);

        let just_before = created + Duration::seconds(3599);
        let exactly = created + Duration::seconds(3600);
        let after = created + Duration::seconds(3601);

        assert!(!session_expired(&expires_at, &just_before));
        assert!(session_expired(&expires_at, &exactly));
        assert!(session_expired(&expires_at, &after));
    }
}
