//! User accounts (`erdms_users`).
//!
//! Users are provisioned by an administrator or synchronized from Entra ID;
//! deletion is a soft delete (`aktivni = 0`) and every lookup filters on the
//! active flag.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: u32,
    pub username: String,
    pub entra_id: Option<String>,
    pub upn: Option<String>,
    pub auth_source: String,
    pub email: Option<String>,
    pub jmeno: Option<String>,
    pub prijmeni: Option<String>,
    pub titul_pred: Option<String>,
    pub titul_za: Option<String>,
    pub telefon: Option<String>,
    pub pozice: Option<String>,
    pub pozice_id: Option<u32>,
    pub lokalita_id: Option<u32>,
    pub usek_id: Option<u32>,
    pub organizace_id: Option<u32>,
    pub role: String,
    pub aktivni: bool,
    pub dt_vytvoreni: NaiveDateTime,
    pub dt_aktualizace: Option<NaiveDateTime>,
    pub entra_sync_at: Option<NaiveDateTime>,
}

impl User {
    /// "Jmeno Prijmeni", falling back to the username when both are missing.
    pub fn full_name(&self) -> String {
        match (self.jmeno.as_deref(), self.prijmeni.as_deref()) {
            (None, None) => self.username.clone(),
            (jmeno, prijmeni) => format!(
                "{} {}",
                jmeno.unwrap_or_default(),
                prijmeni.unwrap_or_default()
            )
            .trim()
            .to_string(),
        }
    }

    pub fn initials(&self) -> String {
        let first = self.jmeno.as_deref().and_then(|s| s.chars().next());
        let last = self.prijmeni.as_deref().and_then(|s| s.chars().next());
        let initials: String = [first, last]
            .into_iter()
            .flatten()
            .flat_map(|c| c.to_uppercase())
            .collect();
        if initials.is_empty() {
            "?".to_string()
        } else {
            initials
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case("admin")
    }
}

/// Strip the domain from a UPN-style identifier (`u03924@example.org` -> `u03924`).
pub fn username_from_upn(upn: &str) -> &str {
    upn.split('@').next().unwrap_or(upn)
}

pub async fn find_user_by_id(db: &MySqlPool, id: u32) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM erdms_users WHERE id = ? AND aktivni = 1")
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Look up by username; a UPN/email is reduced to its local part first.
pub async fn find_user_by_username(
    db: &MySqlPool,
    username_or_upn: &str,
) -> Result<Option<User>, sqlx::Error> {
    let username = username_from_upn(username_or_upn);
    sqlx::query_as("SELECT * FROM erdms_users WHERE username = ? AND aktivni = 1")
        .bind(username)
        .fetch_optional(db)
        .await
}

pub async fn find_user_by_entra_id(
    db: &MySqlPool,
    entra_id: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM erdms_users WHERE entra_id = ? AND aktivni = 1")
        .bind(entra_id)
        .fetch_optional(db)
        .await
}

pub async fn find_user_by_email(db: &MySqlPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM erdms_users WHERE email = ? AND aktivni = 1")
        .bind(email)
        .fetch_optional(db)
        .await
}

/// Record the Entra object id and UPN on a local user after a successful login.
pub async fn sync_user_with_entra(
    db: &MySqlPool,
    user_id: u32,
    entra_id: &str,
    upn: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE erdms_users
        SET entra_id = ?,
            upn = ?,
            auth_source = 'entra',
            entra_sync_at = NOW(),
            dt_aktualizace = NOW()
        WHERE id = ?
        "#,
    )
    .bind(entra_id)
    .bind(upn)
    .bind(user_id)
    .execute(db)
    .await?;

    tracing::debug!(user_id = user_id, entra_id = entra_id, "User synced with Entra ID");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: 7,
            username: "u03924".to_string(),
            entra_id: None,
            upn: None,
            auth_source: "local".to_string(),
            email: Some("u03924@example.org".to_string()),
            jmeno: Some("Jana".to_string()),
            prijmeni: Some("Novotná".to_string()),
            titul_pred: None,
            titul_za: None,
            telefon: None,
            pozice: Some("Referent".to_string()),
            pozice_id: None,
            lokalita_id: None,
            usek_id: None,
            organizace_id: None,
            role: "User".to_string(),
            aktivni: true,
            dt_vytvoreni: chrono::NaiveDateTime::default(),
            dt_aktualizace: None,
            entra_sync_at: None,
        }
    }

    #[test]
    fn test_username_from_upn() {
        assert_eq!(username_from_upn("u03924@example.org"), "u03924");
        assert_eq!(username_from_upn("plain"), "plain");
    }

    #[test]
    fn test_full_name_and_initials() {
        let user = sample_user();
        assert_eq!(user.full_name(), "Jana Novotná");
        assert_eq!(user.initials(), "JN");
    }

    #[test]
    fn test_full_name_falls_back_to_username() {
        let mut user = sample_user();
        user.jmeno = None;
        user.prijmeni = None;
        assert_eq!(user.full_name(), "u03924");
        assert_eq!(user.initials(), "?");
    }

    #[test]
    fn test_is_admin_case_insensitive() {
        let mut user = sample_user();
        assert!(!user.is_admin());
        user.role = "Admin".to_string();
        assert!(user.is_admin());
    }
}
