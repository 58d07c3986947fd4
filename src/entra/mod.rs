//! Microsoft Graph API client.
//!
//! Two auth modes: app-only (client credentials, used for directory lookups)
//! and delegated (the user's own access token from the login session, used
//! for `/me` profile and calendar reads). The app-only token is cached
//! in-process and refreshed shortly before expiry.

mod models;

pub use models::*;

use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::EntraConfig;

const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Refresh the cached app token this long before it actually expires
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

const USER_SELECT: &str = "id,userPrincipalName,displayName,givenName,surname,mail,jobTitle,\
                           department,officeLocation,mobilePhone,businessPhones";
const USER_BASIC_SELECT: &str = "id,displayName,userPrincipalName,jobTitle,mail";
const ME_SELECT: &str = "id,userPrincipalName,displayName,givenName,surname,mail,jobTitle,\
                         department,officeLocation,mobilePhone,businessPhones,companyName,\
                         city,accountEnabled";
const GROUP_SELECT: &str = "id,displayName,description,mailEnabled,securityEnabled,mail,groupTypes";
const GROUP_DETAIL_SELECT: &str =
    "id,displayName,description,mailEnabled,securityEnabled,mail,groupTypes,visibility";

/// Page size for directory listings (Graph caps $top at 999 for users/groups)
const PAGE_SIZE: usize = 999;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Graph API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Graph API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to acquire Graph API token: {0}")]
    Token(String),
}

impl GraphError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::Api { status: 404, .. })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct ClientCredentialsResponse {
    access_token: String,
    expires_in: i64,
}

pub struct EntraClient {
    http: reqwest::Client,
    config: EntraConfig,
    app_token: Mutex<Option<CachedToken>>,
}

impl EntraClient {
    pub fn new(config: EntraConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            config,
            app_token: Mutex::new(None),
        }
    }

    /// App-only access token for the Graph default scope, cached until
    /// shortly before expiry.
    async fn app_token(&self) -> Result<String, GraphError> {
        let mut cached = self.app_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.token.clone());
            }
        }

        debug!("Acquiring app-only Graph API token");
        let response = self
            .http
            .post(self.config.token_endpoint())
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", GRAPH_DEFAULT_SCOPE),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GraphError::Token(format!("{}: {}", status, message)));
        }

        let token: ClientCredentialsResponse = response
            .json()
            .await
            .map_err(|e| GraphError::Token(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in.max(0) as u64);
        *cached = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });

        Ok(token.access_token)
    }

    async fn get_with_token<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GraphError> {
        let mut request = self.http.get(url).bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GraphError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    async fn get_app<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GraphError> {
        let token = self.app_token().await?;
        let url = format!("{}{}", self.config.graph_base.trim_end_matches('/'), path);
        self.get_with_token(&url, &token, query).await
    }

    async fn get_delegated<T: DeserializeOwned>(
        &self,
        access_token: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GraphError> {
        let url = format!("{}{}", self.config.graph_base.trim_end_matches('/'), path);
        self.get_with_token(&url, access_token, query).await
    }

    // -------------------------------------------------------------------------
    // App-only directory lookups
    // -------------------------------------------------------------------------

    pub async fn get_user(&self, user_id: &str) -> Result<GraphUser, GraphError> {
        self.get_app(&format!("/users/{}", user_id), &[("$select", USER_SELECT)])
            .await
    }

    /// Group memberships of a user; an unknown user yields an empty list.
    pub async fn get_user_groups(&self, user_id: &str) -> Result<Vec<GraphGroup>, GraphError> {
        let result: Result<GraphList<GraphGroup>, GraphError> = self
            .get_app(
                &format!("/users/{}/memberOf", user_id),
                &[("$select", GROUP_SELECT), ("$top", "999")],
            )
            .await;
        match result {
            Ok(list) => Ok(list.value),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// The user's manager; `None` when no manager is assigned.
    pub async fn get_user_manager(&self, user_id: &str) -> Result<Option<GraphUser>, GraphError> {
        let result: Result<GraphUser, GraphError> = self
            .get_app(
                &format!("/users/{}/manager", user_id),
                &[("$select", USER_BASIC_SELECT)],
            )
            .await;
        match result {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_user_direct_reports(
        &self,
        user_id: &str,
    ) -> Result<Vec<GraphUser>, GraphError> {
        let list: GraphList<GraphUser> = self
            .get_app(
                &format!("/users/{}/directReports", user_id),
                &[("$select", USER_BASIC_SELECT)],
            )
            .await?;
        Ok(list.value)
    }

    /// User + groups + manager + direct reports in one shot; every part is
    /// best-effort so a single failing call does not sink the profile.
    pub async fn get_user_full_profile(&self, user_id: &str) -> FullProfile {
        let (user, groups, manager, direct_reports) = tokio::join!(
            self.get_user(user_id),
            self.get_user_groups(user_id),
            self.get_user_manager(user_id),
            self.get_user_direct_reports(user_id),
        );

        let mut errors = FullProfileErrors::default();
        let user = user.map_err(|e| errors.user = Some(e.to_string())).ok();
        let groups = groups
            .map_err(|e| errors.groups = Some(e.to_string()))
            .unwrap_or_default();
        let manager = manager
            .map_err(|e| errors.manager = Some(e.to_string()))
            .ok()
            .flatten();
        let direct_reports = direct_reports
            .map_err(|e| errors.direct_reports = Some(e.to_string()))
            .unwrap_or_default();

        FullProfile {
            user,
            groups,
            manager,
            direct_reports,
            errors,
        }
    }

    pub async fn get_group(&self, group_id: &str) -> Result<GraphGroup, GraphError> {
        self.get_app(
            &format!("/groups/{}", group_id),
            &[("$select", GROUP_DETAIL_SELECT)],
        )
        .await
    }

    pub async fn get_group_members(&self, group_id: &str) -> Result<Vec<GraphUser>, GraphError> {
        let list: GraphList<GraphUser> = self
            .get_app(
                &format!("/groups/{}/members", group_id),
                &[("$select", USER_BASIC_SELECT), ("$top", "999")],
            )
            .await?;
        Ok(list.value)
    }

    pub async fn list_groups(&self) -> Result<Vec<GraphGroup>, GraphError> {
        let list: GraphList<GraphGroup> = self
            .get_app("/groups", &[("$select", GROUP_SELECT), ("$top", "999")])
            .await?;
        Ok(list.value)
    }

    /// List directory users up to `limit`, following `@odata.nextLink` pages.
    pub async fn list_users(&self, limit: usize) -> Result<Vec<GraphUser>, GraphError> {
        let token = self.app_token().await?;
        let mut users: Vec<GraphUser> = Vec::new();

        let top = PAGE_SIZE.min(limit.max(1)).to_string();
        let url = format!("{}/users", self.config.graph_base.trim_end_matches('/'));
        let mut page: GraphList<GraphUser> = self
            .get_with_token(
                &url,
                &token,
                &[("$select", USER_SELECT), ("$top", top.as_str())],
            )
            .await?;

        loop {
            users.extend(page.value);
            if users.len() >= limit {
                users.truncate(limit);
                break;
            }
            // nextLink is a complete URL including the original query
            match page.next_link.take() {
                Some(next) => page = self.get_with_token(&next, &token, &[]).await?,
                None => break,
            }
        }

        Ok(users)
    }

    /// Prefix search across displayName, userPrincipalName and mail.
    pub async fn search_users(
        &self,
        search: &str,
        limit: usize,
    ) -> Result<Vec<GraphUser>, GraphError> {
        let quoted = odata_quote(search);
        let filter = format!(
            "startswith(displayName,'{q}') or startswith(userPrincipalName,'{q}') or startswith(mail,'{q}')",
            q = quoted
        );
        let top = limit.max(1).to_string();
        let list: GraphList<GraphUser> = self
            .get_app(
                "/users",
                &[
                    ("$select", USER_SELECT),
                    ("$filter", filter.as_str()),
                    ("$top", top.as_str()),
                ],
            )
            .await?;
        Ok(list.value)
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<GraphUser>, GraphError> {
        let filter = format!("mail eq '{}'", odata_quote(email));
        let list: GraphList<GraphUser> = self
            .get_app(
                "/users",
                &[
                    ("$select", USER_BASIC_SELECT),
                    ("$filter", filter.as_str()),
                    ("$top", "1"),
                ],
            )
            .await?;
        Ok(list.value.into_iter().next())
    }

    // -------------------------------------------------------------------------
    // Delegated reads (the logged-in user's own token)
    // -------------------------------------------------------------------------

    pub async fn me_profile(&self, access_token: &str) -> Result<GraphUser, GraphError> {
        self.get_delegated(access_token, "/me", &[("$select", ME_SELECT)])
            .await
    }

    pub async fn me_member_of(&self, access_token: &str) -> Result<Vec<GraphGroup>, GraphError> {
        let list: GraphList<GraphGroup> = self
            .get_delegated(access_token, "/me/memberOf", &[("$top", "999")])
            .await?;
        Ok(list.value)
    }

    pub async fn me_manager(&self, access_token: &str) -> Result<Option<GraphUser>, GraphError> {
        let result: Result<GraphUser, GraphError> = self
            .get_delegated(access_token, "/me/manager", &[("$select", USER_BASIC_SELECT)])
            .await;
        match result {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Upcoming calendar events over the next `days` days.
    pub async fn my_calendar_events(
        &self,
        access_token: &str,
        days: i64,
    ) -> Result<Vec<CalendarEvent>, GraphError> {
        let now = Utc::now();
        let start = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = (now + ChronoDuration::days(days.max(1)))
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        let list: GraphList<CalendarEvent> = self
            .get_delegated(
                access_token,
                "/me/calendarview",
                &[
                    ("startDateTime", start.as_str()),
                    ("endDateTime", end.as_str()),
                    ("$orderby", "start/dateTime"),
                    ("$top", "100"),
                ],
            )
            .await?;
        Ok(list.value)
    }
}

/// Escape a literal for an OData single-quoted string.
fn odata_quote(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odata_quote_escapes_single_quotes() {
        assert_eq!(odata_quote("O'Brien"), "O''Brien");
        assert_eq!(odata_quote("plain"), "plain");
    }

    #[test]
    fn test_is_not_found() {
        let err = GraphError::Api {
            status: 404,
            message: "Resource not found".to_string(),
        };
        assert!(err.is_not_found());

        let err = GraphError::Api {
            status: 403,
            message: "Forbidden".to_string(),
        };
        assert!(!err.is_not_found());
    }
}
