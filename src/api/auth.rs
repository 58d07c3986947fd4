//! Entra ID OAuth login flow and session endpoints.
//!
//! `GET /auth/login` hands the SPA an authorize URL (the SPA navigates
//! itself), `GET /auth/callback` receives the authorization code, exchanges
//! it and turns it into a cookie-backed DB session, `POST /auth/logout`
//! tears the session down and `GET /auth/me` returns the logged-in user,
//! enriched with live Graph data when a delegated token is on the session.

use axum::{
    async_trait,
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::AuthConfig;
use crate::crypto;
use crate::db::{
    create_session, delete_session, events, find_session, find_user_by_entra_id,
    find_user_by_username, log_auth_event, methods, sync_user_with_entra,
    update_session_activity, username_from_upn, Session, SessionTokens, User,
};
use crate::entra::{GraphGroup, GraphUser};
use crate::AppState;

use super::error::ApiError;

/// Response for the login initiation endpoint
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub auth_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub logout_url: String,
}

/// Token endpoint response for the authorization-code grant
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: i64,
}

/// Claims we read out of the id_token
#[derive(Debug, Clone, Deserialize)]
struct IdTokenClaims {
    /// Entra object id of the user
    oid: String,
    /// UPN, e.g. `u03924@example.org`
    preferred_username: Option<String>,
}

/// Percent-encode a query-string component
pub(crate) fn url_encode(s: &str) -> String {
    let mut encoded = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}

/// Decode the payload claims of a JWT. The token comes straight from the
/// token endpoint over TLS, so no signature check is performed here.
fn decode_id_token_claims(id_token: &str) -> Result<IdTokenClaims, ApiError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| ApiError::bad_request("Malformed id_token"))?;
    let bytes = BASE64URL
        .decode(payload)
        .map_err(|_| ApiError::bad_request("Malformed id_token payload"))?;
    serde_json::from_slice(&bytes).map_err(|_| ApiError::bad_request("Malformed id_token claims"))
}

/// Build the session cookie for a fresh login
fn session_cookie(auth: &AuthConfig, session_id: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(auth.cookie_name.clone(), session_id);
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    cookie.set_secure(auth.cookie_secure);
    cookie.set_max_age(time::Duration::hours(auth.cookie_max_age_hours as i64));
    cookie
}

fn removal_cookie(auth: &AuthConfig) -> Cookie<'static> {
    let mut cookie = Cookie::from(auth.cookie_name.clone());
    cookie.set_path("/");
    cookie
}

/// Extract client IP from request headers (X-Forwarded-For, X-Real-IP)
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let ip = first.trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.chars().take(512).collect())
}

/// Record an auth event; failures are logged and swallowed so they never
/// break the login flow itself.
async fn record_auth_event(
    state: &AppState,
    user_id: Option<u32>,
    username: Option<&str>,
    event_type: &str,
    headers: &HeaderMap,
    error_message: Option<&str>,
) {
    if let Err(e) = log_auth_event(
        &state.db,
        user_id,
        username,
        event_type,
        methods::ENTRA_ID,
        client_ip(headers).as_deref(),
        user_agent(headers).as_deref(),
        error_message,
    )
    .await
    {
        warn!("Failed to record auth event: {}", e);
    }
}

fn login_error_redirect(client_url: &str, code: &str) -> Response {
    Redirect::to(&format!("{}/login?error={}", client_url, code)).into_response()
}

/// Start the OAuth flow
///
/// GET /auth/login
pub async fn login(State(state): State<Arc<AppState>>) -> Result<Json<LoginResponse>, ApiError> {
    let verifier = crypto::generate_code_verifier();
    let challenge = crypto::code_challenge(&verifier);
    let csrf_state = crypto::generate_state();

    state.pkce.insert(csrf_state.clone(), verifier);

    let entra = &state.config.entra;
    let auth_url = format!(
        "{}?client_id={}&response_type=code&response_mode=query&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
        entra.authorize_endpoint(),
        entra.client_id,
        url_encode(&entra.redirect_uri),
        url_encode(&entra.scope_string()),
        csrf_state,
        challenge,
    );

    Ok(Json(LoginResponse { auth_url }))
}

/// Exchange the authorization code for tokens (confidential client + PKCE)
async fn exchange_code(
    state: &AppState,
    code: &str,
    verifier: &str,
) -> Result<TokenResponse, ApiError> {
    let entra = &state.config.entra;
    let response = state
        .http
        .post(entra.token_endpoint())
        .form(&[
            ("client_id", entra.client_id.as_str()),
            ("client_secret", entra.client_secret.as_str()),
            ("scope", &entra.scope_string()),
            ("code", code),
            ("redirect_uri", entra.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
            ("code_verifier", verifier),
        ])
        .send()
        .await
        .map_err(|e| ApiError::external(format!("Token exchange failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::external(format!(
            "Token endpoint returned {}: {}",
            status, body
        )));
    }

    response
        .json()
        .await
        .map_err(|e| ApiError::external(format!("Failed to parse token response: {}", e)))
}

/// Handle the redirect back from Microsoft
///
/// GET /auth/callback
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let client_url = state.config.client.client_url.clone();

    // Error straight from the identity platform
    if let Some(provider_error) = params.error {
        warn!(
            error = %provider_error,
            description = params.error_description.as_deref().unwrap_or(""),
            "Authorization error from Microsoft"
        );
        return Ok(login_error_redirect(&client_url, &provider_error));
    }

    let (code, csrf_state) = match (params.code, params.state) {
        (Some(code), Some(state)) => (code, state),
        _ => return Err(ApiError::bad_request("Missing required parameters")),
    };

    // One-shot claim of the PKCE verifier; unknown or reused state fails here
    let Some(verifier) = state.pkce.take(&csrf_state) else {
        warn!("PKCE verifier not found or expired for state");
        return Ok(login_error_redirect(&client_url, "invalid_state"));
    };

    let tokens = match exchange_code(&state, &code, &verifier).await {
        Ok(tokens) => tokens,
        Err(e) => {
            error!("Code exchange failed: {}", e);
            return Ok(login_error_redirect(&client_url, "auth_failed"));
        }
    };

    let claims = match tokens.id_token.as_deref().map(decode_id_token_claims) {
        Some(Ok(claims)) => claims,
        _ => {
            error!("Missing or malformed id_token in token response");
            return Ok(login_error_redirect(&client_url, "auth_failed"));
        }
    };

    let upn = claims
        .preferred_username
        .clone()
        .unwrap_or_else(|| claims.oid.clone());
    let username = username_from_upn(&upn);

    // Resolve the local account: username first (fast path), then the Entra
    // object id in case the username changed after an earlier sync.
    let mut user = find_user_by_username(&state.db, username).await?;
    if user.is_none() {
        user = find_user_by_entra_id(&state.db, &claims.oid).await?;
    }

    let Some(user) = user else {
        warn!(upn = %upn, "Login rejected: user not found in database");
        record_auth_event(
            &state,
            None,
            Some(&upn),
            events::LOGIN_FAILED,
            &headers,
            Some("User not found in database"),
        )
        .await;
        return Ok(login_error_redirect(&client_url, "user_not_found"));
    };

    // Lazy sync of the Entra identity onto the local account
    if user.entra_id.as_deref() != Some(claims.oid.as_str()) {
        sync_user_with_entra(&state.db, user.id, &claims.oid, &upn).await?;
    }

    let session_tokens = SessionTokens {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        id_token: tokens.id_token,
        expires_in: tokens.expires_in,
    };
    let session_id = create_session(
        &state.db,
        user.id,
        &session_tokens,
        client_ip(&headers).as_deref(),
        user_agent(&headers).as_deref(),
    )
    .await?;

    record_auth_event(
        &state,
        Some(user.id),
        Some(&user.username),
        events::LOGIN_SUCCESS,
        &headers,
        None,
    )
    .await;

    info!(username = %user.username, "Login completed");

    let jar = jar.add(session_cookie(&state.config.auth, session_id));
    let redirect = Redirect::to(&format!("{}/dashboard", client_url));
    Ok((jar, redirect).into_response())
}

/// End the session and hand back the Microsoft end-session URL
///
/// POST /auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    if let Some(cookie) = jar.get(&state.config.auth.cookie_name) {
        let session_id = cookie.value().to_string();
        if let Some((_, user)) = find_session(&state.db, &session_id).await? {
            record_auth_event(
                &state,
                Some(user.id),
                Some(&user.username),
                events::LOGOUT,
                &headers,
                None,
            )
            .await;
        }
        delete_session(&state.db, &session_id).await?;
    }

    let entra = &state.config.entra;
    let logout_url = format!(
        "{}?post_logout_redirect_uri={}",
        entra.logout_endpoint(),
        url_encode(&entra.post_logout_redirect_uri),
    );

    let jar = jar.remove(removal_cookie(&state.config.auth));
    Ok((
        jar,
        Json(LogoutResponse {
            success: true,
            logout_url,
        }),
    )
        .into_response())
}

/// Live Graph data attached to the /auth/me response
#[derive(Debug, Serialize)]
pub struct EntraEnrichment {
    pub profile: GraphUser,
    pub member_of: Vec<GraphGroup>,
    pub manager: Option<GraphUser>,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: u32,
    pub username: String,
    pub email: Option<String>,
    pub name: String,
    pub upn: Option<String>,
    pub entra_id: Option<String>,
    pub auth_source: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telefon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub office_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entra_data: Option<EntraEnrichment>,
}

/// Current user info, with live Graph enrichment when possible
///
/// GET /auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
) -> Result<Json<MeResponse>, ApiError> {
    update_session_activity(&state.db, &auth.session.id).await?;

    let user = &auth.user;
    let mut response = MeResponse {
        id: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
        name: user.full_name(),
        upn: user.upn.clone(),
        entra_id: user.entra_id.clone(),
        auth_source: user.auth_source.clone(),
        role: user.role.clone(),
        display_name: None,
        job_title: None,
        department: None,
        telefon: None,
        office_location: None,
        entra_data: None,
    };

    // Enrich from Graph with the delegated token; every call is best-effort
    if let Some(token) = auth.session.entra_access_token.as_deref() {
        match state.entra.me_profile(token).await {
            Ok(profile) => {
                response.display_name = profile.display_name.clone();
                response.job_title = profile.job_title.clone();
                response.department = profile.department.clone();
                response.telefon = profile.phone().map(|s| s.to_string());
                response.office_location = profile.office_location.clone();

                let member_of = match state.entra.me_member_of(token).await {
                    Ok(groups) => groups,
                    Err(e) => {
                        warn!("Group membership not available: {}", e);
                        Vec::new()
                    }
                };
                let manager = match state.entra.me_manager(token).await {
                    Ok(manager) => manager,
                    Err(e) => {
                        warn!("Manager not available: {}", e);
                        None
                    }
                };

                response.entra_data = Some(EntraEnrichment {
                    profile,
                    member_of,
                    manager,
                });
            }
            Err(e) => {
                warn!("Failed to fetch Graph profile: {}", e);
            }
        }
    }

    Ok(Json(response))
}

/// The authenticated session, resolved from the session cookie.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: User,
    pub session: Session,
}

impl AuthSession {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.user.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Administrator role required"))
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let session_id = jar
            .get(&state.config.auth.cookie_name)
            .map(|c| c.value().to_string())
            .ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;

        let (session, user) = find_session(&state.db, &session_id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Session not found"))?;

        Ok(AuthSession { user, session })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_encode() {
        assert_eq!(url_encode("plain-text_1.0~x"), "plain-text_1.0~x");
        assert_eq!(
            url_encode("http://localhost:3000/login"),
            "http%3A%2F%2Flocalhost%3A3000%2Flogin"
        );
        assert_eq!(url_encode("openid profile"), "openid%20profile");
    }

    #[test]
    fn test_decode_id_token_claims() {
        let payload = serde_json::json!({
            "oid": "00000000-1111-2222-3333-444444444444",
            "tid": "tenant-guid",
            "preferred_username": "u03924@example.org",
            "name": "Jana Novotná",
        });
        let token = format!(
            "{}.{}.{}",
            BASE64URL.encode(br#"{"alg":"RS256","typ":"JWT"}"#),
            BASE64URL.encode(serde_json::to_vec(&payload).unwrap()),
            BASE64URL.encode(b"signature"),
        );

        let claims = decode_id_token_claims(&token).unwrap();
        assert_eq!(claims.oid, "00000000-1111-2222-3333-444444444444");
        assert_eq!(claims.preferred_username.as_deref(), Some("u03924@example.org"));
    }

    #[test]
    fn test_decode_rejects_malformed_token() {
        assert!(decode_id_token_claims("not-a-jwt").is_err());
        assert!(decode_id_token_claims("a.!!!.c").is_err());
    }

    #[test]
    fn test_session_cookie_attributes() {
        let auth = AuthConfig::default();
        let cookie = session_cookie(&auth, "session-id".to_string());
        assert_eq!(cookie.name(), "erdms_session");
        assert_eq!(cookie.value(), "session-id");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::hours(24)));
    }
}
