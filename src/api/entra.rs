//! Entra ID directory endpoints.
//!
//! Thin HTTP layer over [`EntraClient`](crate::entra::EntraClient). Everything
//! here requires a valid session; directory profiles are readable by any
//! signed-in user (colleague data is organization-public).

use axum::{
    extract::{Path, Query, State},
    Json,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::entra::{CalendarEvent, FullProfile, GraphGroup, GraphUser};
use crate::AppState;

use super::auth::AuthSession;
use super::error::ApiError;

lazy_static! {
    static ref GUID_RE: Regex = Regex::new(
        r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$"
    )
    .unwrap();
}

/// Cap on directory listings so one request cannot drain the tenant
const MAX_USER_LIMIT: usize = 2000;

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub count: usize,
}

impl<T> DataResponse<T> {
    pub(crate) fn new(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

impl<T> ListResponse<T> {
    pub(crate) fn new(data: Vec<T>) -> Json<Self> {
        Json(Self {
            success: true,
            count: data.len(),
            data,
        })
    }
}

fn validate_guid(id: &str) -> Result<(), ApiError> {
    if GUID_RE.is_match(&id.to_lowercase()) {
        Ok(())
    } else {
        Err(ApiError::bad_request("Invalid id format"))
    }
}

/// GET /api/entra/user/:user_id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    Path(user_id): Path<String>,
) -> Result<Json<DataResponse<GraphUser>>, ApiError> {
    validate_guid(&user_id)?;
    let user = state.entra.get_user(&user_id).await?;
    Ok(DataResponse::new(user))
}

/// GET /api/entra/user/:user_id/groups
pub async fn get_user_groups(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    Path(user_id): Path<String>,
) -> Result<Json<ListResponse<GraphGroup>>, ApiError> {
    validate_guid(&user_id)?;
    let groups = state.entra.get_user_groups(&user_id).await?;
    Ok(ListResponse::new(groups))
}

/// GET /api/entra/user/:user_id/manager
pub async fn get_user_manager(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    Path(user_id): Path<String>,
) -> Result<Json<DataResponse<Option<GraphUser>>>, ApiError> {
    validate_guid(&user_id)?;
    let manager = state.entra.get_user_manager(&user_id).await?;
    Ok(DataResponse::new(manager))
}

/// GET /api/entra/user/:user_id/direct-reports
pub async fn get_user_direct_reports(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    Path(user_id): Path<String>,
) -> Result<Json<ListResponse<GraphUser>>, ApiError> {
    validate_guid(&user_id)?;
    let reports = state.entra.get_user_direct_reports(&user_id).await?;
    Ok(ListResponse::new(reports))
}

/// GET /api/entra/user/:user_id/profile
pub async fn get_user_profile(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    Path(user_id): Path<String>,
) -> Result<Json<DataResponse<FullProfile>>, ApiError> {
    validate_guid(&user_id)?;
    let profile = state.entra.get_user_full_profile(&user_id).await;
    Ok(DataResponse::new(profile))
}

/// GET /api/entra/group/:group_id
pub async fn get_group(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    Path(group_id): Path<String>,
) -> Result<Json<DataResponse<GraphGroup>>, ApiError> {
    validate_guid(&group_id)?;
    let group = state.entra.get_group(&group_id).await?;
    Ok(DataResponse::new(group))
}

/// GET /api/entra/group/:group_id/members
pub async fn get_group_members(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    Path(group_id): Path<String>,
) -> Result<Json<ListResponse<GraphUser>>, ApiError> {
    validate_guid(&group_id)?;
    let members = state.entra.get_group_members(&group_id).await?;
    Ok(ListResponse::new(members))
}

/// GET /api/entra/groups
pub async fn list_groups(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
) -> Result<Json<ListResponse<GraphGroup>>, ApiError> {
    let groups = state.entra.list_groups().await?;
    Ok(ListResponse::new(groups))
}

#[derive(Debug, Deserialize)]
pub struct ListUsersParams {
    pub limit: Option<usize>,
}

/// GET /api/entra/users?limit=
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    Query(params): Query<ListUsersParams>,
) -> Result<Json<ListResponse<GraphUser>>, ApiError> {
    let limit = params.limit.unwrap_or(50).clamp(1, MAX_USER_LIMIT);
    let users = state.entra.list_users(limit).await?;
    Ok(ListResponse::new(users))
}

#[derive(Debug, Deserialize)]
pub struct SearchUsersParams {
    pub q: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/entra/users/search?q=&limit=
pub async fn search_users(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    Query(params): Query<SearchUsersParams>,
) -> Result<Json<ListResponse<GraphUser>>, ApiError> {
    let query = params.q.as_deref().unwrap_or("").trim().to_string();
    if query.len() < 3 {
        return Err(ApiError::validation_field(
            "q",
            "Search query must be at least 3 characters",
        ));
    }
    let limit = params.limit.unwrap_or(50).clamp(1, MAX_USER_LIMIT);
    let users = state.entra.search_users(&query, limit).await?;
    Ok(ListResponse::new(users))
}

#[derive(Debug, Deserialize)]
pub struct FindUserParams {
    pub email: Option<String>,
}

/// GET /api/entra/search/user?email=
pub async fn find_user_by_email(
    State(state): State<Arc<AppState>>,
    _auth: AuthSession,
    Query(params): Query<FindUserParams>,
) -> Result<Json<DataResponse<Option<GraphUser>>>, ApiError> {
    let email = params
        .email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation_field("email", "Email is required"))?;
    let user = state.entra.find_user_by_email(email).await?;
    Ok(DataResponse::new(user))
}

#[derive(Debug, Deserialize)]
pub struct CalendarParams {
    pub days: Option<i64>,
}

/// GET /api/entra/me/calendar/events?days=
///
/// Reads the signed-in user's calendar with their own delegated token.
pub async fn my_calendar_events(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
    Query(params): Query<CalendarParams>,
) -> Result<Json<ListResponse<CalendarEvent>>, ApiError> {
    let token = auth.session.entra_access_token.as_deref().ok_or_else(|| {
        ApiError::unauthorized(
            "User access token not found. Please re-login to get calendar permissions.",
        )
    })?;

    let days = params.days.unwrap_or(7).clamp(1, 90);
    let events = state.entra.my_calendar_events(token, days).await?;
    Ok(ListResponse::new(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_validation() {
        assert!(validate_guid("00000000-1111-2222-3333-444444444444").is_ok());
        assert!(validate_guid("00000000-1111-2222-3333-44444444444G").is_err());
        assert!(validate_guid("not-a-guid").is_err());
        assert!(validate_guid("").is_err());
        // upper-case GUIDs are accepted
        assert!(validate_guid("AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE").is_ok());
    }
}
