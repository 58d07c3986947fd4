pub mod auth;
pub mod docx;
pub mod entra;
pub mod error;
pub mod hierarchy;
pub mod rate_limit;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

/// Body limit for template uploads (multipart overhead included)
const DOCX_BODY_LIMIT: usize = 25 * 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    // OAuth flow and session endpoints (no session required; stricter limits)
    let auth_routes = Router::new()
        .route("/login", get(auth::login))
        .route("/callback", get(auth::callback))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Graph API passthrough (handlers authenticate via the session extractor)
    let entra_routes = Router::new()
        .route("/user/:user_id", get(entra::get_user))
        .route("/user/:user_id/groups", get(entra::get_user_groups))
        .route("/user/:user_id/manager", get(entra::get_user_manager))
        .route(
            "/user/:user_id/direct-reports",
            get(entra::get_user_direct_reports),
        )
        .route("/user/:user_id/profile", get(entra::get_user_profile))
        .route("/group/:group_id", get(entra::get_group))
        .route("/group/:group_id/members", get(entra::get_group_members))
        .route("/groups", get(entra::list_groups))
        .route("/users", get(entra::list_users))
        .route("/users/search", get(entra::search_users))
        .route("/search/user", get(entra::find_user_by_email))
        .route("/me/calendar/events", get(entra::my_calendar_events));

    let hierarchy_routes = Router::new()
        .route("/users", get(hierarchy::list_users))
        .route("/locations", get(hierarchy::list_locations))
        .route("/departments", get(hierarchy::list_departments))
        .route("/structure", get(hierarchy::get_structure))
        .route("/save", post(hierarchy::save_structure))
        .route(
            "/relationship/:supervisor_id/:subordinate_id",
            delete(hierarchy::delete_relationship),
        )
        .route("/notification-types", get(hierarchy::list_notification_types));

    let docx_routes = Router::new()
        .route("/fill", post(docx::fill))
        .layer(DefaultBodyLimit::max(DOCX_BODY_LIMIT));

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .nest("/entra", entra_routes)
        .nest("/hierarchy", hierarchy_routes)
        .nest("/docx", docx_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let cors = cors_layer(&state);

    Router::new()
        .nest("/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Cookie-credentialed CORS scoped to the SPA origin
fn cors_layer(state: &AppState) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);
    match state.config.client.client_url.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(_) => tracing::warn!(
            "Invalid client_url for CORS origin: {}",
            state.config.client.client_url
        ),
    }
    cors
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
}

/// GET /api/health
async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => "ok",
        Err(_) => "unavailable",
    };
    Json(HealthResponse {
        status: "ok",
        database,
    })
}
