pub mod api;
pub mod config;
pub mod crypto;
pub mod db;
pub mod docx;
pub mod entra;

pub use db::DbPool;

use std::sync::Arc;
use std::time::Duration;

use crate::api::rate_limit::RateLimiter;
use crate::config::Config;
use crate::crypto::PkceStore;
use crate::entra::EntraClient;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    /// Shared outbound HTTP client (token endpoint, Graph API)
    pub http: reqwest::Client,
    pub entra: EntraClient,
    pub pkce: Arc<PkceStore>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, http: reqwest::Client) -> Self {
        let entra = EntraClient::new(config.entra.clone(), http.clone());
        let pkce = Arc::new(PkceStore::new(Duration::from_secs(
            config.auth.pkce_ttl_minutes * 60,
        )));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self {
            config,
            db,
            http,
            entra,
            pkce,
            rate_limiter,
        }
    }
}
