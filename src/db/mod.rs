mod models;

pub use models::*;

use anyhow::Result;
use sqlx::{mysql::MySqlPoolOptions, MySqlPool};
use tracing::info;

use crate::config::DatabaseConfig;

pub type DbPool = MySqlPool;

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &MySqlPool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(config: &DatabaseConfig) -> Result<DbPool> {
    info!("Connecting to MySQL");

    let pool = MySqlPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

async fn run_migrations(pool: &MySqlPool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: users, sessions, auth log
    execute_sql(pool, include_str!("../../migrations/001_users.sql")).await?;

    // Migration 002: reference tables and hierarchy
    execute_sql(pool, include_str!("../../migrations/002_hierarchy.sql")).await?;

    info!("Migrations completed");
    Ok(())
}
