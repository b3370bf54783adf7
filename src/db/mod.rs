pub mod billing;
pub mod models;
pub mod repository;

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::utils::error::LedgerpayError;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, LedgerpayError> {
    info!("Connecting to database: {}", mask_password(database_url));

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
    info!("Database connection verified: {}", row.0);

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), LedgerpayError> {
    info!("Running database migrations...");

    sqlx::migrate!("src/db/migrations")
        .run(pool)
        .await
        .map_err(|e| LedgerpayError::Database(e.into()))?;

    info!("Database migrations completed");
    Ok(())
}

pub fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // "postgres://host@..." has the scheme colon before '@' and no password
            if url[colon_pos..].starts_with("://") {
                return url.to_string();
            }
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "****");
            return masked;
        }
    }
    url.to_string()
}

pub async fn health_check(pool: &PgPool) -> Result<(), LedgerpayError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::mask_password;

    #[test]
    fn masks_only_the_password() {
        assert_eq!(
            mask_password("postgres://ledger:s3cret@db:5432/ledgerpay"),
            "postgres://ledger:****@db:5432/ledgerpay"
        );
        assert_eq!(
            mask_password("postgres://ledger@db/ledgerpay"),
            "postgres://ledger@db/ledgerpay"
        );
        assert_eq!(mask_password("postgres://db/ledgerpay"), "postgres://db/ledgerpay");
    }
}
