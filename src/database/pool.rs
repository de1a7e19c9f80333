//! Database Connection Pool using sqlx

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::database::grants::GrantRepository;
use crate::karma::KarmaError;

pub struct DatabasePool {
    pool: PgPool,
    table: String,
}

impl DatabasePool {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, KarmaError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL");

        Ok(Self {
            pool,
            table: config.table.clone(),
        })
    }

    /// Create the grant table and hand back its repository
    pub async fn init_schema(&self) -> Result<GrantRepository, KarmaError> {
        info!("Initializing database schema...");
        let grants = self.grants();
        grants.create_table().await?;
        info!("Database schema initialized");
        Ok(grants)
    }

    pub fn grants(&self) -> GrantRepository {
        GrantRepository::new(self.pool.clone(), &self.table)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
