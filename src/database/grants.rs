//! Grant Repository - PostgreSQL storage for karma grants using sqlx

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::karma::{GrantLedger, KarmaError, KarmaGrant};

/// SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

pub struct GrantRepository {
    pool: PgPool,
    table: String,
}

impl GrantRepository {
    /// `table` must already be a validated plain identifier
    pub fn new(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn create_table(&self) -> Result<(), KarmaError> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                granter TEXT NOT NULL,
                granted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (id, name, granter)
            )
            "#,
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_name_idx ON {table} (name)",
            table = self.table
        );
        sqlx::query(&index).execute(&self.pool).await?;

        info!(table = %self.table, "Grant table ready");
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err
        && db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
    {
        return true;
    }
    false
}

#[async_trait]
impl GrantLedger for GrantRepository {
    async fn record_grant(&self, grant: &KarmaGrant) -> Result<(), KarmaError> {
        let sql = format!(
            "INSERT INTO {} (id, name, granter, granted_at) VALUES ($1, $2, $3, $4)",
            self.table
        );

        let result = sqlx::query(&sql)
            .bind(&grant.submission_id)
            .bind(&grant.recipient)
            .bind(&grant.granter)
            .bind(grant.granted_at)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                debug!(
                    submission = %grant.submission_id,
                    recipient = %grant.recipient,
                    granter = %grant.granter,
                    "Grant stored"
                );
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(grant.already_awarded()),
            Err(e) => Err(KarmaError::Database(e)),
        }
    }

    async fn karma_for(&self, recipient: &str) -> Result<i64, KarmaError> {
        let sql = format!("SELECT COUNT(*) AS karma FROM {} WHERE name = $1", self.table);
        let row = sqlx::query(&sql)
            .bind(recipient)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("karma")?)
    }

    async fn close(&self) {
        self.pool.close().await;
        info!(table = %self.table, "Grant ledger closed");
    }
}
