//! PostgreSQL storage backend
//!
//! Persistent storage for multi-instance deployments. Enabled with the
//! `postgres` feature and selected by `AGETOKEN_DATABASE_URL`.
//!
//! Tables are created on connect if missing. Rows are only ever inserted;
//! the generation row is only ever raised.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::{error, info};

use agetoken_core::{DeviceBinding, TokenHash};

use super::{DeviceRevocation, IssuanceRecord, RevocationRecord, RevocationStore, StorageError};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS revoked_tokens (
        id BIGSERIAL,
        token_hash BYTEA PRIMARY KEY,
        revoked_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        reason VARCHAR(512) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS revoked_devices (
        device_id CHAR(64) PRIMARY KEY,
        revoked_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        reason VARCHAR(512) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mint_generation (
        id SMALLINT PRIMARY KEY CHECK (id = 1),
        generation BIGINT NOT NULL,
        reason VARCHAR(512) NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS issued_tokens (
        token_hash BYTEA PRIMARY KEY,
        device_id CHAR(64) NOT NULL,
        jti VARCHAR(64) NOT NULL,
        generation BIGINT NOT NULL,
        issued_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_issued_tokens_device ON issued_tokens(device_id)",
];

/// PostgreSQL revocation store
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

fn token_hash_from_row(bytes: Vec<u8>) -> Result<TokenHash, StorageError> {
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| StorageError::Serialization("token_hash must be 32 bytes".into()))?;
    Ok(TokenHash::from_bytes(bytes))
}

fn device_from_row(value: String) -> Result<DeviceBinding, StorageError> {
    DeviceBinding::from_hex(&value).map_err(|e| StorageError::Serialization(e.to_string()))
}

impl PostgresStore {
    /// Connect and run migrations
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!("Connected to PostgreSQL database");

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        info!("Database migrations complete");
        Ok(())
    }
}

#[async_trait]
impl RevocationStore for PostgresStore {
    async fn revoke(&self, record: RevocationRecord) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO revoked_tokens (token_hash, revoked_at, reason)
            VALUES ($1, $2, $3)
            ON CONFLICT (token_hash) DO NOTHING
            "#,
        )
        .bind(record.token_hash.as_bytes().as_slice())
        .bind(record.revoked_at)
        .bind(&record.reason)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(token_hash = %record.token_hash, error = %e, "Failed to record revocation");
            db_err(e)
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_revocation(&self, token_hash: &TokenHash) -> Result<Option<RevocationRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT token_hash, revoked_at, reason FROM revoked_tokens WHERE token_hash = $1",
        )
        .bind(token_hash.as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| {
            Ok(RevocationRecord {
                token_hash: token_hash_from_row(r.get("token_hash"))?,
                revoked_at: r.get("revoked_at"),
                reason: r.get("reason"),
            })
        })
        .transpose()
    }

    async fn list_revocations(&self) -> Result<Vec<RevocationRecord>, StorageError> {
        let rows = sqlx::query("SELECT token_hash, revoked_at, reason FROM revoked_tokens ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter()
            .map(|r| {
                Ok(RevocationRecord {
                    token_hash: token_hash_from_row(r.get("token_hash"))?,
                    revoked_at: r.get("revoked_at"),
                    reason: r.get("reason"),
                })
            })
            .collect()
    }

    async fn revoke_device(&self, record: DeviceRevocation) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO revoked_devices (device_id, revoked_at, reason)
            VALUES ($1, $2, $3)
            ON CONFLICT (device_id) DO NOTHING
            "#,
        )
        .bind(record.device_id.as_str())
        .bind(record.revoked_at)
        .bind(&record.reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_device_revoked(&self, device_id: &DeviceBinding) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 AS found FROM revoked_devices WHERE device_id = $1")
            .bind(device_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn list_device_revocations(&self) -> Result<Vec<DeviceRevocation>, StorageError> {
        let rows = sqlx::query("SELECT device_id, revoked_at, reason FROM revoked_devices")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter()
            .map(|r| {
                Ok(DeviceRevocation {
                    device_id: device_from_row(r.get("device_id"))?,
                    revoked_at: r.get("revoked_at"),
                    reason: r.get("reason"),
                })
            })
            .collect()
    }

    async fn load_generation(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT generation FROM mint_generation WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| r.get::<i64, _>("generation") as u64).unwrap_or(0))
    }

    async fn store_generation(&self, generation: u64, reason: &str) -> Result<(), StorageError> {
        let generation = i64::try_from(generation)
            .map_err(|_| StorageError::Serialization("generation exceeds i64".into()))?;
        sqlx::query(
            r#"
            INSERT INTO mint_generation (id, generation, reason, updated_at)
            VALUES (1, $1, $2, NOW())
            ON CONFLICT (id) DO UPDATE SET
                generation = GREATEST(mint_generation.generation, EXCLUDED.generation),
                reason = EXCLUDED.reason,
                updated_at = NOW()
            "#,
        )
        .bind(generation)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn record_issuance(&self, record: IssuanceRecord) -> Result<(), StorageError> {
        let generation = i64::try_from(record.generation)
            .map_err(|_| StorageError::Serialization("generation exceeds i64".into()))?;
        sqlx::query(
            r#"
            INSERT INTO issued_tokens (token_hash, device_id, jti, generation, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (token_hash) DO NOTHING
            "#,
        )
        .bind(record.token_hash.as_bytes().as_slice())
        .bind(record.device_id.as_str())
        .bind(&record.jti)
        .bind(generation)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_issuances(&self, device_id: &DeviceBinding) -> Result<Vec<IssuanceRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT token_hash, device_id, jti, generation, issued_at, expires_at
            FROM issued_tokens
            WHERE device_id = $1
            ORDER BY issued_at
            "#,
        )
        .bind(device_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|r| {
                Ok(IssuanceRecord {
                    token_hash: token_hash_from_row(r.get("token_hash"))?,
                    device_id: device_from_row(r.get("device_id"))?,
                    jti: r.get("jti"),
                    generation: r.get::<i64, _>("generation") as u64,
                    issued_at: r.get::<DateTime<Utc>, _>("issued_at"),
                    expires_at: r.get::<DateTime<Utc>, _>("expires_at"),
                })
            })
            .collect()
    }
}
