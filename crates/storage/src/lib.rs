use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, Row, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use domain_verify_core::{DomainClaim, DomainClaimStore, StoreError, VerificationEvent};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle to the domain claim repository.
    pub fn claims(&self) -> ClaimRepository {
        ClaimRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to the audit event repository.
    pub fn audit(&self) -> AuditRepository {
        AuditRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Column list SQLite reports when `idx_domain_claims_organization_domain` is violated.
const ORGANIZATION_DOMAIN_COLUMNS: &str = "domain_claims.organization_id, domain_claims.domain_name";

const CLAIM_COLUMNS: &str = "id, organization_id, domain_name, token, verified_at, \
     last_checked_at, attempt_count, created_at, revision";

/// Repository responsible for the `domain_claims` table.
#[derive(Clone)]
pub struct ClaimRepository {
    pool: SqlitePool,
}

impl ClaimRepository {
    async fn fetch_revision(&self, id: Uuid) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT revision FROM domain_claims WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(|row| row.get("revision")))
    }
}

#[async_trait]
impl DomainClaimStore for ClaimRepository {
    async fn insert(&self, claim: &DomainClaim) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO domain_claims \
             (id, organization_id, domain_name, token, verified_at, last_checked_at, attempt_count, created_at, revision) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(claim.id.to_string())
        .bind(claim.organization_id.to_string())
        .bind(&claim.domain_name)
        .bind(&claim.token)
        .bind(claim.verified_at.map(to_rfc3339))
        .bind(claim.last_checked_at.map(to_rfc3339))
        .bind(i64::from(claim.attempt_count))
        .bind(to_rfc3339(claim.created_at))
        .bind(claim.revision as i64)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("2067") if db_err.message().contains(ORGANIZATION_DOMAIN_COLUMNS) => {
                    StoreError::DuplicateClaim
                }
                Some("2067") if claim.is_verified() => StoreError::DomainTaken,
                Some("1555") | Some("2067") => StoreError::DuplicateId,
                _ => backend(sqlx::Error::Database(db_err)),
            },
            other => backend(other),
        })?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<DomainClaim, StoreError> {
        let row = sqlx::query_as::<_, ClaimRow>(&format!(
            "SELECT {CLAIM_COLUMNS} FROM domain_claims WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?;

        row.into_domain()
    }

    async fn get_verified_claims_by_domain(
        &self,
        domain_name: &str,
    ) -> Result<Vec<DomainClaim>, StoreError> {
        let rows = sqlx::query_as::<_, ClaimRow>(&format!(
            "SELECT {CLAIM_COLUMNS} FROM domain_claims \
             WHERE domain_name = ? AND verified_at IS NOT NULL"
        ))
        .bind(domain_name)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(ClaimRow::into_domain).collect()
    }

    async fn list_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<DomainClaim>, StoreError> {
        let rows = sqlx::query_as::<_, ClaimRow>(&format!(
            "SELECT {CLAIM_COLUMNS} FROM domain_claims \
             WHERE organization_id = ? ORDER BY created_at ASC, domain_name ASC"
        ))
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(ClaimRow::into_domain).collect()
    }

    async fn list_pending(
        &self,
        max_attempts: u32,
        limit: u32,
    ) -> Result<Vec<DomainClaim>, StoreError> {
        let rows = sqlx::query_as::<_, ClaimRow>(&format!(
            "SELECT {CLAIM_COLUMNS} FROM domain_claims \
             WHERE verified_at IS NULL AND attempt_count < ? \
               AND NOT EXISTS ( \
                    SELECT 1 FROM domain_claims AS other \
                     WHERE other.domain_name = domain_claims.domain_name \
                       AND other.verified_at IS NOT NULL \
                       AND other.organization_id <> domain_claims.organization_id) \
             ORDER BY last_checked_at ASC, created_at ASC \
             LIMIT ?"
        ))
        .bind(i64::from(max_attempts))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(ClaimRow::into_domain).collect()
    }

    async fn replace(&self, claim: &DomainClaim) -> Result<DomainClaim, StoreError> {
        // Single statement: the revision check, the verified-domain check and the
        // write commit atomically under SQLite's writer lock.
        let result = sqlx::query(
            "UPDATE domain_claims \
             SET verified_at = ?1, \
                 last_checked_at = ?2, \
                 attempt_count = ?3, \
                 revision = revision + 1 \
             WHERE id = ?4 \
               AND revision = ?5 \
               AND (?1 IS NULL OR NOT EXISTS ( \
                    SELECT 1 FROM domain_claims AS other \
                     WHERE other.domain_name = domain_claims.domain_name \
                       AND other.verified_at IS NOT NULL \
                       AND other.id <> domain_claims.id))",
        )
        .bind(claim.verified_at.map(to_rfc3339))
        .bind(claim.last_checked_at.map(to_rfc3339))
        .bind(i64::from(claim.attempt_count))
        .bind(claim.id.to_string())
        .bind(claim.revision as i64)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("2067") => {
                StoreError::DomainTaken
            }
            other => backend(other),
        })?;

        if result.rows_affected() == 0 {
            return Err(match self.fetch_revision(claim.id).await? {
                None => StoreError::NotFound,
                Some(current) if current != claim.revision as i64 => StoreError::Stale,
                Some(_) => StoreError::DomainTaken,
            });
        }

        let mut stored = claim.clone();
        stored.revision += 1;
        Ok(stored)
    }
}

/// Raw `domain_claims` row.
#[derive(Debug, sqlx::FromRow)]
struct ClaimRow {
    id: String,
    organization_id: String,
    domain_name: String,
    token: String,
    verified_at: Option<DateTime<Utc>>,
    last_checked_at: Option<DateTime<Utc>>,
    attempt_count: i64,
    created_at: DateTime<Utc>,
    revision: i64,
}

impl ClaimRow {
    fn into_domain(self) -> Result<DomainClaim, StoreError> {
        Ok(DomainClaim {
            id: parse_uuid(&self.id)?,
            organization_id: parse_uuid(&self.organization_id)?,
            domain_name: self.domain_name,
            token: self.token,
            verified_at: self.verified_at,
            last_checked_at: self.last_checked_at,
            attempt_count: u32::try_from(self.attempt_count)
                .map_err(|err| StoreError::Backend(Box::new(err)))?,
            created_at: self.created_at,
            revision: u64::try_from(self.revision)
                .map_err(|err| StoreError::Backend(Box::new(err)))?,
        })
    }
}

/// Repository for the append-only `audit_events` table.
#[derive(Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    /// Appends an audit record for a verification attempt.
    pub async fn append(&self, record: &NewAuditEvent<'_>) -> Result<(), AuditError> {
        sqlx::query(
            "INSERT INTO audit_events \
             (id, claim_id, organization_id, domain_name, kind, occurred_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(record.claim.id.to_string())
        .bind(record.claim.organization_id.to_string())
        .bind(&record.claim.domain_name)
        .bind(record.event.as_str())
        .bind(to_rfc3339(record.occurred_at))
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("787") => {
                AuditError::MissingClaim
            }
            other => AuditError::Database(other),
        })?;

        Ok(())
    }

    /// Lists the audit trail of a claim, oldest first.
    pub async fn list_for_claim(&self, claim_id: Uuid) -> Result<Vec<AuditEventRow>, AuditError> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            "SELECT id, claim_id, organization_id, domain_name, kind, occurred_at \
             FROM audit_events WHERE claim_id = ? ORDER BY occurred_at ASC, id ASC",
        )
        .bind(claim_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Data required to append an audit record.
pub struct NewAuditEvent<'a> {
    pub id: &'a str,
    pub claim: &'a DomainClaim,
    pub event: VerificationEvent,
    pub occurred_at: DateTime<Utc>,
}

/// Audit row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditEventRow {
    pub id: String,
    pub claim_id: String,
    pub organization_id: String,
    pub domain_name: String,
    pub kind: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit event references an unknown claim")]
    MissingClaim,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(Box::new(err))
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|err| StoreError::Backend(Box::new(err)))
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
