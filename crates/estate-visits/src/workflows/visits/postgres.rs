//! PostgreSQL implementation of the visit and availability stores.
//!
//! Write-intent locking is two-layered. An operation first takes
//! transaction-scoped advisory locks on every owner key it will read (user,
//! agent or property), sorted by [`LockKey`], which also covers rows that do
//! not exist yet. Only then do the owner-scoped reads select matching rows
//! `FOR UPDATE`. No transaction waits for an advisory key while holding a row
//! lock on a confirmed visit, and both layers are released when the
//! transaction ends. Each read re-takes its own key, which returns at once
//! when the key is already held.
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE visits (
//!     id UUID PRIMARY KEY,
//!     property_id UUID NOT NULL,
//!     user_id UUID NOT NULL,
//!     agent_id UUID NOT NULL,
//!     start_time TIMESTAMPTZ NOT NULL,
//!     end_time TIMESTAMPTZ NOT NULL,
//!     status TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     CHECK (end_time > start_time)
//! );
//!
//! CREATE TABLE agent_availability_slots (
//!     id UUID PRIMARY KEY,
//!     agent_id UUID NOT NULL,
//!     start_time TIMESTAMPTZ NOT NULL,
//!     end_time TIMESTAMPTZ NOT NULL,
//!     CHECK (end_time > start_time)
//! );
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::domain::{
    AgentId, AvailabilitySlot, PropertyId, SlotId, TimeWindow, UserId, Visit, VisitId, VisitStatus,
};
use super::repository::{
    saturating_count, AvailabilityStore, LockKey, RepositoryError, VisitStore, VisitTransaction,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS visits (
        id UUID PRIMARY KEY,
        property_id UUID NOT NULL,
        user_id UUID NOT NULL,
        agent_id UUID NOT NULL,
        start_time TIMESTAMPTZ NOT NULL,
        end_time TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('PENDING', 'CONFIRMED', 'REJECTED', 'CANCELLED', 'COMPLETED')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CHECK (end_time > start_time)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_visits_user_window ON visits (user_id, status, start_time)",
    "CREATE INDEX IF NOT EXISTS idx_visits_agent_window ON visits (agent_id, status, start_time)",
    "CREATE INDEX IF NOT EXISTS idx_visits_property_window ON visits (property_id, status, start_time)",
    r#"
    CREATE TABLE IF NOT EXISTS agent_availability_slots (
        id UUID PRIMARY KEY,
        agent_id UUID NOT NULL,
        start_time TIMESTAMPTZ NOT NULL,
        end_time TIMESTAMPTZ NOT NULL,
        CHECK (end_time > start_time)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_slots_agent_window ON agent_availability_slots (agent_id, start_time)",
];

const VISIT_COLUMNS: &str =
    "id, property_id, user_id, agent_id, start_time, end_time, status, created_at, updated_at";

/// Connection settings for [`connect`].
#[derive(Debug, Clone)]
pub struct PgSettings {
    pub url: String,
    pub max_connections: u32,
    pub lock_timeout: Duration,
}

pub async fn connect(settings: &PgSettings) -> Result<PgPool, RepositoryError> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.url)
        .await
        .map_err(map_sqlx)
}

/// Create tables and indexes when missing.
pub async fn migrate(pool: &PgPool) -> Result<(), RepositoryError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(map_sqlx)?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct PgVisitStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgVisitStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn select_where(&self, column: &str, value: Uuid) -> Result<Vec<Visit>, RepositoryError> {
        let sql = format!(
            "SELECT {VISIT_COLUMNS} FROM visits WHERE {column} = $1 ORDER BY start_time, id"
        );
        let rows = sqlx::query(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(visit_from_row).collect()
    }
}

#[async_trait]
impl VisitStore for PgVisitStore {
    type Tx = PgVisitTransaction;

    async fn begin(&self) -> Result<Self::Tx, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        Ok(PgVisitTransaction { tx })
    }

    async fn fetch(&self, id: VisitId) -> Result<Option<Visit>, RepositoryError> {
        let sql = format!("SELECT {VISIT_COLUMNS} FROM visits WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(visit_from_row).transpose()
    }

    async fn for_user(&self, user_id: UserId) -> Result<Vec<Visit>, RepositoryError> {
        self.select_where("user_id", user_id.0).await
    }

    async fn for_agent(&self, agent_id: AgentId) -> Result<Vec<Visit>, RepositoryError> {
        self.select_where("agent_id", agent_id.0).await
    }

    async fn for_property(&self, property_id: PropertyId) -> Result<Vec<Visit>, RepositoryError> {
        self.select_where("property_id", property_id.0).await
    }
}

pub struct PgVisitTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgVisitTransaction {
    /// Blocks until no other transaction holds `key`; released at commit/rollback.
    async fn lock_key(&mut self, scope: &str, id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("visits:{scope}:{id}"))
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn overlapping_for(
        &mut self,
        column: &str,
        owner: Uuid,
        status: VisitStatus,
        window: TimeWindow,
        exclude: Option<VisitId>,
    ) -> Result<Vec<Visit>, RepositoryError> {
        let sql = format!(
            "SELECT {VISIT_COLUMNS} FROM visits \
             WHERE {column} = $1 AND status = $2 AND start_time < $4 AND $3 < end_time \
               AND ($5::uuid IS NULL OR id <> $5) \
             ORDER BY start_time, id FOR UPDATE"
        );
        let rows = sqlx::query(&sql)
            .bind(owner)
            .bind(status.label())
            .bind(window.start)
            .bind(window.end)
            .bind(exclude.map(|id| id.0))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(visit_from_row).collect()
    }
}

#[async_trait]
impl VisitTransaction for PgVisitTransaction {
    async fn lock_keys(&mut self, keys: &[LockKey]) -> Result<(), RepositoryError> {
        let ordered: BTreeSet<LockKey> = keys.iter().copied().collect();
        for key in ordered {
            self.lock_key(key.scope(), key.id()).await?;
        }
        Ok(())
    }

    async fn overlapping_for_user(
        &mut self,
        user_id: UserId,
        status: VisitStatus,
        window: TimeWindow,
        exclude: Option<VisitId>,
    ) -> Result<Vec<Visit>, RepositoryError> {
        self.lock_key("user", user_id.0).await?;
        self.overlapping_for("user_id", user_id.0, status, window, exclude)
            .await
    }

    async fn overlapping_for_agent(
        &mut self,
        agent_id: AgentId,
        status: VisitStatus,
        window: TimeWindow,
    ) -> Result<Vec<Visit>, RepositoryError> {
        self.lock_key("agent", agent_id.0).await?;
        self.overlapping_for("agent_id", agent_id.0, status, window, None)
            .await
    }

    async fn count_confirmed_for_property(
        &mut self,
        property_id: PropertyId,
        window: TimeWindow,
        exclude: VisitId,
    ) -> Result<u32, RepositoryError> {
        self.lock_key("property", property_id.0).await?;
        // FOR UPDATE cannot be combined with aggregates; lock the rows and count them here.
        let rows = sqlx::query(
            "SELECT id FROM visits \
             WHERE property_id = $1 AND status = 'CONFIRMED' AND id <> $2 \
               AND start_time < $4 AND $3 < end_time \
             FOR UPDATE",
        )
        .bind(property_id.0)
        .bind(exclude.0)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(saturating_count(rows.len()))
    }

    async fn count_distinct_other_properties_for_agent(
        &mut self,
        agent_id: AgentId,
        property_id: PropertyId,
        window: TimeWindow,
    ) -> Result<u32, RepositoryError> {
        self.lock_key("agent", agent_id.0).await?;
        let rows = sqlx::query(
            "SELECT property_id FROM visits \
             WHERE agent_id = $1 AND property_id <> $2 AND status = 'CONFIRMED' \
               AND start_time < $4 AND $3 < end_time \
             FOR UPDATE",
        )
        .bind(agent_id.0)
        .bind(property_id.0)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        let mut properties = BTreeSet::new();
        for row in &rows {
            let id: Uuid = row.try_get("property_id").map_err(map_sqlx)?;
            properties.insert(id);
        }
        Ok(saturating_count(properties.len()))
    }

    async fn lock_visit(&mut self, id: VisitId) -> Result<Option<Visit>, RepositoryError> {
        let sql = format!("SELECT {VISIT_COLUMNS} FROM visits WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(visit_from_row).transpose()
    }

    async fn insert_visit(&mut self, visit: &Visit) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO visits \
             (id, property_id, user_id, agent_id, start_time, end_time, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(visit.id.0)
        .bind(visit.property_id.0)
        .bind(visit.user_id.0)
        .bind(visit.agent_id.0)
        .bind(visit.start_time)
        .bind(visit.end_time)
        .bind(visit.status.label())
        .bind(visit.created_at)
        .bind(visit.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_visit(&mut self, visit: &Visit) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE visits SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(visit.id.0)
            .bind(visit.status.label())
            .bind(visit.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), RepositoryError> {
        self.tx.commit().await.map_err(map_sqlx)
    }

    async fn rollback(self) -> Result<(), RepositoryError> {
        self.tx.rollback().await.map_err(map_sqlx)
    }
}

#[derive(Clone)]
pub struct PgAvailabilityStore {
    pool: PgPool,
}

impl PgAvailabilityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AvailabilityStore for PgAvailabilityStore {
    async fn covering_slot(
        &self,
        agent_id: AgentId,
        window: TimeWindow,
    ) -> Result<Option<AvailabilitySlot>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, agent_id, start_time, end_time FROM agent_availability_slots \
             WHERE agent_id = $1 AND start_time <= $2 AND end_time >= $3 \
             ORDER BY start_time LIMIT 1",
        )
        .bind(agent_id.0)
        .bind(window.start)
        .bind(window.end)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.as_ref().map(slot_from_row).transpose()
    }

    async fn overlapping_slots(
        &self,
        agent_id: AgentId,
        window: TimeWindow,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, agent_id, start_time, end_time FROM agent_availability_slots \
             WHERE agent_id = $1 AND start_time < $3 AND $2 < end_time \
             ORDER BY start_time",
        )
        .bind(agent_id.0)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(slot_from_row).collect()
    }

    async fn insert_slot(&self, slot: &AvailabilitySlot) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO agent_availability_slots (id, agent_id, start_time, end_time) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(slot.id.0)
        .bind(slot.agent_id.0)
        .bind(slot.start_time)
        .bind(slot.end_time)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn delete_slot(&self, id: SlotId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM agent_availability_slots WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn slots_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, agent_id, start_time, end_time FROM agent_availability_slots \
             WHERE agent_id = $1 ORDER BY start_time",
        )
        .bind(agent_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(slot_from_row).collect()
    }
}

fn visit_from_row(row: &PgRow) -> Result<Visit, RepositoryError> {
    let status: String = row.try_get("status").map_err(map_sqlx)?;
    let status = status
        .parse::<VisitStatus>()
        .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
    Ok(Visit {
        id: VisitId(row.try_get("id").map_err(map_sqlx)?),
        property_id: PropertyId(row.try_get("property_id").map_err(map_sqlx)?),
        user_id: UserId(row.try_get("user_id").map_err(map_sqlx)?),
        agent_id: AgentId(row.try_get("agent_id").map_err(map_sqlx)?),
        start_time: row.try_get::<DateTime<Utc>, _>("start_time").map_err(map_sqlx)?,
        end_time: row.try_get::<DateTime<Utc>, _>("end_time").map_err(map_sqlx)?,
        status,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(map_sqlx)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(map_sqlx)?,
    })
}

fn slot_from_row(row: &PgRow) -> Result<AvailabilitySlot, RepositoryError> {
    Ok(AvailabilitySlot {
        id: SlotId(row.try_get("id").map_err(map_sqlx)?),
        agent_id: AgentId(row.try_get("agent_id").map_err(map_sqlx)?),
        start_time: row.try_get::<DateTime<Utc>, _>("start_time").map_err(map_sqlx)?,
        end_time: row.try_get::<DateTime<Utc>, _>("end_time").map_err(map_sqlx)?,
    })
}

// SQLSTATE codes surfaced as transient lock failures.
const LOCK_NOT_AVAILABLE: &str = "55P03";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

fn map_sqlx(err: sqlx::Error) -> RepositoryError {
    if let Some(code) = err.as_database_error().and_then(|db| db.code()) {
        match code.as_ref() {
            LOCK_NOT_AVAILABLE | DEADLOCK_DETECTED => return RepositoryError::LockTimeout,
            UNIQUE_VIOLATION => return RepositoryError::Conflict,
            _ => {}
        }
    }
    match err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::PoolTimedOut => RepositoryError::Unavailable("connection pool exhausted".into()),
        other => RepositoryError::Unavailable(other.to_string()),
    }
}
