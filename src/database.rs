//! Track and vessel storage.
//!
//! Writers talk to storage through [`TrackStore`] and [`TrackBatch`]. A batch
//! is one transaction: rows pushed into it become visible together on
//! [`TrackBatch::commit`], and a batch dropped without committing is rolled
//! back.

use std::future::Future;
use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use tracing::{error, info};

use crate::{
    config::DatabaseConfig,
    errors::ImportError,
    models::{FixupReport, RawRow, TrackPoint, VesselId},
};

pub mod memory;
mod models;

pub use models::{TrackRow, VesselRow};

/// Destination of imported rows, shared by all writer workers.
pub trait TrackStore: Clone + Send + Sync + 'static {
    type Batch: TrackBatch;

    /// Open a new transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Batch, ImportError>> + Send;

    /// Recompute vessel creation times and advance the vessel id generator.
    fn fixup(&self) -> impl Future<Output = FixupReport> + Send;
}

/// One open transaction.
pub trait TrackBatch: Send + 'static {
    /// Insert the row's track and upsert its vessel.
    ///
    /// An error leaves the batch unusable; the caller drops it to roll back.
    fn push(&mut self, row: &RawRow) -> impl Future<Output = Result<(), ImportError>> + Send;

    /// Commit the transaction, returning the number of rows pushed.
    fn commit(self) -> impl Future<Output = Result<u64, ImportError>> + Send;
}

const INSERT_TRACK: &str = "INSERT INTO tracks (vessel_id, time, location)
    VALUES ($1, $2, ST_GeomFromText($3, 4326))";

const UPSERT_VESSEL: &str = "INSERT INTO vessels (id, name) VALUES ($1, $2)
    ON CONFLICT (id) DO NOTHING";

const FIX_VESSEL_CREATED_AT: &str = "UPDATE vessels AS v
    SET created_at = COALESCE(
        (SELECT MIN(t.time) FROM tracks AS t WHERE t.vessel_id = v.id),
        v.created_at
    )";

const RESET_VESSEL_ID_SEQUENCE: &str = "SELECT setval(
        pg_get_serial_sequence('vessels', 'id'),
        COALESCE(MAX(id), 0) + 1,
        false
    ) FROM vessels";

/// Postgres storage for tracks and vessels
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with default pool settings
    pub async fn from_url(url: &str) -> Result<Self, ImportError> {
        Self::connect(&DatabaseConfig {
            url: url.to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        })
        .await
    }

    /// Connect using pool settings from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, ImportError> {
        info!(
            "Connecting to database: max_connections={}, acquire_timeout={:?}",
            config.max_connections, config.acquire_timeout
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| ImportError::DatabaseConnectionError(e.to_string()))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fetch a vessel record
    pub async fn vessel(&self, id: VesselId) -> Result<Option<VesselRow>, ImportError> {
        let row = sqlx::query_as::<_, VesselRow>(
            "SELECT id, name, created_at FROM vessels WHERE id = $1",
        )
        .bind(id.value())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Fetch all tracks of a vessel in time order
    pub async fn tracks(&self, id: VesselId) -> Result<Vec<TrackRow>, ImportError> {
        let rows = sqlx::query_as::<_, TrackRow>(
            "SELECT vessel_id, time, ST_X(location) AS lon, ST_Y(location) AS lat
            FROM tracks WHERE vessel_id = $1 ORDER BY time",
        )
        .bind(id.value())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_tracks(&self) -> Result<i64, ImportError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_vessels(&self) -> Result<i64, ImportError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vessels")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

impl TrackStore for Database {
    type Batch = PgBatch;

    async fn begin(&self) -> Result<PgBatch, ImportError> {
        let tx = self.pool.begin().await?;
        Ok(PgBatch { tx, rows: 0 })
    }

    async fn fixup(&self) -> FixupReport {
        let mut report = FixupReport::default();

        match sqlx::query(FIX_VESSEL_CREATED_AT).execute(&self.pool).await {
            Ok(result) => {
                info!("Recomputed created_at for {} vessels", result.rows_affected());
                report.vessels_updated = Some(result.rows_affected());
            }
            Err(e) => {
                error!("Failed to recompute vessel created_at: {}", e);
                report.failures.push(format!("vessel created_at: {}", e));
            }
        }

        match sqlx::query_scalar::<_, i64>(RESET_VESSEL_ID_SEQUENCE)
            .fetch_one(&self.pool)
            .await
        {
            Ok(next) => {
                info!("Vessel id sequence reset, next id {}", next);
                report.next_vessel_id = Some(next);
            }
            Err(e) => {
                error!("Failed to reset vessel id sequence: {}", e);
                report.failures.push(format!("vessel id sequence: {}", e));
            }
        }

        report
    }
}

/// An open Postgres transaction
pub struct PgBatch {
    tx: Transaction<'static, Postgres>,
    rows: u64,
}

impl TrackBatch for PgBatch {
    async fn push(&mut self, row: &RawRow) -> Result<(), ImportError> {
        let point = TrackPoint::try_from(row)?;

        sqlx::query(INSERT_TRACK)
            .bind(point.vessel_id.value())
            .bind(point.time)
            .bind(point.wkt())
            .execute(&mut *self.tx)
            .await?;

        sqlx::query(UPSERT_VESSEL)
            .bind(point.vessel_id.value())
            .bind(&point.vessel_name)
            .execute(&mut *self.tx)
            .await?;

        self.rows += 1;
        Ok(())
    }

    async fn commit(self) -> Result<u64, ImportError> {
        self.tx.commit().await?;
        Ok(self.rows)
    }
}
