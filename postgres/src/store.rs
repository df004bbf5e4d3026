//! The sqlx-backed durable writer.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flashsale_core::{DurableError, DurableWriter, PurchaseFact, ReservationRecord};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::QueryBuilder;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::batch::Batcher;
use crate::retry::{retry_with_backoff, RetryPolicy};

const RESERVATION_BATCH_SIZE: usize = 100;
const RESERVATION_FLUSH_INTERVAL: Duration = Duration::from_millis(50);
const PURCHASE_BATCH_SIZE: usize = 10;
const PURCHASE_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
struct PurchaseUpdate {
    window_id: i64,
    item_index: i64,
    user_id: i64,
}

/// `PostgreSQL`-backed durable writer with batched, acknowledged appends.
#[derive(Debug, Clone)]
pub struct PgDurableWriter {
    pool: PgPool,
    reservations: Batcher<ReservationRecord>,
    purchases: Batcher<PurchaseUpdate>,
}

impl PgDurableWriter {
    /// Connect a new pool and spawn the batching workers.
    ///
    /// # Errors
    ///
    /// Returns the sqlx error when the pool cannot be established.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Like [`connect`](Self::connect), retrying with backoff while the
    /// store comes up.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error when every attempt fails.
    pub async fn connect_with_retry(
        url: &str,
        max_connections: u32,
        policy: &RetryPolicy,
    ) -> Result<Self, sqlx::Error> {
        let pool = retry_with_backoff(policy, || {
            PgPoolOptions::new()
                .max_connections(max_connections)
                .connect(url)
        })
        .await?;
        Ok(Self::from_pool(pool))
    }

    /// Build a writer over an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        let reservations = {
            let pool = pool.clone();
            Batcher::spawn(
                RESERVATION_BATCH_SIZE,
                RESERVATION_FLUSH_INTERVAL,
                move |records| {
                    let pool = pool.clone();
                    async move { flush_reservations(&pool, records).await }
                },
            )
        };
        let purchases = {
            let pool = pool.clone();
            Batcher::spawn(
                PURCHASE_BATCH_SIZE,
                PURCHASE_FLUSH_INTERVAL,
                move |updates| {
                    let pool = pool.clone();
                    async move { flush_purchases(&pool, updates).await }
                },
            )
        };
        Self {
            pool,
            reservations,
            purchases,
        }
    }

    /// Run the schema migrations. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the migration error when a migration fails to apply.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!().run(&self.pool).await
    }

    /// The underlying connection pool, for health checks.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DurableWriter for PgDurableWriter {
    async fn provision_window(
        &self,
        window_id: i64,
        window_start: DateTime<Utc>,
        item_count: i64,
    ) -> Result<(), DurableError> {
        let result = sqlx::query(
            "INSERT INTO sale_items (window_id, window_start, item_id) \
             SELECT $1, $2, g.n FROM generate_series(0::bigint, $3 - 1) AS g(n) \
             ON CONFLICT (window_id, item_id) DO NOTHING",
        )
        .bind(window_id)
        .bind(window_start)
        .bind(item_count)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        debug!(
            window_id,
            inserted = result.rows_affected(),
            "window provisioned"
        );
        Ok(())
    }

    async fn append_reservation(&self, record: ReservationRecord) -> Result<(), DurableError> {
        self.reservations.submit(record).await
    }

    async fn append_purchase(
        &self,
        window_id: i64,
        item_index: i64,
        user_id: i64,
    ) -> Result<(), DurableError> {
        self.purchases
            .submit(PurchaseUpdate {
                window_id,
                item_index,
                user_id,
            })
            .await
    }

    async fn active_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationRecord>, DurableError> {
        let rows: Vec<ReservationRow> = sqlx::query_as(
            "SELECT user_id, item_id, code, created_at, expires_at \
             FROM reservations WHERE expires_at > $1 ORDER BY created_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.into_iter().map(ReservationRow::into_record).collect())
    }

    async fn window_purchases(&self, window_id: i64) -> Result<Vec<PurchaseFact>, DurableError> {
        let rows: Vec<PurchaseRow> = sqlx::query_as(
            "SELECT item_id, purchased_by FROM sale_items \
             WHERE window_id = $1 AND purchased = TRUE AND purchased_by IS NOT NULL",
        )
        .bind(window_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows
            .into_iter()
            .map(|row| PurchaseFact {
                item_index: row.item_id,
                user_id: row.purchased_by,
            })
            .collect())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DurableError> {
        let result = sqlx::query("DELETE FROM reservations WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    user_id: i64,
    item_id: i64,
    code: Uuid,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl ReservationRow {
    fn into_record(self) -> ReservationRecord {
        ReservationRecord {
            code: self.code,
            user_id: self.user_id,
            item_index: self.item_id,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PurchaseRow {
    item_id: i64,
    purchased_by: i64,
}

async fn flush_reservations(
    pool: &PgPool,
    records: Vec<ReservationRecord>,
) -> Result<(), DurableError> {
    let mut builder = QueryBuilder::new(
        "INSERT INTO reservations (user_id, item_id, code, created_at, expires_at) ",
    );
    builder.push_values(&records, |mut row, record| {
        row.push_bind(record.user_id)
            .push_bind(record.item_index)
            .push_bind(record.code)
            .push_bind(record.created_at)
            .push_bind(record.expires_at);
    });
    builder.build().execute(pool).await.map_err(db_error)?;
    debug!(count = records.len(), "reservation batch flushed");
    Ok(())
}

async fn flush_purchases(pool: &PgPool, updates: Vec<PurchaseUpdate>) -> Result<(), DurableError> {
    let purchased_at = Utc::now();
    let mut builder = QueryBuilder::new(
        "UPDATE sale_items \
         SET purchased = TRUE, purchased_by = updates.user_id, purchased_at = ",
    );
    builder.push_bind(purchased_at);
    builder.push(" FROM (");
    builder.push_values(&updates, |mut row, update| {
        row.push_bind(update.user_id)
            .push_unseparated("::bigint")
            .push_bind(update.window_id)
            .push_unseparated("::bigint")
            .push_bind(update.item_index)
            .push_unseparated("::bigint");
    });
    builder.push(
        ") AS updates(user_id, window_id, item_id) \
         WHERE sale_items.window_id = updates.window_id \
         AND sale_items.item_id = updates.item_id \
         AND sale_items.purchased = FALSE",
    );

    let result = builder.build().execute(pool).await.map_err(db_error)?;
    let affected = result.rows_affected();
    let expected = updates.len() as u64;
    if affected != expected {
        warn!(affected, expected, "purchase batch updated fewer rows than submitted");
        return Err(DurableError::Conflict(format!(
            "expected {expected} purchase updates, {affected} rows matched"
        )));
    }
    debug!(count = updates.len(), "purchase batch flushed");
    Ok(())
}

fn db_error(err: sqlx::Error) -> DurableError {
    DurableError::Unavailable(err.to_string())
}
