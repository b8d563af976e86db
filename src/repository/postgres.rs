use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::order::{NewOrder, Order, OrderStatus};

use super::{order_from_row, OrderContent, OrderPatch, OrderRepository, OrderRow, ReadyFilter};

// ============================================================================
// Relational Adapter - Postgres (sqlx)
// ============================================================================
//
// Every operation that changes `lock_token` or `status` is a single
// parameterized `UPDATE ... WHERE <precondition>` statement whose affected
// row count is inspected: 0 rows is contention, 1 row is success. The
// precondition is evaluated by the database inside the statement, so the
// check and the write are indivisible.
//
// The post-update row is re-fetched only after a successful conditional
// write, never speculatively.
//
// ============================================================================

const SELECT_COLUMNS: &str = "id, status, lock_token, service_type, fulfillment_status, \
     fulfillment_date, fulfillment_time, fulfillment_details, content, created_at, updated_at";

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    /// Connect and run the embedded migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("order schema migration failed")?;

        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one(&self, id: Uuid) -> Result<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(order_from_row).transpose()
    }

    fn rows_to_orders(rows: Vec<OrderRow>) -> Result<Vec<Order>> {
        rows.into_iter().map(order_from_row).collect()
    }

    async fn insert(&self, order: &Order) -> Result<()> {
        let content = serde_json::to_string(&OrderContent::of(order))?;
        let details = serde_json::to_string(&order.fulfillment.details)?;

        sqlx::query(
            "INSERT INTO orders (id, status, lock_token, service_type, fulfillment_status, \
             fulfillment_date, fulfillment_time, fulfillment_details, content, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.lock.as_deref())
        .bind(order.fulfillment.service_type.as_str())
        .bind(order.fulfillment.status.as_str())
        .bind(order.fulfillment.selected_date)
        .bind(order.fulfillment.selected_time)
        .bind(details)
        .bind(content)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        self.fetch_one(id).await
    }

    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM orders WHERE status = $1"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_orders(rows)
    }

    async fn find_by_fulfillment_date(&self, date: NaiveDate) -> Result<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM orders WHERE fulfillment_date = $1"
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_orders(rows)
    }

    async fn find_by_created_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM orders WHERE created_at >= $1 AND created_at < $2"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_orders(rows)
    }

    async fn find_by_lock(&self, token: &str) -> Result<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM orders WHERE lock_token = $1"
        ))
        .bind(token)
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_orders(rows)
    }

    async fn create(&self, new: NewOrder) -> Result<Order> {
        let order = new.into_order(Uuid::new_v4(), Utc::now());
        self.insert(&order).await?;
        Ok(order)
    }

    async fn bulk_create(&self, new: Vec<NewOrder>) -> Result<Vec<Order>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(new.len());
        for n in new {
            let order = n.into_order(Uuid::new_v4(), now);
            let content = serde_json::to_string(&OrderContent::of(&order))?;
            let details = serde_json::to_string(&order.fulfillment.details)?;
            sqlx::query(
                "INSERT INTO orders (id, status, lock_token, service_type, fulfillment_status, \
                 fulfillment_date, fulfillment_time, fulfillment_details, content, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(order.id)
            .bind(order.status.as_str())
            .bind(order.lock.as_deref())
            .bind(order.fulfillment.service_type.as_str())
            .bind(order.fulfillment.status.as_str())
            .bind(order.fulfillment.selected_date)
            .bind(order.fulfillment.selected_time)
            .bind(details)
            .bind(content)
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&mut *tx)
            .await?;
            created.push(order);
        }
        tx.commit().await?;
        tracing::info!(count = created.len(), "Bulk-created ingested orders");
        Ok(created)
    }

    async fn try_acquire_lock(&self, id: Uuid, token: &str) -> Result<Option<Order>> {
        let affected = sqlx::query(
            "UPDATE orders SET lock_token = $1, updated_at = now() \
             WHERE id = $2 AND lock_token IS NULL",
        )
        .bind(token)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 1 {
            self.fetch_one(id).await
        } else {
            Ok(None)
        }
    }

    async fn acquire_lock(
        &self,
        id: Uuid,
        expected_status: OrderStatus,
        token: &str,
    ) -> Result<Option<Order>> {
        let affected = sqlx::query(
            "UPDATE orders SET lock_token = $1, updated_at = now() \
             WHERE id = $2 AND lock_token IS NULL AND status = $3",
        )
        .bind(token)
        .bind(id)
        .bind(expected_status.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 1 {
            self.fetch_one(id).await
        } else {
            Ok(None)
        }
    }

    async fn update_with_lock(
        &self,
        id: Uuid,
        expected_lock: Option<&str>,
        patch: OrderPatch,
    ) -> Result<Option<Order>> {
        // The read only supplies the merge base; the WHERE clause re-checks
        // the lock at write time, so a holder change after this read makes
        // the statement affect zero rows rather than lose an update.
        let Some(mut order) = self.fetch_one(id).await? else {
            return Ok(None);
        };
        patch.apply(&mut order, Utc::now());

        let content = serde_json::to_string(&OrderContent::of(&order))?;
        let details = serde_json::to_string(&order.fulfillment.details)?;

        let sql = match expected_lock {
            Some(_) => {
                "UPDATE orders SET status = $1, lock_token = $2, service_type = $3, \
                 fulfillment_status = $4, fulfillment_date = $5, fulfillment_time = $6, \
                 fulfillment_details = $7, content = $8, updated_at = $9 \
                 WHERE id = $10 AND lock_token = $11"
            }
            None => {
                "UPDATE orders SET status = $1, lock_token = $2, service_type = $3, \
                 fulfillment_status = $4, fulfillment_date = $5, fulfillment_time = $6, \
                 fulfillment_details = $7, content = $8, updated_at = $9 \
                 WHERE id = $10 AND lock_token IS NULL"
            }
        };

        let mut query = sqlx::query(sql)
            .bind(order.status.as_str())
            .bind(order.lock.as_deref())
            .bind(order.fulfillment.service_type.as_str())
            .bind(order.fulfillment.status.as_str())
            .bind(order.fulfillment.selected_date)
            .bind(order.fulfillment.selected_time)
            .bind(details)
            .bind(content)
            .bind(order.updated_at)
            .bind(id);
        if let Some(token) = expected_lock {
            query = query.bind(token);
        }

        let affected = query.execute(&self.pool).await?.rows_affected();
        if affected == 1 {
            self.fetch_one(id).await
        } else {
            Ok(None)
        }
    }

    async fn release_lock(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE orders SET lock_token = NULL, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn lock_ready_orders(&self, filter: ReadyFilter, token: &str) -> Result<u64> {
        // One compound-WHERE statement: every matching unlocked row flips to
        // the sweep token in the same atomic UPDATE, so racing sweeps split
        // the eligible set without overlap.
        let affected = sqlx::query(
            "UPDATE orders SET lock_token = $1, updated_at = now() \
             WHERE lock_token IS NULL AND status = $2 AND fulfillment_status = $3 \
             AND fulfillment_date = $4 AND fulfillment_time <= $5",
        )
        .bind(token)
        .bind(filter.status.as_str())
        .bind(filter.fulfillment_status.as_str())
        .bind(filter.selected_date)
        .bind(filter.max_selected_time)
        .execute(&self.pool)
        .await?
        .rows_affected();

        tracing::debug!(claimed = affected, token, "Ready-scan bulk claim finished");
        Ok(affected)
    }

    async fn unlock_all(&self) -> Result<u64> {
        let affected = sqlx::query(
            "UPDATE orders SET lock_token = NULL, updated_at = now() \
             WHERE lock_token IS NOT NULL",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        tracing::warn!(cleared = affected, "Administrative unlock-all executed");
        Ok(affected)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected == 1)
    }
}

// ============================================================================
// Integration Test Notes
// ============================================================================
//
// rows_affected-based contention and the compound-WHERE bulk claim need a
// live Postgres; the hermetic suites in tests/ exercise the identical
// contract through the in-memory adapter.
//
// ============================================================================
