//! Postgres implementation of [`RmsRepository`].
//!
//! Identifiers keep their RMS catalog names (`"View_Items"`, `"Order"`,
//! `"OrderEntry"`, `"Customer"`), quoted because of the mixed case. The pool
//! is bounded by `RMS_DB_POOL_SIZE` and pre-checks connections before
//! handing them out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rsb_config::RmsDbSettings;
use rsb_schemas::{
    CustomerDraft, ErrorKind, ItemRow, OrderHeader, OrderLine, SyncError, SyncResult,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::debug;

use crate::{FetchFilter, RmsRepository};

pub struct PgRmsRepository {
    pool: PgPool,
}

impl PgRmsRepository {
    /// Connect with a bounded pool; connections are pinged before use.
    pub async fn connect(settings: &RmsDbSettings) -> SyncResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.pool_size)
            .acquire_timeout(settings.connect_timeout)
            .test_before_acquire(true)
            .connect(&settings.url())
            .await
            .map_err(|e| map_sqlx("connect", e))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map a sqlx failure onto the shared taxonomy:
/// - lost/exhausted connections are transient
/// - constraint violations (class 23) are integrity failures
/// - anything else the database rejected is a permanent validation error
fn map_sqlx(op: &str, e: sqlx::Error) -> SyncError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_) => {
            SyncError::new(ErrorKind::Transient, "db_connection", format!("{op}: {e}"))
        }
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            if code.starts_with("23") {
                SyncError::integrity("db_constraint", format!("{op}: {db}"))
            } else {
                SyncError::validation("db_rejected", format!("{op}: {db}"))
            }
        }
        _ => SyncError::new(ErrorKind::Transient, "db_error", format!("{op}: {e}")),
    }
}

fn item_row(row: &PgRow) -> Result<ItemRow, sqlx::Error> {
    Ok(ItemRow {
        item_id: row.try_get("ItemID")?,
        sku: row.try_get("SKU")?,
        ccod: row.try_get::<Option<String>, _>("CCOD")?.unwrap_or_default(),
        description: row.try_get("Description")?,
        familia: row.try_get::<Option<String>, _>("Familia")?.unwrap_or_default(),
        categoria: row.try_get::<Option<String>, _>("Categoria")?.unwrap_or_default(),
        extended_category: row
            .try_get::<Option<String>, _>("ExtendedCategory")?
            .unwrap_or_default(),
        genero: row.try_get::<Option<String>, _>("Genero")?.unwrap_or_default(),
        color: row.try_get::<Option<String>, _>("Color")?.unwrap_or_default(),
        talla: row.try_get::<Option<String>, _>("Talla")?.unwrap_or_default(),
        price: row.try_get("Price")?,
        sale_price: row.try_get("SalePrice")?,
        sale_start: row.try_get("SaleStartDate")?,
        sale_end: row.try_get("SaleEndDate")?,
        quantity: row.try_get("Quantity")?,
        stock_a: row.try_get::<Option<i32>, _>("StockA")?.unwrap_or(0),
        stock_b: row.try_get::<Option<i32>, _>("StockB")?.unwrap_or(0),
        tax: row.try_get("Tax")?,
        barcode: row.try_get("Barcode")?,
        last_updated: row.try_get("LastUpdated")?,
    })
}

#[async_trait]
impl RmsRepository for PgRmsRepository {
    async fn modified_items(&self, since: DateTime<Utc>, limit: i64) -> SyncResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            select "ItemID"
            from "View_Items"
            where "LastUpdated" is not null
              and "LastUpdated" > $1
            order by "LastUpdated" asc
            limit $2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("modified_items", e))?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn fetch_item_rows(
        &self,
        ids: &[i64],
        filter: &FetchFilter,
    ) -> SyncResult<Vec<ItemRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            select "ItemID", "SKU", "CCOD", "Description", "Familia", "Categoria",
                   "ExtendedCategory", "Genero", "Color", "Talla", "Price",
                   "SalePrice", "SaleStartDate", "SaleEndDate", "Quantity",
                   "StockA", "StockB", "Tax", "Barcode", "LastUpdated"
            from "View_Items"
            where "ItemID" = any($1)
              and ($2 or "Quantity" > 0)
              and ($3::text is null or "Categoria" = $3)
              and ($4::text is null or "Familia" = $4)
            order by "ItemID" asc
            "#,
        )
        .bind(ids)
        .bind(filter.include_zero_stock)
        .bind(filter.categoria.as_deref())
        .bind(filter.familia.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("fetch_item_rows", e))?;

        debug!(requested = ids.len(), returned = rows.len(), "fetched item rows");

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(item_row(&row).map_err(|e| map_sqlx("fetch_item_rows/decode", e))?);
        }
        Ok(out)
    }

    async fn lookup_item_id_by_sku(&self, sku: &str) -> SyncResult<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            select "ItemID"
            from "View_Items"
            where "SKU" = $1
            limit 1
            "#,
        )
        .bind(sku)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("lookup_item_id_by_sku", e))?;

        Ok(row.map(|(id,)| id))
    }

    async fn find_customer_by_email(&self, email: &str) -> SyncResult<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            select "ID"
            from "Customer"
            where lower("EmailAddress") = lower($1)
            order by "ID" asc
            limit 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("find_customer_by_email", e))?;

        Ok(row.map(|(id,)| id))
    }

    async fn create_customer(&self, draft: &CustomerDraft) -> SyncResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            insert into "Customer" ("FirstName", "LastName", "EmailAddress", "PhoneNumber")
            values ($1, $2, $3, $4)
            returning "ID"
            "#,
        )
        .bind(&draft.first_name)
        .bind(&draft.last_name)
        .bind(draft.email.as_deref())
        .bind(draft.phone.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx("create_customer", e))?;

        Ok(id)
    }

    async fn insert_order_tx(
        &self,
        header: &OrderHeader,
        lines: &[OrderLine],
    ) -> SyncResult<i64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx("insert_order_tx/begin", e))?;

        let (order_id,): (i64,) = sqlx::query_as(
            r#"
            insert into "Order" (
              "StoreID", "Type", "Time", "CustomerID", "Total", "Tax",
              "Comment", "ShippingNotes", "ChannelType", "ReferenceNumber"
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            returning "ID"
            "#,
        )
        .bind(header.store_id)
        .bind(header.order_type)
        .bind(header.time)
        .bind(header.customer_id)
        .bind(header.total)
        .bind(header.tax)
        .bind(&header.comment)
        .bind(&header.shipping_notes)
        .bind(header.channel_type)
        .bind(&header.reference_number)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx("insert_order_tx/header", e))?;

        for line in lines {
            sqlx::query(
                r#"
                insert into "OrderEntry" (
                  "OrderID", "ItemID", "Description", "Price", "FullPrice", "Quantity"
                ) values ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order_id)
            .bind(line.item_id)
            .bind(&line.description)
            .bind(line.price)
            .bind(line.full_price)
            .bind(line.quantity)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx("insert_order_tx/line", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx("insert_order_tx/commit", e))?;

        Ok(order_id)
    }

    async fn has_order_by_reference(&self, reference: &str) -> SyncResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            select exists (
                select 1
                from "Order"
                where "ReferenceNumber" = $1
                  and "ChannelType" = $2
            )
            "#,
        )
        .bind(reference)
        .bind(rsb_schemas::ORDER_CHANNEL_ONLINE)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx("has_order_by_reference", e))?;

        Ok(exists)
    }
}
