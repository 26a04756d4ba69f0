//! Deterministic in-memory [`RmsRepository`].

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rsb_rms::{FetchFilter, RmsRepository};
use rsb_schemas::{
    CustomerDraft, ItemRow, OrderHeader, OrderLine, SyncError, SyncResult, ORDER_CHANNEL_ONLINE,
};

#[derive(Debug, Clone)]
pub struct StoredOrder {
    pub order_id: i64,
    pub header: OrderHeader,
    pub lines: Vec<OrderLine>,
}

#[derive(Default)]
pub struct MemoryRms {
    items: Mutex<Vec<ItemRow>>,
    customers: Mutex<Vec<(i64, CustomerDraft)>>,
    orders: Mutex<Vec<StoredOrder>>,
    next_id: AtomicI64,
    /// When set, `insert_order_tx` fails at the line stage and persists
    /// nothing — the transactional rollback contract.
    pub fail_order_lines: AtomicBool,
}

impl MemoryRms {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    pub fn seed_items(&self, rows: Vec<ItemRow>) {
        self.items.lock().unwrap().extend(rows);
    }

    /// Replace (or add) an item row by item id, as an RMS-side edit would.
    pub fn upsert_item(&self, row: ItemRow) {
        let mut items = self.items.lock().unwrap();
        match items.iter_mut().find(|r| r.item_id == row.item_id) {
            Some(existing) => *existing = row,
            None => items.push(row),
        }
    }

    pub fn seed_customer(&self, id: i64, draft: CustomerDraft) {
        self.customers.lock().unwrap().push((id, draft));
    }

    pub fn orders(&self) -> Vec<StoredOrder> {
        self.orders.lock().unwrap().clone()
    }

    pub fn customers_created(&self) -> usize {
        self.customers.lock().unwrap().len()
    }

    fn next(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1000
    }
}

#[async_trait]
impl RmsRepository for MemoryRms {
    async fn modified_items(&self, since: DateTime<Utc>, limit: i64) -> SyncResult<Vec<i64>> {
        let items = self.items.lock().unwrap();
        let mut hits: Vec<(DateTime<Utc>, i64)> = items
            .iter()
            .filter(|r| r.last_updated > since)
            .map(|r| (r.last_updated, r.item_id))
            .collect();
        hits.sort();
        Ok(hits
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn fetch_item_rows(
        &self,
        ids: &[i64],
        filter: &FetchFilter,
    ) -> SyncResult<Vec<ItemRow>> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .filter(|r| ids.contains(&r.item_id))
            .filter(|r| filter.include_zero_stock || r.quantity > 0)
            .filter(|r| {
                filter
                    .categoria
                    .as_deref()
                    .map(|c| r.categoria == c)
                    .unwrap_or(true)
            })
            .filter(|r| {
                filter
                    .familia
                    .as_deref()
                    .map(|f| r.familia == f)
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn lookup_item_id_by_sku(&self, sku: &str) -> SyncResult<Option<i64>> {
        let items = self.items.lock().unwrap();
        Ok(items.iter().find(|r| r.sku == sku).map(|r| r.item_id))
    }

    async fn find_customer_by_email(&self, email: &str) -> SyncResult<Option<i64>> {
        let customers = self.customers.lock().unwrap();
        Ok(customers
            .iter()
            .find(|(_, c)| {
                c.email
                    .as_deref()
                    .map(|e| e.eq_ignore_ascii_case(email))
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id))
    }

    async fn create_customer(&self, draft: &CustomerDraft) -> SyncResult<i64> {
        let id = self.next();
        self.customers.lock().unwrap().push((id, draft.clone()));
        Ok(id)
    }

    async fn insert_order_tx(
        &self,
        header: &OrderHeader,
        lines: &[OrderLine],
    ) -> SyncResult<i64> {
        if self.fail_order_lines.load(Ordering::SeqCst) && !lines.is_empty() {
            // Nothing is persisted: the failed transaction rolled back.
            return Err(SyncError::integrity(
                "db_constraint",
                "insert_order_tx/line: forced failure",
            ));
        }
        let order_id = self.next();
        self.orders.lock().unwrap().push(StoredOrder {
            order_id,
            header: header.clone(),
            lines: lines.to_vec(),
        });
        Ok(order_id)
    }

    async fn has_order_by_reference(&self, reference: &str) -> SyncResult<bool> {
        let orders = self.orders.lock().unwrap();
        Ok(orders.iter().any(|o| {
            o.header.reference_number == reference
                && o.header.channel_type == ORDER_CHANNEL_ONLINE
        }))
    }
}
