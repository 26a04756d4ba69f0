//! Deterministic in-memory [`CommerceClient`].
//!
//! Remote state lives behind one mutex; every mutation is observable
//! through accessor methods so scenario tests can assert on exactly what
//! the pipeline wrote. Failure injection covers the trailing steps
//! (inventory, metafields) that degrade a product instead of failing it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rsb_commerce::{CommerceClient, ProductPatch, VariantUpdate, METAFIELDS_PER_CALL};
use rsb_schemas::{
    CommerceOrder, DiscountSpec, Location, Metafield, Product, RemoteProduct, RemoteVariant,
    SyncError, SyncResult, Variant,
};

#[derive(Default)]
struct State {
    products: HashMap<String, RemoteProduct>,
    /// owner id → metafields last written (replace semantics per key).
    metafields: HashMap<String, Vec<Metafield>>,
    /// inventory item id → (location id, on-hand, tracking active).
    inventory: HashMap<String, (String, i32, bool)>,
    /// external ref → (discount id, last spec).
    discounts: HashMap<String, (String, DiscountSpec)>,
    /// normalized name → (id, display name).
    collections: HashMap<String, (String, String)>,
    /// collection id → product ids.
    collection_members: HashMap<String, Vec<String>>,
    orders: Vec<CommerceOrder>,
}

#[derive(Default)]
pub struct MemoryCommerce {
    state: Mutex<State>,
    next_id: AtomicU64,
    /// Fail this many upcoming `set_inventory_on_hand` calls with a 429.
    pub fail_inventory_times: AtomicU32,
    /// Fail this many upcoming `set_metafields` calls with a 500.
    pub fail_metafields_times: AtomicU32,
    pub products_created: AtomicU32,
    pub products_updated: AtomicU32,
    pub discounts_created: AtomicU32,
    pub discounts_updated: AtomicU32,
}

impl MemoryCommerce {
    pub fn new() -> Self {
        Self::default()
    }

    fn id(&self, kind: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("gid://commerce/{kind}/{n}")
    }

    pub fn seed_order(&self, order: CommerceOrder) {
        self.state.lock().unwrap().orders.push(order);
    }

    pub fn product(&self, handle: &str) -> Option<RemoteProduct> {
        self.state.lock().unwrap().products.get(handle).cloned()
    }

    pub fn metafields_of(&self, owner_id: &str) -> Vec<Metafield> {
        self.state
            .lock()
            .unwrap()
            .metafields
            .get(owner_id)
            .cloned()
            .unwrap_or_default()
    }

    /// On-hand quantity for a variant SKU, if inventory was ever written.
    pub fn on_hand_for_sku(&self, handle: &str, sku: &str) -> Option<i32> {
        let state = self.state.lock().unwrap();
        let product = state.products.get(handle)?;
        let variant = product.variants.iter().find(|v| v.sku == sku)?;
        state
            .inventory
            .get(&variant.inventory_item_id)
            .map(|(_, qty, _)| *qty)
    }

    pub fn discount_for(&self, external_ref: &str) -> Option<DiscountSpec> {
        self.state
            .lock()
            .unwrap()
            .discounts
            .get(external_ref)
            .map(|(_, spec)| spec.clone())
    }

    pub fn discount_count(&self) -> usize {
        self.state.lock().unwrap().discounts.len()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .collections
            .values()
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn members_of(&self, collection_name: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let Some((id, _)) = state.collections.get(&collection_name.trim().to_lowercase()) else {
            return Vec::new();
        };
        state
            .collection_members
            .get(id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommerceClient for MemoryCommerce {
    async fn get_locations(&self) -> SyncResult<Vec<Location>> {
        Ok(vec![Location {
            id: "gid://commerce/Location/1".into(),
            name: "Main".into(),
            is_primary: true,
        }])
    }

    async fn primary_location(&self) -> SyncResult<Location> {
        Ok(self.get_locations().await?.remove(0))
    }

    async fn fetch_product_by_handle(&self, handle: &str) -> SyncResult<Option<RemoteProduct>> {
        Ok(self.product(handle))
    }

    async fn create_product(&self, product: &Product) -> SyncResult<String> {
        let id = self.id("Product");
        let remote = RemoteProduct {
            id: id.clone(),
            handle: product.handle.clone(),
            title: product.title.clone(),
            vendor: product.vendor.clone(),
            product_type: product.product_type.clone(),
            status: product.status.as_str().to_string(),
            variants: Vec::new(),
        };
        self.state
            .lock()
            .unwrap()
            .products
            .insert(product.handle.clone(), remote);
        self.products_created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn update_product(&self, remote_id: &str, patch: &ProductPatch) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        let product = state
            .products
            .values_mut()
            .find(|p| p.id == remote_id)
            .ok_or_else(|| SyncError::validation("not_found", "unknown product id"))?;
        product.title = patch.title.clone();
        product.vendor = patch.vendor.clone();
        product.product_type = patch.product_type.clone();
        product.status = patch.status.clone();
        self.products_updated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn bulk_create_variants(
        &self,
        product_remote_id: &str,
        variants: &[Variant],
    ) -> SyncResult<Vec<RemoteVariant>> {
        let mut created = Vec::with_capacity(variants.len());
        for v in variants {
            created.push(RemoteVariant {
                id: self.id("Variant"),
                sku: v.sku.clone(),
                option1: v.option1.clone(),
                option2: v.option2.clone(),
                price: v.price,
                compare_at_price: v.compare_at_price,
                inventory_item_id: self.id("InventoryItem"),
            });
        }
        let mut state = self.state.lock().unwrap();
        let product = state
            .products
            .values_mut()
            .find(|p| p.id == product_remote_id)
            .ok_or_else(|| SyncError::validation("not_found", "unknown product id"))?;
        product.variants.extend(created.clone());
        Ok(created)
    }

    async fn bulk_update_variants(
        &self,
        product_remote_id: &str,
        updates: &[VariantUpdate],
    ) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        let product = state
            .products
            .values_mut()
            .find(|p| p.id == product_remote_id)
            .ok_or_else(|| SyncError::validation("not_found", "unknown product id"))?;
        for update in updates {
            let variant = product
                .variants
                .iter_mut()
                .find(|v| v.id == update.remote_id)
                .ok_or_else(|| SyncError::validation("not_found", "unknown variant id"))?;
            variant.sku = update.sku.clone();
            variant.price = update.price;
            variant.compare_at_price = update.compare_at_price;
        }
        Ok(())
    }

    async fn activate_inventory_tracking(
        &self,
        inventory_item_id: &str,
        location_id: &str,
    ) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .inventory
            .entry(inventory_item_id.to_string())
            .or_insert_with(|| (location_id.to_string(), 0, false));
        entry.2 = true;
        Ok(())
    }

    async fn set_inventory_on_hand(
        &self,
        inventory_item_id: &str,
        location_id: &str,
        quantity: i32,
    ) -> SyncResult<()> {
        let remaining = self.fail_inventory_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_inventory_times.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::transient("http_429", "throttled").with_retry_after(1));
        }
        let mut state = self.state.lock().unwrap();
        state.inventory.insert(
            inventory_item_id.to_string(),
            (location_id.to_string(), quantity, true),
        );
        Ok(())
    }

    async fn set_metafields(&self, owner_id: &str, metafields: &[Metafield]) -> SyncResult<()> {
        let remaining = self.fail_metafields_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_metafields_times.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::transient("http_500", "forced failure"));
        }
        if metafields.len() > METAFIELDS_PER_CALL {
            return Err(SyncError::validation("metafield_chunk", "chunk too large"));
        }
        let mut state = self.state.lock().unwrap();
        let existing = state.metafields.entry(owner_id.to_string()).or_default();
        for m in metafields {
            existing.retain(|e| !(e.namespace == m.namespace && e.key == m.key));
            existing.push(m.clone());
        }
        Ok(())
    }

    async fn find_discount_by_ref(&self, external_ref: &str) -> SyncResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .discounts
            .get(external_ref)
            .map(|(id, _)| id.clone()))
    }

    async fn create_automatic_discount(
        &self,
        spec: &DiscountSpec,
        _variant_ids: &[String],
    ) -> SyncResult<String> {
        let id = self.id("Discount");
        self.state
            .lock()
            .unwrap()
            .discounts
            .insert(spec.external_ref.clone(), (id.clone(), spec.clone()));
        self.discounts_created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn update_automatic_discount(
        &self,
        discount_remote_id: &str,
        spec: &DiscountSpec,
    ) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .discounts
            .values_mut()
            .find(|(id, _)| id == discount_remote_id)
            .ok_or_else(|| SyncError::validation("not_found", "unknown discount id"))?;
        entry.1 = spec.clone();
        self.discounts_updated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_collections(&self) -> SyncResult<Vec<(String, String)>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .collections
            .values()
            .map(|(id, name)| (name.clone(), id.clone()))
            .collect())
    }

    async fn ensure_collection(&self, name: &str) -> SyncResult<String> {
        let key = name.trim().to_lowercase();
        let mut state = self.state.lock().unwrap();
        if let Some((id, _)) = state.collections.get(&key) {
            return Ok(id.clone());
        }
        drop(state);
        let id = self.id("Collection");
        self.state
            .lock()
            .unwrap()
            .collections
            .insert(key, (id.clone(), name.to_string()));
        Ok(id)
    }

    async fn add_products_to_collection(
        &self,
        collection_id: &str,
        product_ids: &[String],
    ) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        let members = state
            .collection_members
            .entry(collection_id.to_string())
            .or_default();
        for id in product_ids {
            if !members.contains(id) {
                members.push(id.clone());
            }
        }
        Ok(())
    }

    async fn fetch_order_by_id(&self, id: &str) -> SyncResult<CommerceOrder> {
        self.state
            .lock()
            .unwrap()
            .orders
            .iter()
            .find(|o| o.id == id || o.name == id)
            .cloned()
            .ok_or_else(|| SyncError::validation("order_not_found", id.to_string()))
    }
}
