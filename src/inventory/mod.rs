pub mod locks;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::store::{
    ApplyOutcome, ClientRecord, EntityKind, OrderItem, OrderRecord, ProductRecord, Role,
    StockRecord, StorageEngine, UserRecord,
};
use locks::ProductLockTable;

pub use locks::ProductLockGuard;

/// Only order status in use; orders are confirmed atomically or not created.
pub const ORDER_CONFIRMED: &str = "confirmed";

/// Domain operations over the versioned store.
///
/// Every write funnels through `Txn::apply`: local mutations take the next
/// version, replicated ones carry the origin's version and are dropped when
/// stale. Stock writes additionally hold the product lock.
pub struct InventoryService {
    engine: Arc<StorageEngine>,
    locks: ProductLockTable,
    node_id: String,
}

impl InventoryService {
    pub fn new(engine: Arc<StorageEngine>, node_id: String) -> Self {
        Self {
            engine,
            locks: ProductLockTable::new(),
            node_id,
        }
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    // ==================== Clients ====================

    pub fn upsert_client(
        &self,
        id: Option<String>,
        name: String,
        document: Option<String>,
        email: Option<String>,
    ) -> DbResult<ClientRecord> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let existing: Option<ClientRecord> = self.engine.get(EntityKind::Client, &id)?;
        let now = Utc::now();
        let mut record = ClientRecord {
            id: id.clone(),
            name,
            document,
            email,
            version: 0,
            last_modified_by: self.node_id.clone(),
            created_at: existing.map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.engine.apply(EntityKind::Client, &id, None, |txn, v| {
            record.version = v;
            txn.put(EntityKind::Client, &record.id, &record)
        })?;
        Ok(record)
    }

    pub fn apply_remote_client(&self, record: ClientRecord) -> DbResult<ApplyOutcome> {
        let id = record.id.clone();
        self.engine
            .apply(EntityKind::Client, &id, Some(record.version), move |txn, _| {
                txn.put(EntityKind::Client, &record.id, &record)
            })
    }

    pub fn get_client(&self, id: &str) -> DbResult<Option<ClientRecord>> {
        self.engine.get(EntityKind::Client, id)
    }

    pub fn list_clients(&self) -> DbResult<Vec<ClientRecord>> {
        self.engine.list(EntityKind::Client)
    }

    // ==================== Products ====================

    pub fn upsert_product(
        &self,
        id: Option<String>,
        name: String,
        description: Option<String>,
        active: bool,
    ) -> DbResult<ProductRecord> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let existing: Option<ProductRecord> = self.engine.get(EntityKind::Product, &id)?;
        let now = Utc::now();
        let mut record = ProductRecord {
            id: id.clone(),
            name,
            description,
            active,
            version: 0,
            last_modified_by: self.node_id.clone(),
            created_at: existing.map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.engine.apply(EntityKind::Product, &id, None, |txn, v| {
            record.version = v;
            txn.put(EntityKind::Product, &record.id, &record)
        })?;
        Ok(record)
    }

    pub fn apply_remote_product(&self, record: ProductRecord) -> DbResult<ApplyOutcome> {
        let id = record.id.clone();
        self.engine
            .apply(EntityKind::Product, &id, Some(record.version), move |txn, _| {
                txn.put(EntityKind::Product, &record.id, &record)
            })
    }

    pub fn get_product(&self, id: &str) -> DbResult<Option<ProductRecord>> {
        self.engine.get(EntityKind::Product, id)
    }

    pub fn list_products(&self) -> DbResult<Vec<ProductRecord>> {
        self.engine.list(EntityKind::Product)
    }

    // ==================== Users ====================

    pub fn upsert_user(
        &self,
        username: String,
        password_hash: String,
        role: Role,
    ) -> DbResult<UserRecord> {
        let existing: Option<UserRecord> = self.engine.get(EntityKind::User, &username)?;
        let mut record = UserRecord {
            username: username.clone(),
            password_hash,
            role,
            version: 0,
            last_modified_by: self.node_id.clone(),
            created_at: existing.map(|e| e.created_at).unwrap_or_else(Utc::now),
        };
        self.engine.apply(EntityKind::User, &username, None, |txn, v| {
            record.version = v;
            txn.put(EntityKind::User, &record.username, &record)
        })?;
        Ok(record)
    }

    pub fn apply_remote_user(&self, record: UserRecord) -> DbResult<ApplyOutcome> {
        let username = record.username.clone();
        self.engine
            .apply(EntityKind::User, &username, Some(record.version), move |txn, _| {
                txn.put(EntityKind::User, &record.username, &record)
            })
    }

    pub fn get_user(&self, username: &str) -> DbResult<Option<UserRecord>> {
        self.engine.get(EntityKind::User, username)
    }

    // ==================== Stock ====================

    /// Read a product's stock entry; the product must exist, the stock row
    /// may not (reads as zero).
    pub fn get_stock(&self, product_id: &str) -> DbResult<StockRecord> {
        let product: Option<ProductRecord> = self.engine.get(EntityKind::Product, product_id)?;
        if product.is_none() {
            return Err(DbError::ProductNotFound(product_id.to_string()));
        }
        Ok(self
            .engine
            .get(EntityKind::Stock, product_id)?
            .unwrap_or_else(|| StockRecord::empty(product_id)))
    }

    pub fn stock_levels(&self) -> DbResult<BTreeMap<String, StockRecord>> {
        let entries: Vec<StockRecord> = self.engine.list(EntityKind::Stock)?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.product_id.clone(), entry))
            .collect())
    }

    /// Apply a local stock delta under the product lock. Negative results
    /// abort with `InsufficientStock`.
    pub async fn adjust_stock(
        &self,
        product_id: &str,
        delta: i64,
        reference: &str,
    ) -> DbResult<StockRecord> {
        let ids = [product_id.to_string()];
        let _guard = self.locks.acquire(&ids).await;

        self.engine.transaction(|txn| {
            let product: ProductRecord = txn
                .get(EntityKind::Product, product_id)?
                .ok_or_else(|| DbError::ProductNotFound(product_id.to_string()))?;
            if !product.active {
                return Err(DbError::ProductInactive(product_id.to_string()));
            }

            let current: StockRecord = txn
                .get(EntityKind::Stock, product_id)?
                .unwrap_or_else(|| StockRecord::empty(product_id));
            let quantity = current.quantity + delta;
            if quantity < 0 {
                return Err(DbError::InsufficientStock(product_id.to_string()));
            }

            let mut record = StockRecord {
                product_id: product_id.to_string(),
                quantity,
                version: 0,
                last_modified_by: self.node_id.clone(),
                updated_at: Utc::now(),
                reference: Some(reference.to_string()),
            };
            txn.apply(EntityKind::Stock, product_id, None, |txn, v| {
                record.version = v;
                txn.put(EntityKind::Stock, product_id, &record)
            })?;
            Ok(record)
        })
    }

    /// Apply a replicated stock entry. Holds the product lock so a racing
    /// local decrement cannot interleave with the version check.
    pub async fn apply_remote_stock(&self, record: StockRecord) -> DbResult<ApplyOutcome> {
        let ids = [record.product_id.clone()];
        let _guard = self.locks.acquire(&ids).await;

        let product_id = record.product_id.clone();
        self.engine.transaction(|txn| {
            let product: Option<ProductRecord> = txn.get(EntityKind::Product, &product_id)?;
            if product.is_none() {
                return Err(DbError::ProductNotFound(product_id.clone()));
            }
            txn.apply(
                EntityKind::Stock,
                &product_id,
                Some(record.version),
                |txn, _| txn.put(EntityKind::Stock, &record.product_id, &record),
            )
        })
    }

    // ==================== Orders ====================

    /// Create an order and decrement stock for every item, atomically.
    ///
    /// Locks every referenced product (sorted), then in one transaction:
    /// client lookup, per-product active + stock checks, stock decrements,
    /// order row. Returns the order plus the stock entries and products it
    /// touched, for event emission.
    pub async fn create_order(
        &self,
        client_id: &str,
        items: Vec<OrderItem>,
        order_id: Option<String>,
    ) -> DbResult<(OrderRecord, Vec<StockRecord>, Vec<ProductRecord>)> {
        if items.is_empty() {
            return Err(DbError::BadRequest("order requires at least one item".to_string()));
        }
        for item in &items {
            if item.quantity <= 0 {
                return Err(DbError::BadRequest(format!(
                    "quantity for product '{}' must be positive",
                    item.product_id
                )));
            }
        }

        let order_id = order_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let product_ids: Vec<String> = items.iter().map(|i| i.product_id.clone()).collect();
        let _guard = self.locks.acquire(&product_ids).await;

        self.engine.transaction(|txn| {
            let client: ClientRecord = txn
                .get(EntityKind::Client, client_id)?
                .ok_or_else(|| DbError::ClientNotFound(client_id.to_string()))?;

            // An order may list the same product twice; aggregate first so
            // each stock row is read and staged exactly once.
            let mut needed: BTreeMap<&str, i64> = BTreeMap::new();
            for item in &items {
                *needed.entry(item.product_id.as_str()).or_insert(0) += item.quantity;
            }

            let now = Utc::now();
            let reference = format!("order:{}", order_id);
            let mut products = Vec::with_capacity(needed.len());
            let mut stock_updates = Vec::with_capacity(needed.len());

            for (pid, qty) in &needed {
                let product: ProductRecord = txn
                    .get(EntityKind::Product, pid)?
                    .ok_or_else(|| DbError::ProductNotFound(pid.to_string()))?;
                if !product.active {
                    return Err(DbError::ProductInactive(pid.to_string()));
                }

                let current: StockRecord = txn
                    .get(EntityKind::Stock, pid)?
                    .unwrap_or_else(|| StockRecord::empty(pid));
                if current.quantity < *qty {
                    return Err(DbError::InsufficientStock(pid.to_string()));
                }

                let mut entry = StockRecord {
                    product_id: pid.to_string(),
                    quantity: current.quantity - qty,
                    version: 0,
                    last_modified_by: self.node_id.clone(),
                    updated_at: now,
                    reference: Some(reference.clone()),
                };
                txn.apply(EntityKind::Stock, pid, None, |txn, v| {
                    entry.version = v;
                    txn.put(EntityKind::Stock, pid, &entry)
                })?;
                stock_updates.push(entry);
                products.push(product);
            }

            let order_items: Vec<OrderItem> = items
                .iter()
                .map(|item| OrderItem {
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                    product_name: products
                        .iter()
                        .find(|p| p.id == item.product_id)
                        .map(|p| p.name.clone()),
                })
                .collect();

            let mut order = OrderRecord {
                id: order_id.clone(),
                client_id: client.id.clone(),
                client_name: client.name.clone(),
                items: order_items,
                status: ORDER_CONFIRMED.to_string(),
                version: 0,
                last_modified_by: self.node_id.clone(),
                created_at: now,
            };
            txn.apply(EntityKind::Order, &order_id, None, |txn, v| {
                order.version = v;
                txn.put(EntityKind::Order, &order.id, &order)
            })?;

            Ok((order, stock_updates, products))
        })
    }

    /// Apply a replicated order. Embedded client/products land first (each
    /// through its own version check) so foreign references resolve; the
    /// order row itself is versioned like everything else. Stock levels
    /// arrive as separate stock events.
    pub fn apply_remote_order(
        &self,
        order: OrderRecord,
        client: Option<ClientRecord>,
        products: Vec<ProductRecord>,
    ) -> DbResult<ApplyOutcome> {
        if let Some(client) = client {
            self.apply_remote_client(client)?;
        }
        for product in products {
            self.apply_remote_product(product)?;
        }

        let id = order.id.clone();
        self.engine
            .apply(EntityKind::Order, &id, Some(order.version), move |txn, _| {
                txn.put(EntityKind::Order, &order.id, &order)
            })
    }

    pub fn get_order(&self, id: &str) -> DbResult<Option<OrderRecord>> {
        self.engine.get(EntityKind::Order, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_service() -> (InventoryService, TempDir) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let engine = Arc::new(StorageEngine::open(dir.path()).expect("Failed to open engine"));
        (InventoryService::new(engine, "node-test".to_string()), dir)
    }

    fn item(product_id: &str, quantity: i64) -> OrderItem {
        OrderItem {
            product_id: product_id.to_string(),
            quantity,
            product_name: None,
        }
    }

    #[tokio::test]
    async fn test_upserts_bump_versions() {
        let (svc, _dir) = test_service();

        let client = svc
            .upsert_client(None, "ACME Ltda".to_string(), None, None)
            .unwrap();
        assert_eq!(client.version, 1);

        let updated = svc
            .upsert_client(
                Some(client.id.clone()),
                "ACME S.A.".to_string(),
                Some("12.345".to_string()),
                None,
            )
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.created_at, client.created_at);
    }

    #[tokio::test]
    async fn test_adjust_stock_never_goes_negative() {
        let (svc, _dir) = test_service();
        let product = svc
            .upsert_product(None, "Widget".to_string(), None, true)
            .unwrap();

        svc.adjust_stock(&product.id, 5, "restock").await.unwrap();
        let err = svc.adjust_stock(&product.id, -6, "oversell").await.unwrap_err();
        assert!(matches!(err, DbError::InsufficientStock(_)));

        let entry = svc.get_stock(&product.id).unwrap();
        assert_eq!(entry.quantity, 5);
        assert_eq!(entry.version, 1);
    }

    #[tokio::test]
    async fn test_order_is_all_or_nothing() {
        let (svc, _dir) = test_service();
        let client = svc
            .upsert_client(None, "Cliente".to_string(), None, None)
            .unwrap();
        let p1 = svc.upsert_product(None, "A".to_string(), None, true).unwrap();
        let p2 = svc.upsert_product(None, "B".to_string(), None, true).unwrap();
        svc.adjust_stock(&p1.id, 10, "seed").await.unwrap();
        svc.adjust_stock(&p2.id, 1, "seed").await.unwrap();

        // Second item exceeds stock; the first item's decrement must not
        // survive the abort.
        let err = svc
            .create_order(&client.id, vec![item(&p1.id, 2), item(&p2.id, 5)], None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InsufficientStock(_)));

        assert_eq!(svc.get_stock(&p1.id).unwrap().quantity, 10);
        assert_eq!(svc.get_stock(&p2.id).unwrap().quantity, 1);
        assert_eq!(svc.engine().count(EntityKind::Order), 0);
    }

    #[tokio::test]
    async fn test_order_decrements_and_embeds_names() {
        let (svc, _dir) = test_service();
        let client = svc
            .upsert_client(None, "Cliente".to_string(), None, None)
            .unwrap();
        let p1 = svc
            .upsert_product(None, "Widget".to_string(), None, true)
            .unwrap();
        svc.adjust_stock(&p1.id, 10, "seed").await.unwrap();

        let (order, stocks, products) = svc
            .create_order(&client.id, vec![item(&p1.id, 3)], None)
            .await
            .unwrap();

        assert_eq!(order.status, ORDER_CONFIRMED);
        assert_eq!(order.items[0].product_name.as_deref(), Some("Widget"));
        assert_eq!(stocks[0].quantity, 7);
        assert_eq!(stocks[0].version, 2);
        assert_eq!(products[0].id, p1.id);
        assert_eq!(
            svc.get_order(&order.id).unwrap().unwrap().client_name,
            "Cliente"
        );
    }

    #[tokio::test]
    async fn test_duplicate_items_aggregate() {
        let (svc, _dir) = test_service();
        let client = svc.upsert_client(None, "C".to_string(), None, None).unwrap();
        let p = svc.upsert_product(None, "P".to_string(), None, true).unwrap();
        svc.adjust_stock(&p.id, 5, "seed").await.unwrap();

        let (_, stocks, _) = svc
            .create_order(&client.id, vec![item(&p.id, 2), item(&p.id, 2)], None)
            .await
            .unwrap();
        assert_eq!(stocks.len(), 1);
        assert_eq!(stocks[0].quantity, 1);

        let err = svc
            .create_order(&client.id, vec![item(&p.id, 1), item(&p.id, 1)], None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InsufficientStock(_)));
    }

    #[tokio::test]
    async fn test_remote_stock_requires_known_product() {
        let (svc, _dir) = test_service();
        let record = StockRecord {
            product_id: "ghost".to_string(),
            quantity: 3,
            version: 1,
            last_modified_by: "node-b".to_string(),
            updated_at: Utc::now(),
            reference: None,
        };
        let err = svc.apply_remote_stock(record).await.unwrap_err();
        assert!(matches!(err, DbError::ProductNotFound(_)));
    }

    #[tokio::test]
    async fn test_remote_stock_stale_version_skips() {
        let (svc, _dir) = test_service();
        let product = svc.upsert_product(None, "P".to_string(), None, true).unwrap();
        svc.adjust_stock(&product.id, 7, "seed").await.unwrap();

        let stale = StockRecord {
            product_id: product.id.clone(),
            quantity: 99,
            version: 1,
            last_modified_by: "node-b".to_string(),
            updated_at: Utc::now(),
            reference: None,
        };
        let outcome = svc.apply_remote_stock(stale).await.unwrap();
        assert!(!outcome.is_applied());
        assert_eq!(svc.get_stock(&product.id).unwrap().quantity, 7);
    }
}
