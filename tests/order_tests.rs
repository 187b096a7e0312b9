//! Order creation under concurrency: the product lock table plus the
//! single-batch transaction must keep stock exact, never negative, and
//! deadlock-free for overlapping product sets.

use std::sync::Arc;
use std::time::Duration;

use branchsync::error::DbError;
use branchsync::inventory::InventoryService;
use branchsync::store::{OrderItem, StorageEngine};
use tempfile::TempDir;

fn test_service() -> (Arc<InventoryService>, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let engine = Arc::new(StorageEngine::open(dir.path()).expect("Failed to open engine"));
    (
        Arc::new(InventoryService::new(engine, "node-test".to_string())),
        dir,
    )
}

fn item(product_id: &str, quantity: i64) -> OrderItem {
    OrderItem {
        product_id: product_id.to_string(),
        quantity,
        product_name: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_orders_take_the_last_unit_once() {
    let (svc, _dir) = test_service();
    let client = svc
        .upsert_client(None, "ACME".to_string(), None, None)
        .unwrap();
    let product = svc
        .upsert_product(None, "Last unit".to_string(), None, true)
        .unwrap();
    svc.adjust_stock(&product.id, 1, "seed").await.unwrap();

    let first = {
        let svc = svc.clone();
        let client_id = client.id.clone();
        let product_id = product.id.clone();
        tokio::spawn(async move {
            svc.create_order(&client_id, vec![item(&product_id, 1)], None)
                .await
        })
    };
    let second = {
        let svc = svc.clone();
        let client_id = client.id.clone();
        let product_id = product.id.clone();
        tokio::spawn(async move {
            svc.create_order(&client_id, vec![item(&product_id, 1)], None)
                .await
        })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one order must win the last unit");
    let loss = results.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(
        loss.as_ref().unwrap_err(),
        DbError::InsufficientStock(_)
    ));

    let entry = svc.get_stock(&product.id).unwrap();
    assert_eq!(entry.quantity, 0, "stock must end at zero, never negative");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_orders_do_not_deadlock() {
    let (svc, _dir) = test_service();
    let client = svc
        .upsert_client(None, "ACME".to_string(), None, None)
        .unwrap();
    let a = svc
        .upsert_product(Some("sku-a".to_string()), "A".to_string(), None, true)
        .unwrap();
    let b = svc
        .upsert_product(Some("sku-b".to_string()), "B".to_string(), None, true)
        .unwrap();
    svc.adjust_stock(&a.id, 1000, "seed").await.unwrap();
    svc.adjust_stock(&b.id, 1000, "seed").await.unwrap();

    let mut handles = Vec::new();
    for round in 0..40 {
        let svc = svc.clone();
        let client_id = client.id.clone();
        // Item lists alternate between a,b and b,a; sorted lock acquisition
        // must make both directions safe.
        let items = if round % 2 == 0 {
            vec![item("sku-a", 1), item("sku-b", 1)]
        } else {
            vec![item("sku-b", 1), item("sku-a", 1)]
        };
        handles.push(tokio::spawn(async move {
            svc.create_order(&client_id, items, None).await
        }));
    }

    let all = async {
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(30), all)
        .await
        .expect("order creation deadlocked");

    assert_eq!(svc.get_stock("sku-a").unwrap().quantity, 960);
    assert_eq!(svc.get_stock("sku-b").unwrap().quantity, 960);
}

#[tokio::test]
async fn test_order_requires_existing_client_and_active_product() {
    let (svc, _dir) = test_service();
    let client = svc
        .upsert_client(None, "ACME".to_string(), None, None)
        .unwrap();

    let err = svc
        .create_order("ghost-client", vec![item("sku-x", 1)], None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ClientNotFound(_)));

    let inactive = svc
        .upsert_product(None, "Retired".to_string(), None, false)
        .unwrap();
    let err = svc
        .create_order(&client.id, vec![item(&inactive.id, 1)], None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ProductInactive(_)));
}
