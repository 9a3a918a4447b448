mod common;

use chrono::Utc;
use rust_decimal_macros::dec;
use std::sync::Arc;

use common::Harness;
use numbr_backend::database::models::{OrderStatus, TransactionType};
use numbr_backend::database::store::LedgerStore;
use numbr_backend::services::CreateOrderRequest;

fn request() -> CreateOrderRequest {
    CreateOrderRequest {
        service_code: "wa".to_string(),
        country: "ng".to_string(),
        preferred_provider: None,
    }
}

async fn refunds_for(h: &Harness, order_id: uuid::Uuid) -> usize {
    h.store
        .transactions_for_order(order_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionType::Refund)
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_sweeper_refunds_once() {
    for _ in 0..20 {
        let h = Arc::new(Harness::new().await);
        let user = h.user(dec!(1000)).await;
        h.provider
            .expire_numbers_at(Utc::now() - chrono::Duration::seconds(1));
        let order = h.orders.create_order(user, request()).await.unwrap();

        let sweeper = h.sweeper();
        let canceller = {
            let h = h.clone();
            tokio::spawn(async move { h.orders.cancel_order(order.id, user).await })
        };
        let sweep = tokio::spawn(async move { sweeper.sweep_once().await });

        let cancel_result = canceller.await.unwrap();
        sweep.await.unwrap();

        let final_order = h.store.find_order(order.id).await.unwrap().unwrap();
        match cancel_result {
            Ok(cancelled) => assert_eq!(cancelled.status, OrderStatus::Cancelled),
            Err(_) => assert_eq!(final_order.status, OrderStatus::Expired),
        }
        assert!(matches!(
            final_order.status,
            OrderStatus::Cancelled | OrderStatus::Expired
        ));
        assert_eq!(refunds_for(&h, order.id).await, 1);
        assert_eq!(h.balance(user).await, dec!(1000));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_orders_never_overdraw() {
    let h = Arc::new(Harness::new().await);
    let user = h.user(dec!(1000)).await;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move { h.orders.create_order(user, request()).await })
        })
        .collect();

    let mut placed = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            placed += 1;
        }
    }

    assert_eq!(placed, 3);
    assert_eq!(h.balance(user).await, dec!(100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admin_refunds_apply_once() {
    let h = Arc::new(Harness::new().await);
    let user = h.user(dec!(1000)).await;
    let order = h.orders.create_order(user, request()).await.unwrap();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move { h.orders.admin_refund(order.id, "support ticket").await })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(refunds_for(&h, order.id).await, 1);
    assert_eq!(h.balance(user).await, dec!(1000));
}
