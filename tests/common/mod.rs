#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use numbr_backend::cache::{Cache, InMemoryCache};
use numbr_backend::config::{OrderConfig, SweeperConfig};
use numbr_backend::database::memory::InMemoryStore;
use numbr_backend::database::models::{Order, Provider, ProviderPrice, UserRole};
use numbr_backend::database::store::{LedgerStore, NewUser};
use numbr_backend::numbers::{
    NumberProvider, NumberProviderError, NumberResult, PollStatus, PurchasedNumber, ServiceOffer,
};
use numbr_backend::numbers::ProviderGateway;
use numbr_backend::services::OrderService;
use numbr_backend::workers::ExpirySweeper;

pub const PROVIDER: &str = "scripted";

/// Number provider whose answers are set by the test.
pub struct ScriptedProvider {
    purchase: Mutex<Option<NumberProviderError>>,
    expires_at: Mutex<Option<DateTime<Utc>>>,
    polls: Mutex<VecDeque<PollStatus>>,
    pub cancels: AtomicU32,
    pub purchases: AtomicU32,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            purchase: Mutex::new(None),
            expires_at: Mutex::new(None),
            polls: Mutex::new(VecDeque::new()),
            cancels: AtomicU32::new(0),
            purchases: AtomicU32::new(0),
        })
    }

    pub fn fail_purchases_with(&self, err: NumberProviderError) {
        *self.purchase.lock().unwrap() = Some(err);
    }

    /// Numbers bought from now on expire at `at`.
    pub fn expire_numbers_at(&self, at: DateTime<Utc>) {
        *self.expires_at.lock().unwrap() = Some(at);
    }

    pub fn push_poll(&self, status: PollStatus) {
        self.polls.lock().unwrap().push_back(status);
    }
}

#[async_trait]
impl NumberProvider for ScriptedProvider {
    fn id(&self) -> &str {
        PROVIDER
    }

    async fn list_available_services(&self) -> NumberResult<Vec<ServiceOffer>> {
        Ok(vec![ServiceOffer {
            service_code: "wa".to_string(),
            country: "ng".to_string(),
            cost: dec!(250),
            available: 40,
        }])
    }

    async fn purchase_number(&self, _service: &str, _country: &str) -> NumberResult<PurchasedNumber> {
        let n = self.purchases.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.purchase.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(PurchasedNumber {
            phone_number: format!("+23480000000{:02}", n),
            external_order_id: format!("act-{}", n),
            expires_at: *self.expires_at.lock().unwrap(),
        })
    }

    async fn poll_status(&self, _external_order_id: &str) -> NumberResult<PollStatus> {
        Ok(self
            .polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(PollStatus::waiting))
    }

    async fn cancel(&self, _external_order_id: &str) -> NumberResult<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<ScriptedProvider>,
    pub gateway: ProviderGateway,
    pub orders: OrderService,
    pub cache: Arc<InMemoryCache>,
}

impl Harness {
    /// One provider selling `wa/ng` at 300 (cost 300, no markup).
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_provider(Provider {
                id: PROVIDER.to_string(),
                name: "Scripted".to_string(),
                is_active: true,
                is_healthy: true,
                priority: 5,
            })
            .await
            .unwrap();
        store
            .upsert_provider_price(ProviderPrice {
                provider_id: PROVIDER.to_string(),
                service_code: "wa".to_string(),
                country: "ng".to_string(),
                base_cost: dec!(300),
            })
            .await
            .unwrap();

        let provider = ScriptedProvider::new();
        let gateway =
            ProviderGateway::new(Duration::from_secs(2), 2).with_provider(provider.clone());
        let cache = Arc::new(InMemoryCache::new());
        let order_cache: Arc<dyn Cache<Order>> = cache.clone();
        let orders = OrderService::new(store.clone(), gateway.clone(), OrderConfig::default())
            .with_cache(order_cache, Duration::from_secs(5));

        Self {
            store,
            provider,
            gateway,
            orders,
            cache,
        }
    }

    pub async fn user(&self, balance: Decimal) -> Uuid {
        let user = self
            .store
            .create_user(NewUser {
                email: format!("{}@example.com", Uuid::new_v4().simple()),
                role: UserRole::User,
                currency: "NGN".to_string(),
            })
            .await
            .unwrap();
        self.store.set_balance(user.id, balance).await.unwrap();
        user.id
    }

    pub async fn balance(&self, user_id: Uuid) -> Decimal {
        self.store.find_user(user_id).await.unwrap().unwrap().balance
    }

    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.store.clone(),
            self.orders.clone(),
            SweeperConfig {
                interval_secs: 1,
                batch_size: 50,
                concurrency: 4,
            },
        )
    }
}
