//! Order lifecycle.
//!
//! The debit and the order row are created in one store unit; the upstream
//! purchase happens afterwards, outside any lock. Every later status change
//! is an optimistic transition guarded by the order version, so concurrent
//! actors (user, admin, sweeper, status reads) cannot both apply a refund.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::keys::order::StatusKey;
use crate::cache::Cache;
use crate::config::OrderConfig;
use crate::database::models::{Order, OrderStatus, Transaction};
use crate::database::store::{LedgerStore, NewOrder, OrderTransition, Page, TransitionOutcome};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};
use crate::numbers::{PollStatus, ProviderGateway};
use crate::services::pricing::PricingService;

/// Transitions that lose a race are re-evaluated against the fresh row this many times.
const MAX_STALE_RETRIES: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub service_code: String,
    pub country: String,
    #[serde(default)]
    pub preferred_provider: Option<String>,
}

/// Who is asking. Admins may read and act on any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(Uuid),
    Admin,
}

impl Actor {
    fn can_access(&self, order: &Order) -> bool {
        match self {
            Actor::User(user_id) => order.user_id == *user_id,
            Actor::Admin => true,
        }
    }
}

/// What a refresh did to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Unchanged,
    Completed,
    Failed,
    Expired,
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn LedgerStore>,
    gateway: ProviderGateway,
    pricing: PricingService,
    cache: Option<Arc<dyn Cache<Order>>>,
    cache_ttl: Duration,
    config: OrderConfig,
}

fn already_final(order: &Order) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::AlreadyFinal {
        order_id: order.id.to_string(),
        status: order.status.to_string(),
    }))
}

fn not_cancellable(order: &Order) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::NotCancellable {
        order_id: order.id.to_string(),
        status: order.status.to_string(),
    }))
}

impl OrderService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: ProviderGateway,
        config: OrderConfig,
    ) -> Self {
        Self {
            pricing: PricingService::new(store.clone()),
            store,
            gateway,
            cache: None,
            cache_ttl: Duration::from_secs(5),
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache<Order>>, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl;
        self
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    async fn load(&self, order_id: Uuid) -> AppResult<Order> {
        self.store
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::order_not_found(order_id))
    }

    async fn load_for(&self, order_id: Uuid, actor: Actor) -> AppResult<Order> {
        let order = self.load(order_id).await?;
        if !actor.can_access(&order) {
            return Err(AppError::forbidden("order belongs to another user"));
        }
        Ok(order)
    }

    async fn cached(&self, order_id: Uuid) -> Option<Order> {
        let cache = self.cache.as_ref()?;
        match cache.get(&StatusKey::new(order_id).to_string()).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(%order_id, error = %err, "order cache read failed");
                None
            }
        }
    }

    /// Caches `order` only while it is still what the store holds. The
    /// snapshot may predate a transition that landed during the poll, so the
    /// store is re-read after the write; a moved version drops the entry and
    /// the fresh row is returned instead. A transition committing after that
    /// re-read invalidates the entry itself.
    async fn remember(&self, order: Order) -> AppResult<Order> {
        let Some(cache) = &self.cache else {
            return Ok(order);
        };
        let key = StatusKey::new(order.id).to_string();
        if let Err(err) = cache.set(&key, &order, Some(self.cache_ttl)).await {
            warn!(order_id = %order.id, error = %err, "order cache write failed");
            return Ok(order);
        }

        let current = self.load(order.id).await?;
        if current.version != order.version {
            debug!(
                order_id = %order.id,
                cached_version = order.version,
                current_version = current.version,
                "order moved while refreshing, dropping cached snapshot"
            );
            self.invalidate(order.id).await;
            return Ok(current);
        }
        Ok(order)
    }

    async fn invalidate(&self, order_id: Uuid) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.delete(&StatusKey::new(order_id).to_string()).await {
                warn!(%order_id, error = %err, "order cache invalidation failed");
            }
        }
    }

    /// Applies a transition and drops the cached snapshot when it lands.
    async fn transition(&self, transition: OrderTransition) -> AppResult<TransitionOutcome> {
        let order_id = transition.order_id;
        let outcome = self.store.transition_order(transition).await?;
        if let TransitionOutcome::Applied { order, refund } = &outcome {
            self.invalidate(order_id).await;
            info!(
                %order_id,
                status = %order.status,
                version = order.version,
                refund = ?refund.as_ref().map(|tx| tx.id),
                "order transitioned"
            );
        }
        Ok(outcome)
    }

    /// Gives the number back upstream. Failures are logged, never surfaced.
    async fn release_number(&self, order: &Order) {
        if let Some(external_id) = order.external_order_id.as_deref() {
            if let Err(err) = self.gateway.cancel(&order.provider_id, external_id).await {
                warn!(order_id = %order.id, provider = %order.provider_id, error = %err, "upstream cancel failed");
            }
        }
    }

    pub async fn create_order(&self, user_id: Uuid, request: CreateOrderRequest) -> AppResult<Order> {
        let service_code = request.service_code.trim();
        let country = request.country.trim();
        if service_code.is_empty() {
            return Err(AppError::invalid_field("service_code", "must not be empty"));
        }
        if country.is_empty() {
            return Err(AppError::invalid_field("country", "must not be empty"));
        }

        let quote = self
            .pricing
            .quote(service_code, country, request.preferred_provider.as_deref())
            .await?;
        if quote.final_price <= Decimal::ZERO || quote.offer.base_cost <= Decimal::ZERO {
            warn!(
                provider = %quote.offer.provider_id,
                base_cost = %quote.offer.base_cost,
                final_price = %quote.final_price,
                "refusing to sell a non-positive price"
            );
            return Err(AppError::new(AppErrorKind::Domain(DomainError::NoProviderAvailable {
                service_code: service_code.to_string(),
                country: country.to_string(),
            })));
        }

        let (order, payment) = self
            .store
            .create_order_with_payment(NewOrder {
                user_id,
                service_code: service_code.to_string(),
                country: country.to_string(),
                provider_id: quote.offer.provider_id.clone(),
                base_price: quote.offer.base_cost,
                final_price: quote.final_price,
                expires_at: Utc::now() + self.config.default_ttl(),
            })
            .await?;
        info!(
            order_id = %order.id,
            %user_id,
            provider = %order.provider_id,
            final_price = %order.final_price,
            balance_after = %payment.balance_after,
            "order created"
        );

        let processing = match self
            .transition(OrderTransition::new(
                &order,
                &[OrderStatus::Pending],
                OrderStatus::Processing,
            ))
            .await?
        {
            TransitionOutcome::Applied { order, .. } => order,
            // Cancelled before we got to the provider; that path refunded.
            TransitionOutcome::Stale { current } => return Ok(current),
        };

        match self
            .gateway
            .purchase_number(&processing.provider_id, &processing.service_code, &processing.country)
            .await
        {
            Ok(number) => {
                let mut waiting = OrderTransition::new(
                    &processing,
                    &[OrderStatus::Processing],
                    OrderStatus::WaitingForSms,
                );
                waiting.phone_number = Some(number.phone_number.clone());
                waiting.external_order_id = Some(number.external_order_id.clone());
                waiting.expires_at = number.expires_at;

                match self.transition(waiting).await? {
                    TransitionOutcome::Applied { order, .. } => Ok(order),
                    TransitionOutcome::Stale { current } => {
                        warn!(order_id = %current.id, status = %current.status, "order moved during purchase, releasing number");
                        let mut bought = current.clone();
                        bought.external_order_id = Some(number.external_order_id);
                        self.release_number(&bought).await;
                        Ok(current)
                    }
                }
            }
            Err(err) => {
                warn!(order_id = %processing.id, provider = %processing.provider_id, error = %err, "number purchase failed, refunding");
                let failed = OrderTransition::new(
                    &processing,
                    &[OrderStatus::Processing],
                    OrderStatus::Failed,
                )
                .with_failure_reason(err.failure_reason())
                .with_refund(format!("Refund: purchase failed ({})", err.failure_reason()));

                match self.transition(failed).await? {
                    TransitionOutcome::Applied { order, .. } => Ok(order),
                    TransitionOutcome::Stale { current } => Ok(current),
                }
            }
        }
    }

    pub async fn list_orders(&self, user_id: Uuid, page: Page) -> AppResult<Vec<Order>> {
        Ok(self.store.list_orders(user_id, page).await?)
    }

    pub async fn get_order(&self, order_id: Uuid, actor: Actor) -> AppResult<Order> {
        self.load_for(order_id, actor).await
    }

    /// The order as of now: overdue orders are expired and delivered codes
    /// are picked up before answering. Fresh snapshots come from the cache.
    pub async fn get_order_status(&self, order_id: Uuid, actor: Actor) -> AppResult<Order> {
        if let Some(hit) = self.cached(order_id).await {
            if !actor.can_access(&hit) {
                return Err(AppError::forbidden("order belongs to another user"));
            }
            if !hit.is_overdue(Utc::now()) {
                debug!(%order_id, "order status served from cache");
                return Ok(hit);
            }
        }

        let order = self.load_for(order_id, actor).await?;
        let (order, _) = self.refresh_order(order).await?;
        self.remember(order).await
    }

    /// Polls the provider and expires overdue orders. Shared by status reads
    /// and the sweeper; whichever lands first wins and the other no-ops.
    pub async fn refresh_order(&self, mut order: Order) -> AppResult<(Order, RefreshOutcome)> {
        for _ in 0..MAX_STALE_RETRIES {
            if !order.is_active() {
                return Ok((order, RefreshOutcome::Unchanged));
            }

            let (transition, outcome) = match self.poll(&order).await {
                Some(PollStatus { code: Some(code), .. }) => {
                    let mut t = OrderTransition::new(
                        &order,
                        &[OrderStatus::WaitingForSms],
                        OrderStatus::Completed,
                    );
                    t.sms_code = Some(code);
                    (t, RefreshOutcome::Completed)
                }
                Some(PollStatus { terminal: true, .. }) => (
                    OrderTransition::new(&order, &OrderStatus::ACTIVE, OrderStatus::Failed)
                        .with_failure_reason("activation ended upstream without a code")
                        .with_refund("Refund: activation ended without SMS"),
                    RefreshOutcome::Failed,
                ),
                _ if order.is_overdue(Utc::now()) => (
                    OrderTransition::new(&order, &OrderStatus::ACTIVE, OrderStatus::Expired)
                        .with_failure_reason("no SMS received before expiry")
                        .with_refund("Refund: order expired without SMS"),
                    RefreshOutcome::Expired,
                ),
                _ => return Ok((order, RefreshOutcome::Unchanged)),
            };

            match self.transition(transition).await? {
                TransitionOutcome::Applied { order, .. } => {
                    if outcome == RefreshOutcome::Expired {
                        self.release_number(&order).await;
                    }
                    return Ok((order, outcome));
                }
                TransitionOutcome::Stale { current } => order = current,
            }
        }
        Ok((order, RefreshOutcome::Unchanged))
    }

    async fn poll(&self, order: &Order) -> Option<PollStatus> {
        if order.status != OrderStatus::WaitingForSms {
            return None;
        }
        let external_id = order.external_order_id.as_deref()?;
        match self.gateway.poll_status(&order.provider_id, external_id).await {
            Ok(status) => Some(status),
            Err(err) => {
                warn!(order_id = %order.id, provider = %order.provider_id, error = %err, "status poll failed");
                None
            }
        }
    }

    /// Owner cancel of an active order, refunded in the same unit.
    pub async fn cancel_order(&self, order_id: Uuid, user_id: Uuid) -> AppResult<Order> {
        let order = self.load_for(order_id, Actor::User(user_id)).await?;
        self.cancel_with(order, "Refund: cancelled by user", not_cancellable)
            .await
    }

    pub async fn admin_cancel(&self, order_id: Uuid, reason: &str) -> AppResult<Order> {
        let order = self.load(order_id).await?;
        self.cancel_with(order, &format!("Refund: cancelled by admin ({})", reason), already_final)
            .await
    }

    async fn cancel_with(
        &self,
        mut order: Order,
        refund_description: &str,
        rejection: fn(&Order) -> AppError,
    ) -> AppResult<Order> {
        for _ in 0..MAX_STALE_RETRIES {
            if !order.is_active() {
                return Err(rejection(&order));
            }
            let transition =
                OrderTransition::new(&order, &OrderStatus::ACTIVE, OrderStatus::Cancelled)
                    .with_refund(refund_description);
            match self.transition(transition).await? {
                TransitionOutcome::Applied { order, .. } => {
                    self.release_number(&order).await;
                    return Ok(order);
                }
                TransitionOutcome::Stale { current } => order = current,
            }
        }
        Err(rejection(&order))
    }

    /// Force refund. Rejected with `AlreadyFinal` once the order is refunded,
    /// cancelled, failed or expired, even when that happened concurrently.
    pub async fn admin_refund(&self, order_id: Uuid, reason: &str) -> AppResult<(Order, Transaction)> {
        if reason.trim().is_empty() {
            return Err(AppError::invalid_field("reason", "A reason is required"));
        }
        let mut order = self.load(order_id).await?;
        for _ in 0..MAX_STALE_RETRIES {
            if !OrderStatus::ADMIN_REFUNDABLE.contains(&order.status) {
                return Err(already_final(&order));
            }
            let was_active = order.is_active();
            let transition = OrderTransition::new(
                &order,
                &OrderStatus::ADMIN_REFUNDABLE,
                OrderStatus::Refunded,
            )
            .with_failure_reason(reason.trim())
            .with_refund(format!("Admin refund: {}", reason.trim()));

            match self.transition(transition).await? {
                TransitionOutcome::Applied {
                    order,
                    refund: Some(refund),
                } => {
                    if was_active {
                        self.release_number(&order).await;
                    }
                    return Ok((order, refund));
                }
                TransitionOutcome::Applied { order, refund: None } => {
                    return Err(already_final(&order).with_context("refund was not recorded"));
                }
                TransitionOutcome::Stale { current } => order = current,
            }
        }
        Err(already_final(&order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::database::memory::InMemoryStore;
    use crate::database::models::{Provider, ProviderPrice, TransactionType, UserRole};
    use crate::database::store::NewUser;
    use crate::error::ErrorCode;
    use crate::numbers::{NumberProvider, NumberResult, PurchasedNumber, ServiceOffer};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Stub;

    #[async_trait]
    impl NumberProvider for Stub {
        fn id(&self) -> &str {
            "stub"
        }
        async fn list_available_services(&self) -> NumberResult<Vec<ServiceOffer>> {
            Ok(vec![])
        }
        async fn purchase_number(&self, _s: &str, _c: &str) -> NumberResult<PurchasedNumber> {
            Ok(PurchasedNumber {
                phone_number: "+2348000000000".to_string(),
                external_order_id: "ext-1".to_string(),
                expires_at: None,
            })
        }
        async fn poll_status(&self, _id: &str) -> NumberResult<PollStatus> {
            Ok(PollStatus::waiting())
        }
        async fn cancel(&self, _id: &str) -> NumberResult<()> {
            Ok(())
        }
    }

    async fn setup(balance: Decimal) -> (OrderService, Arc<InMemoryStore>, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_provider(Provider {
                id: "stub".to_string(),
                name: "Stub".to_string(),
                is_active: true,
                is_healthy: true,
                priority: 1,
            })
            .await
            .unwrap();
        store
            .upsert_provider_price(ProviderPrice {
                provider_id: "stub".to_string(),
                service_code: "wa".to_string(),
                country: "ng".to_string(),
                base_cost: dec!(300),
            })
            .await
            .unwrap();
        let user = store
            .create_user(NewUser {
                email: "orders@example.com".to_string(),
                role: UserRole::User,
                currency: "NGN".to_string(),
            })
            .await
            .unwrap();
        store.set_balance(user.id, balance).await.unwrap();

        let gateway = ProviderGateway::new(Duration::from_secs(1), 2).with_provider(Arc::new(Stub));
        let service = OrderService::new(store.clone(), gateway, OrderConfig::default());
        (service, store, user.id)
    }

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            service_code: "wa".to_string(),
            country: "ng".to_string(),
            preferred_provider: None,
        }
    }

    #[tokio::test]
    async fn purchase_waits_for_sms() {
        let (orders, store, user_id) = setup(dec!(1000)).await;
        let order = orders.create_order(user_id, request()).await.unwrap();
        assert_eq!(order.status, OrderStatus::WaitingForSms);
        assert_eq!(order.phone_number.as_deref(), Some("+2348000000000"));
        assert_eq!(store.find_user(user_id).await.unwrap().unwrap().balance, dec!(700));
    }

    #[tokio::test]
    async fn unknown_service_has_no_provider() {
        let (orders, _, user_id) = setup(dec!(1000)).await;
        let mut req = request();
        req.service_code = "tg".to_string();
        let err = orders.create_order(user_id, req).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::NoProviderAvailable);
    }

    #[tokio::test]
    async fn other_users_cannot_cancel() {
        let (orders, _, user_id) = setup(dec!(1000)).await;
        let order = orders.create_order(user_id, request()).await.unwrap();
        let err = orders.cancel_order(order.id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn second_cancel_is_not_cancellable() {
        let (orders, store, user_id) = setup(dec!(1000)).await;
        let order = orders.create_order(user_id, request()).await.unwrap();
        let cancelled = orders.cancel_order(order.id, user_id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let err = orders.cancel_order(order.id, user_id).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::NotCancellable);

        let refunds = store
            .transactions_for_order(order.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|tx| tx.kind == TransactionType::Refund)
            .count();
        assert_eq!(refunds, 1);
        assert_eq!(store.find_user(user_id).await.unwrap().unwrap().balance, dec!(1000));
    }

    #[tokio::test]
    async fn admin_cancel_of_final_order_is_already_final() {
        let (orders, _, user_id) = setup(dec!(1000)).await;
        let order = orders.create_order(user_id, request()).await.unwrap();
        orders.cancel_order(order.id, user_id).await.unwrap();
        let err = orders.admin_cancel(order.id, "duplicate").await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::AlreadyFinal);
    }

    #[tokio::test]
    async fn status_read_of_fresh_order_is_unchanged() {
        let (orders, _, user_id) = setup(dec!(1000)).await;
        let order = orders.create_order(user_id, request()).await.unwrap();
        let seen = orders
            .get_order_status(order.id, Actor::User(user_id))
            .await
            .unwrap();
        assert_eq!(seen.status, OrderStatus::WaitingForSms);
        assert_eq!(seen.version, order.version);
    }

    /// Blocks the first poll until released.
    #[derive(Default)]
    struct GatedPoll {
        armed: std::sync::atomic::AtomicBool,
        polling: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl NumberProvider for GatedPoll {
        fn id(&self) -> &str {
            "stub"
        }
        async fn list_available_services(&self) -> NumberResult<Vec<ServiceOffer>> {
            Ok(vec![])
        }
        async fn purchase_number(&self, _s: &str, _c: &str) -> NumberResult<PurchasedNumber> {
            Ok(PurchasedNumber {
                phone_number: "+2348000000001".to_string(),
                external_order_id: "ext-gated".to_string(),
                expires_at: None,
            })
        }
        async fn poll_status(&self, _id: &str) -> NumberResult<PollStatus> {
            if self.armed.swap(false, std::sync::atomic::Ordering::SeqCst) {
                self.polling.notify_one();
                self.release.notified().await;
            }
            Ok(PollStatus::waiting())
        }
        async fn cancel(&self, _id: &str) -> NumberResult<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_during_status_poll_is_not_hidden_by_cache() {
        let (_, store, user_id) = setup(dec!(1000)).await;
        let provider = Arc::new(GatedPoll::default());
        let gateway =
            ProviderGateway::new(Duration::from_secs(30), 1).with_provider(provider.clone());
        let orders = OrderService::new(store.clone(), gateway, OrderConfig::default())
            .with_cache(Arc::new(InMemoryCache::new()), Duration::from_secs(60));

        let order = orders.create_order(user_id, request()).await.unwrap();
        provider.armed.store(true, std::sync::atomic::Ordering::SeqCst);

        let reader = {
            let orders = orders.clone();
            tokio::spawn(async move {
                orders
                    .get_order_status(order.id, Actor::User(user_id))
                    .await
            })
        };
        provider.polling.notified().await;

        let cancelled = orders.cancel_order(order.id, user_id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        provider.release.notify_one();

        let seen_by_reader = reader.await.unwrap().unwrap();
        assert_eq!(seen_by_reader.status, OrderStatus::Cancelled);

        let seen = orders
            .get_order_status(order.id, Actor::User(user_id))
            .await
            .unwrap();
        assert_eq!(seen.status, OrderStatus::Cancelled);
        assert_eq!(store.find_user(user_id).await.unwrap().unwrap().balance, dec!(1000));
    }
}
