use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{
    Order, OrderStatus, PricingRule, Provider, ProviderOffer, ProviderPrice, Transaction,
    TransactionStatus, TransactionType, User,
};
use crate::database::store::{
    CreditOutcome, DepositSettlement, LedgerEntry, LedgerStore, NewDeposit, NewOrder,
    NewPricingRule, NewUser, OrderTransition, Page, StoreResult, TransitionOutcome,
};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    orders: HashMap<Uuid, Order>,
    transactions: Vec<Transaction>,
    /// (payment_provider, reference_id) -> index into `transactions`
    references: HashMap<(String, String), usize>,
    providers: HashMap<String, Provider>,
    prices: HashMap<(String, String, String), ProviderPrice>,
    rules: Vec<PricingRule>,
}

impl State {
    fn user_mut(&mut self, user_id: Uuid) -> StoreResult<&mut User> {
        self.users
            .get_mut(&user_id)
            .ok_or_else(|| DatabaseError::not_found("user", user_id))
    }

    /// Mutates the balance and appends the ledger row. Callers must have
    /// finished every fallible check that could abort the unit.
    fn apply_entry(&mut self, entry: LedgerEntry) -> StoreResult<Transaction> {
        // mirrors the CHECK (amount > 0) on the transactions table
        if entry.amount <= rust_decimal::Decimal::ZERO {
            return Err(DatabaseError::new(DatabaseErrorKind::Query {
                message: format!("transaction amount must be positive, got {}", entry.amount),
            }));
        }
        let now = Utc::now();
        let user = self.user_mut(entry.user_id)?;
        let before = user.balance;
        let after = if entry.kind.is_credit() {
            before + entry.amount
        } else {
            if before < entry.amount {
                return Err(DatabaseError::new(DatabaseErrorKind::InsufficientFunds {
                    available: before.to_string(),
                    required: entry.amount.to_string(),
                }));
            }
            before - entry.amount
        };
        user.balance = after;
        user.updated_at = now;
        let currency = user.currency.clone();

        let tx = Transaction {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            kind: entry.kind,
            amount: entry.amount,
            balance_before: before,
            balance_after: after,
            status: TransactionStatus::Completed,
            currency,
            order_id: entry.order_id,
            reference_id: entry.reference_id.clone(),
            payment_provider: entry.payment_provider.clone(),
            description: entry.description,
            access_code: None,
            created_at: now,
            updated_at: now,
        };
        if let Some(reference) = entry.reference_id {
            self.references.insert(
                (entry.payment_provider.unwrap_or_default(), reference),
                self.transactions.len(),
            );
        }
        self.transactions.push(tx.clone());
        Ok(tx)
    }

    fn settle_at(&mut self, index: usize) -> StoreResult<CreditOutcome> {
        let pending = self.transactions[index].clone();
        if pending.status == TransactionStatus::Completed {
            return Ok(CreditOutcome::AlreadyApplied(pending));
        }
        let now = Utc::now();
        let user = self.user_mut(pending.user_id)?;
        let before = user.balance;
        user.balance = before + pending.amount;
        user.updated_at = now;

        let row = &mut self.transactions[index];
        row.balance_before = before;
        row.balance_after = before + pending.amount;
        row.status = TransactionStatus::Completed;
        row.updated_at = now;
        Ok(CreditOutcome::Applied(row.clone()))
    }

    fn has_refund(&self, order_id: Uuid) -> bool {
        self.transactions
            .iter()
            .any(|tx| tx.order_id == Some(order_id) && tx.kind == TransactionType::Refund)
    }
}

/// Mutex-guarded store used by tests and local development.
///
/// Each trait method holds the lock for its whole body, so every method is
/// atomic with respect to the others.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/dev seeding helper: sets a balance without a ledger row.
    pub async fn set_balance(&self, user_id: Uuid, balance: rust_decimal::Decimal) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.user_mut(user_id)?.balance = balance;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "users_email_key".to_string(),
            }));
        }
        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            email: user.email,
            role: user.role,
            balance: rust_decimal::Decimal::ZERO,
            currency: user.currency,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state.users.get(&user_id).cloned())
    }

    async fn debit(&self, entry: LedgerEntry) -> StoreResult<Transaction> {
        let mut state = self.state.lock().await;
        state.apply_entry(entry)
    }

    async fn credit(&self, entry: LedgerEntry) -> StoreResult<CreditOutcome> {
        let mut state = self.state.lock().await;
        if let Some(reference) = entry.reference_id.clone() {
            let key = (entry.payment_provider.clone().unwrap_or_default(), reference);
            if let Some(&index) = state.references.get(&key) {
                return state.settle_at(index);
            }
        }
        state.apply_entry(entry).map(CreditOutcome::Applied)
    }

    async fn create_pending_deposit(&self, deposit: NewDeposit) -> StoreResult<Transaction> {
        let mut state = self.state.lock().await;
        let key = (deposit.payment_provider.clone(), deposit.reference_id.clone());
        if state.references.contains_key(&key) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "transactions_provider_reference_key".to_string(),
            }));
        }
        let user = state
            .users
            .get(&deposit.user_id)
            .ok_or_else(|| DatabaseError::not_found("user", deposit.user_id))?;
        let now = Utc::now();
        let tx = Transaction {
            id: Uuid::new_v4(),
            user_id: deposit.user_id,
            kind: TransactionType::Deposit,
            amount: deposit.amount,
            balance_before: user.balance,
            balance_after: user.balance,
            status: TransactionStatus::Pending,
            currency: deposit.currency,
            order_id: None,
            reference_id: Some(deposit.reference_id),
            payment_provider: Some(deposit.payment_provider),
            description: deposit.description,
            access_code: deposit.access_code,
            created_at: now,
            updated_at: now,
        };
        let index = state.transactions.len();
        state.references.insert(key, index);
        state.transactions.push(tx.clone());
        Ok(tx)
    }

    async fn settle_deposit(
        &self,
        payment_provider: &str,
        reference_id: &str,
    ) -> StoreResult<DepositSettlement> {
        let mut state = self.state.lock().await;
        let key = (payment_provider.to_string(), reference_id.to_string());
        match state.references.get(&key).copied() {
            Some(index) if state.transactions[index].kind == TransactionType::Deposit => {
                Ok(match state.settle_at(index)? {
                    CreditOutcome::Applied(tx) => DepositSettlement::Credited(tx),
                    CreditOutcome::AlreadyApplied(tx) => DepositSettlement::AlreadyCompleted(tx),
                })
            }
            _ => Ok(DepositSettlement::Unknown),
        }
    }

    async fn find_transaction_by_reference(
        &self,
        payment_provider: &str,
        reference_id: &str,
    ) -> StoreResult<Option<Transaction>> {
        let state = self.state.lock().await;
        let key = (payment_provider.to_string(), reference_id.to_string());
        Ok(state
            .references
            .get(&key)
            .map(|&index| state.transactions[index].clone()))
    }

    async fn list_transactions(&self, user_id: Uuid, page: Page) -> StoreResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.user_id == user_id)
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .cloned()
            .collect())
    }

    async fn transactions_for_order(&self, order_id: Uuid) -> StoreResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|tx| tx.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    async fn create_order_with_payment(&self, order: NewOrder) -> StoreResult<(Order, Transaction)> {
        let mut state = self.state.lock().await;
        let currency = state
            .users
            .get(&order.user_id)
            .map(|u| u.currency.clone())
            .ok_or_else(|| DatabaseError::not_found("user", order.user_id))?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let payment = state.apply_entry(LedgerEntry {
            user_id: order.user_id,
            kind: TransactionType::OrderPayment,
            amount: order.final_price,
            order_id: Some(order_id),
            reference_id: None,
            payment_provider: None,
            description: Some(format!(
                "Number purchase {} / {}",
                order.service_code, order.country
            )),
        })?;

        let created = Order {
            id: order_id,
            user_id: order.user_id,
            service_code: order.service_code,
            country: order.country,
            provider_id: order.provider_id,
            status: OrderStatus::Pending,
            base_price: order.base_price,
            final_price: order.final_price,
            currency,
            phone_number: None,
            external_order_id: None,
            sms_code: None,
            failure_reason: None,
            expires_at: order.expires_at,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(order_id, created.clone());
        Ok((created, payment))
    }

    async fn find_order(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn list_orders(&self, user_id: Uuid, page: Page) -> StoreResult<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .collect())
    }

    async fn transition_order(
        &self,
        transition: OrderTransition,
    ) -> StoreResult<TransitionOutcome> {
        let mut state = self.state.lock().await;
        let current = state
            .orders
            .get(&transition.order_id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("order", transition.order_id))?;

        if current.version != transition.expected_version
            || !transition.allowed_from.contains(&current.status)
        {
            return Ok(TransitionOutcome::Stale { current });
        }
        if !current.status.can_transition_to(transition.to) {
            return Err(DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!(
                    "illegal order transition {} -> {}",
                    current.status, transition.to
                ),
            }));
        }
        if transition.refund_description.is_some() && state.has_refund(current.id) {
            return Ok(TransitionOutcome::Stale { current });
        }

        let refund = match transition.refund_description {
            Some(description) => Some(state.apply_entry(LedgerEntry {
                user_id: current.user_id,
                kind: TransactionType::Refund,
                amount: current.final_price,
                order_id: Some(current.id),
                reference_id: None,
                payment_provider: None,
                description: Some(description),
            })?),
            None => None,
        };

        let order = state
            .orders
            .get_mut(&transition.order_id)
            .ok_or_else(|| DatabaseError::not_found("order", transition.order_id))?;
        order.status = transition.to;
        if let Some(phone) = transition.phone_number {
            order.phone_number = Some(phone);
        }
        if let Some(external) = transition.external_order_id {
            order.external_order_id = Some(external);
        }
        if let Some(code) = transition.sms_code {
            order.sms_code = Some(code);
        }
        if let Some(expires_at) = transition.expires_at {
            order.expires_at = expires_at;
        }
        if let Some(reason) = transition.failure_reason {
            order.failure_reason = Some(reason);
        }
        order.version += 1;
        order.updated_at = Utc::now();

        Ok(TransitionOutcome::Applied {
            order: order.clone(),
            refund,
        })
    }

    async fn find_overdue_orders(&self, now: DateTime<Utc>, limit: u32) -> StoreResult<Vec<Order>> {
        let state = self.state.lock().await;
        let mut overdue: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        overdue.truncate(limit as usize);
        Ok(overdue)
    }

    async fn viable_offers(
        &self,
        service_code: &str,
        country: &str,
    ) -> StoreResult<Vec<ProviderOffer>> {
        let state = self.state.lock().await;
        let mut offers: Vec<ProviderOffer> = state
            .providers
            .values()
            .filter(|p| p.is_active && p.is_healthy)
            .filter_map(|p| {
                state
                    .prices
                    .get(&(p.id.clone(), service_code.to_string(), country.to_string()))
                    .map(|price| ProviderOffer {
                        provider_id: p.id.clone(),
                        provider_priority: p.priority,
                        base_cost: price.base_cost,
                    })
            })
            .collect();
        offers.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        Ok(offers)
    }

    async fn pricing_rules(&self, service_code: &str, country: &str) -> StoreResult<Vec<PricingRule>> {
        let state = self.state.lock().await;
        Ok(state
            .rules
            .iter()
            .filter(|r| r.is_active)
            .filter(|r| r.service_code.as_deref().map_or(true, |s| s == service_code))
            .filter(|r| r.country.as_deref().map_or(true, |c| c == country))
            .cloned()
            .collect())
    }

    async fn upsert_provider(&self, provider: Provider) -> StoreResult<Provider> {
        let mut state = self.state.lock().await;
        state.providers.insert(provider.id.clone(), provider.clone());
        Ok(provider)
    }

    async fn upsert_provider_price(&self, price: ProviderPrice) -> StoreResult<ProviderPrice> {
        let mut state = self.state.lock().await;
        if !state.providers.contains_key(&price.provider_id) {
            return Err(DatabaseError::not_found("provider", &price.provider_id));
        }
        state.prices.insert(
            (
                price.provider_id.clone(),
                price.service_code.clone(),
                price.country.clone(),
            ),
            price.clone(),
        );
        Ok(price)
    }

    async fn create_pricing_rule(&self, rule: NewPricingRule) -> StoreResult<PricingRule> {
        let mut state = self.state.lock().await;
        let created = PricingRule {
            id: Uuid::new_v4(),
            service_code: rule.service_code,
            country: rule.country,
            profit_type: rule.profit_type,
            profit_value: rule.profit_value,
            priority: rule.priority,
            is_active: true,
            created_at: Utc::now(),
        };
        state.rules.push(created.clone());
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::UserRole;
    use rust_decimal_macros::dec;

    async fn funded_user(store: &InMemoryStore, balance: rust_decimal::Decimal) -> User {
        let user = store
            .create_user(NewUser {
                email: format!("{}@example.com", Uuid::new_v4()),
                role: UserRole::User,
                currency: "NGN".to_string(),
            })
            .await
            .unwrap();
        store.set_balance(user.id, balance).await.unwrap();
        user
    }

    fn entry(user_id: Uuid, kind: TransactionType, amount: rust_decimal::Decimal) -> LedgerEntry {
        LedgerEntry {
            user_id,
            kind,
            amount,
            order_id: None,
            reference_id: None,
            payment_provider: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn debit_rejects_overdraft_without_writing() {
        let store = InMemoryStore::new();
        let user = funded_user(&store, dec!(100)).await;

        let err = store
            .debit(entry(user.id, TransactionType::Withdrawal, dec!(150)))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, DatabaseErrorKind::InsufficientFunds { .. }));

        let after = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(after.balance, dec!(100));
        assert!(store
            .list_transactions(user.id, Page::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn credit_with_reference_is_idempotent() {
        let store = InMemoryStore::new();
        let user = funded_user(&store, dec!(0)).await;
        let mut credit = entry(user.id, TransactionType::Deposit, dec!(500));
        credit.reference_id = Some("RWK-1".to_string());
        credit.payment_provider = Some("paystack".to_string());

        let first = store.credit(credit.clone()).await.unwrap();
        let second = store.credit(credit).await.unwrap();
        assert!(matches!(first, CreditOutcome::Applied(_)));
        assert!(matches!(second, CreditOutcome::AlreadyApplied(_)));
        assert_eq!(first.transaction().id, second.transaction().id);

        let after = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(after.balance, dec!(500));
    }

    #[tokio::test]
    async fn pending_deposit_settles_once() {
        let store = InMemoryStore::new();
        let user = funded_user(&store, dec!(10)).await;
        store
            .create_pending_deposit(NewDeposit {
                user_id: user.id,
                amount: dec!(500),
                currency: "NGN".to_string(),
                payment_provider: "flutterwave".to_string(),
                reference_id: "DEP-1".to_string(),
                description: None,
                access_code: None,
            })
            .await
            .unwrap();

        let first = store.settle_deposit("flutterwave", "DEP-1").await.unwrap();
        let second = store.settle_deposit("flutterwave", "DEP-1").await.unwrap();
        let unknown = store.settle_deposit("paystack", "DEP-1").await.unwrap();

        match first {
            DepositSettlement::Credited(tx) => {
                assert_eq!(tx.balance_before, dec!(10));
                assert_eq!(tx.balance_after, dec!(510));
                assert_eq!(tx.status, TransactionStatus::Completed);
            }
            other => panic!("expected credit, got {:?}", other),
        }
        assert!(matches!(second, DepositSettlement::AlreadyCompleted(_)));
        assert_eq!(unknown, DepositSettlement::Unknown);
    }

    #[tokio::test]
    async fn transition_with_stale_version_is_rejected() {
        let store = InMemoryStore::new();
        let user = funded_user(&store, dec!(1000)).await;
        let (order, _) = store
            .create_order_with_payment(NewOrder {
                user_id: user.id,
                service_code: "wa".to_string(),
                country: "ng".to_string(),
                provider_id: "p1".to_string(),
                base_price: dec!(250),
                final_price: dec!(300),
                expires_at: Utc::now(),
            })
            .await
            .unwrap();

        let cancel = OrderTransition::new(&order, &OrderStatus::ACTIVE, OrderStatus::Cancelled)
            .with_refund("cancelled");
        let expire = OrderTransition::new(&order, &OrderStatus::ACTIVE, OrderStatus::Expired)
            .with_refund("expired");

        assert!(matches!(
            store.transition_order(cancel).await.unwrap(),
            TransitionOutcome::Applied { refund: Some(_), .. }
        ));
        match store.transition_order(expire).await.unwrap() {
            TransitionOutcome::Stale { current } => {
                assert_eq!(current.status, OrderStatus::Cancelled);
                assert_eq!(current.version, 2);
            }
            other => panic!("expected stale, got {:?}", other),
        }

        let refunds: Vec<_> = store
            .transactions_for_order(order.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|tx| tx.kind == TransactionType::Refund)
            .collect();
        assert_eq!(refunds.len(), 1);
        let after = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(after.balance, dec!(1000));
    }

    #[tokio::test]
    async fn non_positive_amounts_never_touch_the_balance() {
        let store = InMemoryStore::new();
        let user = funded_user(&store, dec!(100)).await;

        assert!(store
            .debit(entry(user.id, TransactionType::OrderPayment, dec!(-50)))
            .await
            .is_err());
        assert!(store
            .debit(entry(user.id, TransactionType::OrderPayment, dec!(0)))
            .await
            .is_err());
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().balance, dec!(100));
        assert!(store
            .list_transactions(user.id, Page::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn page_far_past_the_end_is_empty() {
        let store = InMemoryStore::new();
        let user = funded_user(&store, dec!(100)).await;
        store
            .debit(entry(user.id, TransactionType::Withdrawal, dec!(10)))
            .await
            .unwrap();

        let listed = store
            .list_transactions(user.id, Page::new(Some(u32::MAX), Some(100)))
            .await
            .unwrap();
        assert!(listed.is_empty());
    }
}
