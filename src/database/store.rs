//! The transactional store contract.
//!
//! Every method is one atomic unit: it either applies all of its writes or
//! none of them. Balance checks happen inside the same unit as the balance
//! mutation, and order transitions are guarded by the order `version` plus the
//! set of statuses the caller expects the order to still be in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::models::{
    Order, OrderStatus, PricingRule, Provider, ProviderOffer, ProviderPrice, Transaction,
    TransactionType, User, UserRole,
};

pub type StoreResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub role: UserRole,
    pub currency: String,
}

/// A single balance mutation with its ledger row.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub user_id: Uuid,
    pub kind: TransactionType,
    pub amount: Decimal,
    pub order_id: Option<Uuid>,
    pub reference_id: Option<String>,
    pub payment_provider: Option<String>,
    pub description: Option<String>,
}

/// Result of a credit keyed on an external reference.
#[derive(Debug, Clone, PartialEq)]
pub enum CreditOutcome {
    Applied(Transaction),
    /// The reference was already settled; the existing row is returned untouched.
    AlreadyApplied(Transaction),
}

impl CreditOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            CreditOutcome::Applied(tx) | CreditOutcome::AlreadyApplied(tx) => tx,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_provider: String,
    pub reference_id: String,
    pub description: Option<String>,
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DepositSettlement {
    /// The pending deposit was completed and the balance credited.
    Credited(Transaction),
    /// The deposit had already been completed earlier.
    AlreadyCompleted(Transaction),
    /// No deposit exists for this provider/reference pair.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub service_code: String,
    pub country: String,
    pub provider_id: String,
    pub base_price: Decimal,
    pub final_price: Decimal,
    pub expires_at: DateTime<Utc>,
}

/// A guarded status change. Applied only when the stored order still has
/// `expected_version` and a status in `allowed_from`.
#[derive(Debug, Clone)]
pub struct OrderTransition {
    pub order_id: Uuid,
    pub expected_version: i64,
    pub allowed_from: Vec<OrderStatus>,
    pub to: OrderStatus,
    pub phone_number: Option<String>,
    pub external_order_id: Option<String>,
    pub sms_code: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// When set, a REFUND of the order's final price is appended in the same unit.
    pub refund_description: Option<String>,
}

impl OrderTransition {
    pub fn new(order: &Order, allowed_from: &[OrderStatus], to: OrderStatus) -> Self {
        Self {
            order_id: order.id,
            expected_version: order.version,
            allowed_from: allowed_from.to_vec(),
            to,
            phone_number: None,
            external_order_id: None,
            sms_code: None,
            expires_at: None,
            failure_reason: None,
            refund_description: None,
        }
    }

    pub fn with_refund(mut self, description: impl Into<String>) -> Self {
        self.refund_description = Some(description.into());
        self
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied {
        order: Order,
        refund: Option<Transaction>,
    },
    /// Someone else moved the order first; `current` is its state now.
    Stale { current: Order },
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    pub const MAX_PER_PAGE: u32 = 100;

    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(20).clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone)]
pub struct NewPricingRule {
    pub service_code: Option<String>,
    pub country: Option<String>,
    pub profit_type: crate::database::models::ProfitType,
    pub profit_value: Decimal,
    pub priority: i32,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    /// Fails with `InsufficientFunds` when the balance read inside the unit is below `amount`.
    async fn debit(&self, entry: LedgerEntry) -> StoreResult<Transaction>;

    /// Idempotent on `(payment_provider, reference_id)` when a reference is given.
    async fn credit(&self, entry: LedgerEntry) -> StoreResult<CreditOutcome>;

    async fn create_pending_deposit(&self, deposit: NewDeposit) -> StoreResult<Transaction>;

    /// Completes a pending deposit exactly once and credits its recorded amount.
    async fn settle_deposit(
        &self,
        payment_provider: &str,
        reference_id: &str,
    ) -> StoreResult<DepositSettlement>;

    async fn find_transaction_by_reference(
        &self,
        payment_provider: &str,
        reference_id: &str,
    ) -> StoreResult<Option<Transaction>>;

    async fn list_transactions(&self, user_id: Uuid, page: Page) -> StoreResult<Vec<Transaction>>;

    async fn transactions_for_order(&self, order_id: Uuid) -> StoreResult<Vec<Transaction>>;

    /// Debits `final_price`, appends the ORDER_PAYMENT row and inserts the
    /// order in PENDING, all in one unit.
    async fn create_order_with_payment(&self, order: NewOrder) -> StoreResult<(Order, Transaction)>;

    async fn find_order(&self, order_id: Uuid) -> StoreResult<Option<Order>>;

    async fn list_orders(&self, user_id: Uuid, page: Page) -> StoreResult<Vec<Order>>;

    async fn transition_order(&self, transition: OrderTransition)
        -> StoreResult<TransitionOutcome>;

    /// Active orders whose `expires_at` is at or before `now`, oldest first.
    async fn find_overdue_orders(&self, now: DateTime<Utc>, limit: u32) -> StoreResult<Vec<Order>>;

    async fn viable_offers(&self, service_code: &str, country: &str)
        -> StoreResult<Vec<ProviderOffer>>;

    async fn pricing_rules(&self, service_code: &str, country: &str)
        -> StoreResult<Vec<PricingRule>>;

    async fn upsert_provider(&self, provider: Provider) -> StoreResult<Provider>;

    async fn upsert_provider_price(&self, price: ProviderPrice) -> StoreResult<ProviderPrice>;

    async fn create_pricing_rule(&self, rule: NewPricingRule) -> StoreResult<PricingRule>;
}
