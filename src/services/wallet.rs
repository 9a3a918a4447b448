//! Wallet ledger operations.
//!
//! Balance mutation always goes through one [`LedgerStore`] unit, which reads
//! the balance, checks it and appends the ledger row together.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::models::{Transaction, TransactionType, User};
use crate::database::store::{CreditOutcome, LedgerEntry, LedgerStore, NewDeposit, Page};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};
use crate::payments::{DepositInstructions, DepositIntent, Money, PaymentGatewayFactory, ProviderName};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletBalance {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub currency: String,
}

/// Idempotency key of an externally sourced credit.
#[derive(Debug, Clone)]
pub struct ExternalRef {
    pub provider: String,
    pub reference: String,
}

#[derive(Clone)]
pub struct WalletService {
    store: Arc<dyn LedgerStore>,
    payments: Arc<PaymentGatewayFactory>,
}

fn ensure_positive(amount: Decimal) -> AppResult<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::invalid_amount(amount, "Amount must be positive"));
    }
    Ok(())
}

impl WalletService {
    pub fn new(store: Arc<dyn LedgerStore>, payments: Arc<PaymentGatewayFactory>) -> Self {
        Self { store, payments }
    }

    async fn user(&self, user_id: Uuid) -> AppResult<User> {
        self.store.find_user(user_id).await?.ok_or_else(|| {
            AppError::new(AppErrorKind::Domain(DomainError::UserNotFound {
                user_id: user_id.to_string(),
            }))
        })
    }

    pub async fn balance(&self, user_id: Uuid) -> AppResult<WalletBalance> {
        let user = self.user(user_id).await?;
        Ok(WalletBalance {
            user_id: user.id,
            balance: user.balance,
            currency: user.currency,
        })
    }

    pub async fn transactions(&self, user_id: Uuid, page: Page) -> AppResult<Vec<Transaction>> {
        Ok(self.store.list_transactions(user_id, page).await?)
    }

    /// Fails with `InsufficientBalance` when the balance read inside the unit is short.
    pub async fn debit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        kind: TransactionType,
        description: Option<String>,
    ) -> AppResult<Transaction> {
        ensure_positive(amount)?;
        if kind.is_credit() {
            return Err(AppError::invalid_field("type", format!("{} is not a debit", kind)));
        }
        let tx = self
            .store
            .debit(LedgerEntry {
                user_id,
                kind,
                amount,
                order_id: None,
                reference_id: None,
                payment_provider: None,
                description,
            })
            .await?;
        info!(%user_id, %amount, kind = %kind, balance_after = %tx.balance_after, "wallet debited");
        Ok(tx)
    }

    /// With an external reference the credit applies at most once.
    pub async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        kind: TransactionType,
        external_ref: Option<ExternalRef>,
        description: Option<String>,
    ) -> AppResult<CreditOutcome> {
        ensure_positive(amount)?;
        if !kind.is_credit() {
            return Err(AppError::invalid_field("type", format!("{} is not a credit", kind)));
        }
        let (payment_provider, reference_id) = match external_ref {
            Some(r) => (Some(r.provider), Some(r.reference)),
            None => (None, None),
        };
        let outcome = self
            .store
            .credit(LedgerEntry {
                user_id,
                kind,
                amount,
                order_id: None,
                reference_id,
                payment_provider,
                description,
            })
            .await?;
        match &outcome {
            CreditOutcome::Applied(tx) => {
                info!(%user_id, %amount, kind = %kind, balance_after = %tx.balance_after, "wallet credited")
            }
            CreditOutcome::AlreadyApplied(tx) => {
                info!(%user_id, transaction_id = %tx.id, "credit already applied")
            }
        }
        Ok(outcome)
    }

    /// Manual balance correction. Positive amounts credit, negative amounts debit.
    pub async fn adjust(&self, user_id: Uuid, amount: Decimal, reason: &str) -> AppResult<Transaction> {
        if reason.trim().is_empty() {
            return Err(AppError::invalid_field("reason", "A reason is required"));
        }
        let description = Some(format!("Admin adjustment: {}", reason.trim()));
        if amount.is_sign_negative() {
            self.debit(user_id, -amount, TransactionType::Withdrawal, description)
                .await
        } else {
            self.credit(user_id, amount, TransactionType::Deposit, None, description)
                .await
                .map(|outcome| outcome.transaction().clone())
        }
    }

    /// Initialises a gateway payment and records the pending deposit it will settle.
    pub async fn create_deposit(
        &self,
        user_id: Uuid,
        provider: ProviderName,
        amount: Decimal,
        callback_url: Option<String>,
    ) -> AppResult<DepositInstructions> {
        ensure_positive(amount)?;
        let user = self.user(user_id).await?;
        let gateway = self.payments.get(provider)?;
        if !gateway
            .supported_currencies()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&user.currency))
        {
            return Err(AppError::invalid_field(
                "provider",
                format!("{} does not accept {}", provider, user.currency),
            ));
        }

        let intent = DepositIntent {
            reference: format!("DEP-{}", Uuid::new_v4().simple()).to_uppercase(),
            user_id,
            email: user.email.clone(),
            amount: Money::new(amount, user.currency.clone()),
            callback_url,
        };
        let instructions = gateway.deposit_instructions(&intent).await?;

        if let Err(err) = self
            .store
            .create_pending_deposit(NewDeposit {
                user_id,
                amount,
                currency: user.currency,
                payment_provider: provider.as_str().to_string(),
                reference_id: instructions.reference.clone(),
                description: Some(format!("Deposit via {}", provider)),
                access_code: instructions.access_code.clone(),
            })
            .await
        {
            warn!(%user_id, reference = %instructions.reference, error = %err, "gateway payment initialised but pending deposit not recorded");
            return Err(err.into());
        }

        info!(%user_id, provider = %provider, reference = %instructions.reference, %amount, "deposit intent created");
        Ok(instructions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;
    use crate::database::models::UserRole;
    use crate::database::store::NewUser;
    use crate::error::ErrorCode;
    use rust_decimal_macros::dec;

    async fn setup(balance: Decimal) -> (WalletService, Uuid) {
        let store = InMemoryStore::new();
        let user = store
            .create_user(NewUser {
                email: "wallet@example.com".to_string(),
                role: UserRole::User,
                currency: "NGN".to_string(),
            })
            .await
            .unwrap();
        store.set_balance(user.id, balance).await.unwrap();
        let service = WalletService::new(Arc::new(store), Arc::new(PaymentGatewayFactory::default()));
        (service, user.id)
    }

    #[tokio::test]
    async fn debit_records_before_and_after() {
        let (wallet, user_id) = setup(dec!(1000)).await;
        let tx = wallet
            .debit(user_id, dec!(300), TransactionType::Withdrawal, None)
            .await
            .unwrap();
        assert_eq!(tx.balance_before, dec!(1000));
        assert_eq!(tx.balance_after, dec!(700));
        assert_eq!(wallet.balance(user_id).await.unwrap().balance, dec!(700));
    }

    #[tokio::test]
    async fn overdraft_is_insufficient_balance() {
        let (wallet, user_id) = setup(dec!(10)).await;
        let err = wallet
            .debit(user_id, dec!(11), TransactionType::Withdrawal, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InsufficientBalance);
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let (wallet, user_id) = setup(dec!(10)).await;
        let err = wallet
            .credit(user_id, dec!(0), TransactionType::Deposit, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn negative_adjustment_debits() {
        let (wallet, user_id) = setup(dec!(100)).await;
        let tx = wallet.adjust(user_id, dec!(-40), "chargeback").await.unwrap();
        assert_eq!(tx.kind, TransactionType::Withdrawal);
        assert_eq!(tx.balance_after, dec!(60));
        let tx = wallet.adjust(user_id, dec!(15), "goodwill").await.unwrap();
        assert_eq!(tx.kind, TransactionType::Deposit);
        assert_eq!(tx.balance_after, dec!(75));
    }

    #[tokio::test]
    async fn deposit_with_disabled_gateway_is_rejected() {
        let (wallet, user_id) = setup(dec!(0)).await;
        let err = wallet
            .create_deposit(user_id, ProviderName::Paystack, dec!(500), None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
