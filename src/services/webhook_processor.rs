//! Deposit intake from payment gateway callbacks.
//!
//! Idempotency is anchored on the pending deposit row: the first successful
//! callback for `(provider, reference)` completes it and credits the wallet,
//! every replay finds it already completed.

use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::models::{Transaction, TransactionStatus};
use crate::database::store::{DepositSettlement, LedgerStore};
use crate::error::AppError;
use crate::payments::utils::secure_eq;
use crate::payments::{PaymentEvent, PaymentGatewayFactory, ProviderName, WebhookVerification};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Webhook rejected for {provider}: {reason}")]
    Unauthorized { provider: String, reason: String },
    #[error("Malformed {provider} webhook: {message}")]
    Malformed { provider: String, message: String },
    #[error(transparent)]
    Internal(#[from] AppError),
}

impl WebhookProcessorError {
    pub fn status_code(&self) -> u16 {
        match self {
            WebhookProcessorError::UnknownProvider(_) => 404,
            WebhookProcessorError::Unauthorized { .. } => 401,
            WebhookProcessorError::Malformed { .. } => 400,
            WebhookProcessorError::Internal(err) => err.status_code(),
        }
    }
}

/// What a verified callback did.
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    Credited(Transaction),
    /// The deposit had been credited by an earlier delivery.
    Duplicate,
    /// Verified but nothing to do (non-success event, unknown reference).
    Ignored(String),
}

pub struct WebhookProcessor {
    store: Arc<dyn LedgerStore>,
    payments: Arc<PaymentGatewayFactory>,
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn LedgerStore>, payments: Arc<PaymentGatewayFactory>) -> Self {
        Self { store, payments }
    }

    /// The header carrying the gateway's signature, if the provider signs at all.
    pub fn signature_header(&self, provider_name: &str) -> Option<&'static str> {
        let provider = ProviderName::from_str(provider_name).ok()?;
        self.payments.get(provider).ok()?.signature_header()
    }

    pub async fn process_webhook(
        &self,
        provider_name: &str,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<IntakeOutcome, WebhookProcessorError> {
        let provider = ProviderName::from_str(provider_name)
            .map_err(|_| WebhookProcessorError::UnknownProvider(provider_name.to_string()))?;
        let gateway = self
            .payments
            .get(provider)
            .map_err(|_| WebhookProcessorError::UnknownProvider(provider_name.to_string()))?;

        let verification = gateway.verify_webhook(payload, signature);
        if let WebhookVerification::Invalid(reason) = &verification {
            warn!(provider = %provider, reason = %reason, "webhook signature rejected");
            return Err(WebhookProcessorError::Unauthorized {
                provider: provider.to_string(),
                reason: reason.clone(),
            });
        }

        let event = gateway
            .parse_webhook_event(payload)
            .map_err(|e| WebhookProcessorError::Malformed {
                provider: provider.to_string(),
                message: e.to_string(),
            })?;

        if !event.is_success() {
            info!(provider = %provider, event_type = %event.event_type, "non-success payment event ignored");
            return Ok(IntakeOutcome::Ignored(format!(
                "event {} is not a successful payment",
                event.event_type
            )));
        }

        let reference = event
            .reference
            .clone()
            .ok_or_else(|| WebhookProcessorError::Malformed {
                provider: provider.to_string(),
                message: "missing payment reference".to_string(),
            })?;

        let pending = self
            .store
            .find_transaction_by_reference(provider.as_str(), &reference)
            .await
            .map_err(AppError::from)?;
        let pending = match pending {
            Some(tx) => tx,
            None => {
                warn!(provider = %provider, reference = %reference, "payment for unknown deposit reference");
                return Ok(IntakeOutcome::Ignored(format!("unknown reference {}", reference)));
            }
        };
        if pending.status == TransactionStatus::Completed {
            info!(provider = %provider, reference = %reference, "deposit already credited");
            return Ok(IntakeOutcome::Duplicate);
        }

        if verification == WebhookVerification::Deferred {
            self.verify_access_code(&pending, &event)?;
        }
        Self::check_amount(&pending, &event)?;

        match self
            .store
            .settle_deposit(provider.as_str(), &reference)
            .await
            .map_err(AppError::from)?
        {
            DepositSettlement::Credited(tx) => {
                info!(
                    provider = %provider,
                    reference = %reference,
                    user_id = %tx.user_id,
                    amount = %tx.amount,
                    balance_after = %tx.balance_after,
                    "deposit credited"
                );
                Ok(IntakeOutcome::Credited(tx))
            }
            DepositSettlement::AlreadyCompleted(_) => Ok(IntakeOutcome::Duplicate),
            DepositSettlement::Unknown => {
                error!(provider = %provider, reference = %reference, "deposit vanished between lookup and settlement");
                Ok(IntakeOutcome::Ignored(format!("unknown reference {}", reference)))
            }
        }
    }

    fn verify_access_code(
        &self,
        pending: &Transaction,
        event: &PaymentEvent,
    ) -> Result<(), WebhookProcessorError> {
        let unauthorized = |reason: &str| WebhookProcessorError::Unauthorized {
            provider: event.provider.to_string(),
            reason: reason.to_string(),
        };
        let expected = pending
            .access_code
            .as_deref()
            .ok_or_else(|| unauthorized("no access code recorded for this deposit"))?;
        let received = event
            .access_code
            .as_deref()
            .ok_or_else(|| unauthorized("callback carries no access code"))?;
        if !secure_eq(expected.as_bytes(), received.as_bytes()) {
            warn!(provider = %event.provider, reference = ?event.reference, "access code mismatch");
            return Err(unauthorized("access code mismatch"));
        }
        Ok(())
    }

    fn check_amount(pending: &Transaction, event: &PaymentEvent) -> Result<(), WebhookProcessorError> {
        let malformed = |message: String| WebhookProcessorError::Malformed {
            provider: event.provider.to_string(),
            message,
        };
        if let Some(amount) = event.amount {
            if amount != pending.amount {
                return Err(malformed(format!(
                    "amount {} does not match deposit amount {}",
                    amount, pending.amount
                )));
            }
        }
        if let Some(currency) = &event.currency {
            if !currency.eq_ignore_ascii_case(&pending.currency) {
                return Err(malformed(format!(
                    "currency {} does not match deposit currency {}",
                    currency, pending.currency
                )));
            }
        }
        Ok(())
    }
}
