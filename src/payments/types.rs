use crate::payments::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Paystack,
    Flutterwave,
    Etegram,
    Stripe,
}

impl ProviderName {
    pub const ALL: [ProviderName; 4] = [
        ProviderName::Paystack,
        ProviderName::Flutterwave,
        ProviderName::Etegram,
        ProviderName::Stripe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Paystack => "paystack",
            ProviderName::Flutterwave => "flutterwave",
            ProviderName::Etegram => "etegram",
            ProviderName::Stripe => "stripe",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "paystack" => Ok(ProviderName::Paystack),
            "flutterwave" => Ok(ProviderName::Flutterwave),
            "etegram" => Ok(ProviderName::Etegram),
            "stripe" => Ok(ProviderName::Stripe),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Amount in major currency units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        if self.amount <= Decimal::ZERO {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }

    /// Kobo, cents and friends. Fractions below the minor unit are rounded.
    pub fn minor_units(&self) -> Result<i64, PaymentError> {
        use rust_decimal::prelude::ToPrimitive;

        (self.amount * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("amount {} is out of range", self.amount),
                field: Some("amount".to_string()),
            })
    }
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2).normalize()
}

/// What we ask a gateway to collect before a pending deposit is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositIntent {
    pub reference: String,
    pub user_id: Uuid,
    pub email: String,
    pub amount: Money,
    pub callback_url: Option<String>,
}

/// Gateway-specific payload handed back to the client to complete payment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepositInstructions {
    pub provider: ProviderName,
    pub reference: String,
    pub payment_url: Option<String>,
    /// Not returned to clients; echoed back by gateways without signatures.
    #[serde(skip_serializing, default)]
    pub access_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_data: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookVerification {
    Valid,
    Invalid(String),
    /// The gateway signs nothing; authenticity is checked against the stored intent.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventKind {
    Success,
    Failed,
    Other(String),
}

/// A webhook body reduced to the fields the ledger cares about.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub provider: ProviderName,
    pub event_type: String,
    pub kind: PaymentEventKind,
    pub reference: Option<String>,
    /// Major units.
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub user_id: Option<Uuid>,
    pub access_code: Option<String>,
    pub payload: JsonValue,
    pub received_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn new(provider: ProviderName, event_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            provider,
            event_type: event_type.into(),
            kind: PaymentEventKind::Other("unknown".to_string()),
            reference: None,
            amount: None,
            currency: None,
            user_id: None,
            access_code: None,
            payload,
            received_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == PaymentEventKind::Success
    }
}

/// Reads `metadata.user_id` style fields that gateways echo back.
pub(crate) fn user_id_from(metadata: Option<&JsonValue>) -> Option<Uuid> {
    metadata
        .and_then(|m| m.get("user_id"))
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Numbers arrive as JSON numbers or strings depending on the gateway.
pub(crate) fn decimal_from(value: Option<&JsonValue>) -> Option<Decimal> {
    match value? {
        JsonValue::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

pub(crate) fn string_from(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
