use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchasedNumber {
    pub phone_number: String,
    pub external_order_id: String,
    /// Provider-side expiry; the default order TTL applies when absent
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PollStatus {
    pub code: Option<String>,
    /// The activation ended upstream; no code will arrive after this
    pub terminal: bool,
}

impl PollStatus {
    pub fn waiting() -> Self {
        Self::default()
    }

    pub fn received(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            terminal: true,
        }
    }

    pub fn ended() -> Self {
        Self {
            code: None,
            terminal: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOffer {
    pub service_code: String,
    pub country: String,
    pub cost: Decimal,
    pub available: u32,
}
