use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    decimal_from, from_minor_units, string_from, user_id_from, DepositInstructions, DepositIntent,
    PaymentEvent, PaymentEventKind, ProviderName, WebhookVerification,
};
use crate::payments::utils::{verify_hmac_sha512_hex, PaymentHttpClient};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.paystack.co".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl PaystackConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key =
            std::env::var("PAYSTACK_SECRET_KEY").map_err(|_| PaymentError::ConfigurationError {
                message: "PAYSTACK_SECRET_KEY environment variable is required".to_string(),
            })?;

        Ok(Self {
            webhook_secret: std::env::var("PAYSTACK_WEBHOOK_SECRET").ok(),
            base_url: std::env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            timeout_secs: std::env::var("PAYSTACK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("PAYSTACK_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            secret_key,
        })
    }
}

pub struct PaystackProvider {
    config: PaystackConfig,
    http: PaymentHttpClient,
}

impl PaystackProvider {
    pub fn new(config: PaystackConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "paystack",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(PaystackConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

#[async_trait]
impl PaymentGateway for PaystackProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Paystack
    }

    fn signature_header(&self) -> Option<&'static str> {
        Some("x-paystack-signature")
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["NGN", "GHS", "ZAR", "USD"]
    }

    async fn deposit_instructions(
        &self,
        intent: &DepositIntent,
    ) -> PaymentResult<DepositInstructions> {
        intent.amount.validate_positive("amount")?;
        if intent.email.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "email is required for paystack initialization".to_string(),
                field: Some("email".to_string()),
            });
        }

        let payload = serde_json::json!({
            "email": intent.email,
            "amount": intent.amount.minor_units()?.to_string(),
            "currency": intent.amount.currency,
            "reference": intent.reference,
            "callback_url": intent.callback_url,
            "metadata": { "user_id": intent.user_id.to_string() },
        });

        let raw: PaystackEnvelope<PaystackInitializeData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transaction/initialize"),
                Some(&self.config.secret_key),
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        if !raw.status {
            return Err(PaymentError::provider("paystack", raw.message));
        }
        let data = raw.data;
        info!(reference = %data.reference, "paystack deposit initialized");

        Ok(DepositInstructions {
            provider: ProviderName::Paystack,
            reference: data.reference,
            payment_url: Some(data.authorization_url),
            access_code: Some(data.access_code),
            provider_data: None,
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature: Option<&str>) -> WebhookVerification {
        let Some(signature) = signature else {
            return WebhookVerification::Invalid("missing x-paystack-signature".to_string());
        };
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.config.secret_key);
        if verify_hmac_sha512_hex(payload, secret, signature) {
            WebhookVerification::Valid
        } else {
            WebhookVerification::Invalid("invalid paystack signature".to_string())
        }
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<PaymentEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::malformed(format!("invalid webhook JSON payload: {}", e)))?;

        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = parsed
            .get("data")
            .ok_or_else(|| PaymentError::malformed("paystack event has no data"))?;

        let status = data.get("status").and_then(|v| v.as_str()).unwrap_or("");
        let kind = match (event_type.as_str(), status) {
            ("charge.success", "success") => PaymentEventKind::Success,
            (_, "failed") | ("charge.failed", _) => PaymentEventKind::Failed,
            _ => PaymentEventKind::Other(event_type.clone()),
        };
        // Paystack reports kobo.
        let amount = decimal_from(data.get("amount"))
            .and_then(|kobo| kobo.to_i64())
            .map(from_minor_units);

        let mut event = PaymentEvent::new(ProviderName::Paystack, event_type, JsonValue::Null);
        event.kind = kind;
        event.reference = string_from(data.get("reference"));
        event.amount = amount;
        event.currency = string_from(data.get("currency"));
        event.user_id = user_id_from(data.get("metadata"));
        event.payload = parsed;
        Ok(event)
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    message: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}
