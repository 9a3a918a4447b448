use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    decimal_from, string_from, user_id_from, DepositInstructions, DepositIntent, PaymentEvent,
    PaymentEventKind, ProviderName, WebhookVerification,
};
use crate::payments::utils::{secure_eq, PaymentHttpClient};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl FlutterwaveConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key = std::env::var("FLUTTERWAVE_SECRET_KEY").map_err(|_| {
            PaymentError::ConfigurationError {
                message: "FLUTTERWAVE_SECRET_KEY environment variable is required".to_string(),
            }
        })?;

        Ok(Self {
            secret_key,
            webhook_secret: std::env::var("FLUTTERWAVE_WEBHOOK_SECRET")
                .ok()
                .or_else(|| std::env::var("FLUTTERWAVE_WEBHOOK_HASH").ok()),
            base_url: std::env::var("FLUTTERWAVE_BASE_URL")
                .unwrap_or_else(|_| "https://api.flutterwave.com/v3".to_string()),
            timeout_secs: std::env::var("FLUTTERWAVE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .or_else(|| {
                    std::env::var("PAYMENT_TIMEOUT_SECONDS")
                        .ok()
                        .and_then(|v| v.parse::<u64>().ok())
                })
                .unwrap_or(30),
            max_retries: std::env::var("FLUTTERWAVE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
        })
    }
}

pub struct FlutterwaveProvider {
    config: FlutterwaveConfig,
    http: PaymentHttpClient,
}

impl FlutterwaveProvider {
    pub fn new(config: FlutterwaveConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "flutterwave",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(FlutterwaveConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

#[async_trait]
impl PaymentGateway for FlutterwaveProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Flutterwave
    }

    fn signature_header(&self) -> Option<&'static str> {
        Some("verif-hash")
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["NGN", "GHS", "KES", "ZAR", "USD"]
    }

    async fn deposit_instructions(
        &self,
        intent: &DepositIntent,
    ) -> PaymentResult<DepositInstructions> {
        intent.amount.validate_positive("amount")?;
        if intent.email.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "email is required for flutterwave initialization".to_string(),
                field: Some("email".to_string()),
            });
        }

        let payload = serde_json::json!({
            "tx_ref": intent.reference,
            "amount": intent.amount.amount.to_string(),
            "currency": intent.amount.currency,
            "redirect_url": intent.callback_url,
            "payment_options": "card,banktransfer,ussd",
            "customer": { "email": intent.email },
            "meta": { "user_id": intent.user_id.to_string() },
            "customizations": { "title": "Wallet top-up" }
        });

        let raw: FlutterwaveEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/payments"),
                Some(&self.config.secret_key),
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        if raw.status.to_lowercase() != "success" {
            return Err(PaymentError::provider("flutterwave", raw.message));
        }

        let payment_link = raw
            .data
            .as_ref()
            .and_then(|v| v.get("link"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .ok_or_else(|| {
                PaymentError::provider("flutterwave", "missing payment link in flutterwave response")
            })?;

        info!(tx_ref = %intent.reference, "flutterwave deposit initialized");

        Ok(DepositInstructions {
            provider: ProviderName::Flutterwave,
            reference: intent.reference.clone(),
            payment_url: Some(payment_link),
            access_code: None,
            provider_data: None,
        })
    }

    fn verify_webhook(&self, _payload: &[u8], signature: Option<&str>) -> WebhookVerification {
        let Some(expected) = self.config.webhook_secret.as_deref() else {
            return WebhookVerification::Invalid(
                "FLUTTERWAVE_WEBHOOK_SECRET is not configured".to_string(),
            );
        };
        let Some(signature) = signature else {
            return WebhookVerification::Invalid("missing verif-hash".to_string());
        };
        if secure_eq(expected.trim().as_bytes(), signature.trim().as_bytes()) {
            WebhookVerification::Valid
        } else {
            WebhookVerification::Invalid("invalid flutterwave webhook hash".to_string())
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
            .ok_or_else(|| PaymentError::malformed("flutterwave event has no data"))?;

        let kind = match data
            .get("status")
            .and_then(|v| v.as_str())
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            Some("successful") if event_type == "charge.completed" => PaymentEventKind::Success,
            Some("failed") | Some("cancelled") => PaymentEventKind::Failed,
            _ => PaymentEventKind::Other(event_type.clone()),
        };

        let mut event = PaymentEvent::new(ProviderName::Flutterwave, event_type, JsonValue::Null);
        event.kind = kind;
        event.reference = string_from(data.get("tx_ref"));
        event.amount = decimal_from(data.get("amount"));
        event.currency = string_from(data.get("currency"));
        event.user_id = user_id_from(parsed.get("meta_data").or_else(|| data.get("meta")));
        event.payload = parsed;
        Ok(event)
    }
}

#[derive(Debug, Deserialize)]
struct FlutterwaveEnvelope {
    status: String,
    message: String,
    #[serde(default)]
    data: Option<JsonValue>,
}
