//! Etegram bank-transfer deposits.
//!
//! Etegram does not sign its callbacks. Each initialized payment gets an
//! access code that is stored on the pending deposit; a callback is only
//! honoured when it echoes that code and matches the recorded amount.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    decimal_from, string_from, user_id_from, DepositInstructions, DepositIntent, PaymentEvent,
    PaymentEventKind, ProviderName, WebhookVerification,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct EtegramConfig {
    pub public_key: String,
    pub project_id: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl EtegramConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let required = |key: &str| {
            std::env::var(key).map_err(|_| PaymentError::ConfigurationError {
                message: format!("{} environment variable is required", key),
            })
        };

        Ok(Self {
            public_key: required("ETEGRAM_PUBLIC_KEY")?,
            project_id: required("ETEGRAM_PROJECT_ID")?,
            base_url: std::env::var("ETEGRAM_BASE_URL")
                .unwrap_or_else(|_| "https://api-checkout.etegram.com/api".to_string()),
            timeout_secs: std::env::var("ETEGRAM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("ETEGRAM_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
        })
    }
}

pub struct EtegramProvider {
    config: EtegramConfig,
    http: PaymentHttpClient,
}

impl EtegramProvider {
    pub fn new(config: EtegramConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "etegram",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(EtegramConfig::from_env()?)
    }
}

#[async_trait]
impl PaymentGateway for EtegramProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Etegram
    }

    fn signature_header(&self) -> Option<&'static str> {
        None
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["NGN"]
    }

    async fn deposit_instructions(
        &self,
        intent: &DepositIntent,
    ) -> PaymentResult<DepositInstructions> {
        intent.amount.validate_positive("amount")?;

        let payload = serde_json::json!({
            "amount": intent.amount.amount.to_string(),
            "email": intent.email,
            "reference": intent.reference,
            "callbackUrl": intent.callback_url,
            "metadata": { "user_id": intent.user_id.to_string() },
        });

        let raw: EtegramEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &format!(
                    "{}/transaction/initialize/{}",
                    self.config.base_url, self.config.project_id
                ),
                Some(&self.config.public_key),
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        if !raw.status {
            return Err(PaymentError::provider(
                "etegram",
                raw.message.unwrap_or_else(|| "initialization rejected".to_string()),
            ));
        }
        let data = raw
            .data
            .ok_or_else(|| PaymentError::provider("etegram", "missing data in etegram response"))?;

        info!(reference = %intent.reference, "etegram deposit initialized");

        Ok(DepositInstructions {
            provider: ProviderName::Etegram,
            reference: intent.reference.clone(),
            payment_url: data.authorization_url,
            access_code: Some(data.access_code),
            provider_data: None,
        })
    }

    fn verify_webhook(&self, _payload: &[u8], _signature: Option<&str>) -> WebhookVerification {
        WebhookVerification::Deferred
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<PaymentEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::malformed(format!("invalid webhook JSON payload: {}", e)))?;

        let status = parsed
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_lowercase();
        let kind = match status.as_str() {
            "successful" | "success" => PaymentEventKind::Success,
            "failed" | "cancelled" | "abandoned" => PaymentEventKind::Failed,
            other => PaymentEventKind::Other(other.to_string()),
        };

        let mut event = PaymentEvent::new(ProviderName::Etegram, status, JsonValue::Null);
        event.kind = kind;
        event.reference = string_from(parsed.get("reference"));
        event.access_code = string_from(parsed.get("accessCode"));
        event.amount = decimal_from(parsed.get("amount"));
        event.currency = string_from(parsed.get("currency"));
        event.user_id = user_id_from(parsed.get("metadata"));
        event.payload = parsed;
        Ok(event)
    }
}

#[derive(Debug, Deserialize)]
struct EtegramEnvelope {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<EtegramInitializeData>,
}

#[derive(Debug, Deserialize)]
struct EtegramInitializeData {
    #[serde(rename = "accessCode", alias = "access_code")]
    access_code: String,
    #[serde(default, rename = "authorizationUrl", alias = "authorization_url")]
    authorization_url: Option<String>,
}
