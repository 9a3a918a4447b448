//! Stripe Checkout deposits.
//!
//! Deposits are Checkout Sessions whose `client_reference_id` is our
//! deposit reference. Webhooks are signed with the `Stripe-Signature` scheme:
//! `t=<unix>,v1=<hex hmac-sha256 of "{t}.{body}">`.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    decimal_from, from_minor_units, string_from, user_id_from, DepositInstructions, DepositIntent,
    PaymentEvent, PaymentEventKind, ProviderName, WebhookVerification,
};
use crate::payments::utils::{hmac_sha256_hex, secure_eq, PaymentHttpClient};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub success_url: String,
    pub cancel_url: String,
    pub tolerance_secs: i64,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl StripeConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let required = |key: &str| {
            std::env::var(key).map_err(|_| PaymentError::ConfigurationError {
                message: format!("{} environment variable is required", key),
            })
        };

        Ok(Self {
            secret_key: required("STRIPE_SECRET_KEY")?,
            webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            base_url: std::env::var("STRIPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string()),
            success_url: std::env::var("STRIPE_SUCCESS_URL")
                .unwrap_or_else(|_| "https://example.com/wallet?status=success".to_string()),
            cancel_url: std::env::var("STRIPE_CANCEL_URL")
                .unwrap_or_else(|_| "https://example.com/wallet?status=cancelled".to_string()),
            tolerance_secs: std::env::var("STRIPE_WEBHOOK_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(DEFAULT_TOLERANCE_SECS),
            timeout_secs: std::env::var("STRIPE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("STRIPE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
        })
    }
}

/// Checks a `Stripe-Signature` header against `payload` at time `now`.
pub fn verify_signature_header(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> WebhookVerification {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return WebhookVerification::Invalid("stripe signature has no timestamp".to_string());
    };
    if signatures.is_empty() {
        return WebhookVerification::Invalid("stripe signature has no v1 entry".to_string());
    }
    if (now - timestamp).abs() > tolerance_secs {
        return WebhookVerification::Invalid("stripe signature timestamp outside tolerance".to_string());
    }

    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);
    let Some(expected) = hmac_sha256_hex(secret.as_bytes(), &signed) else {
        return WebhookVerification::Invalid("unusable stripe webhook secret".to_string());
    };

    if signatures
        .iter()
        .any(|candidate| secure_eq(expected.as_bytes(), candidate.as_bytes()))
    {
        WebhookVerification::Valid
    } else {
        WebhookVerification::Invalid("invalid stripe signature".to_string())
    }
}

pub struct StripeProvider {
    config: StripeConfig,
    http: PaymentHttpClient,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "stripe",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }
}

#[async_trait]
impl PaymentGateway for StripeProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Stripe
    }

    fn signature_header(&self) -> Option<&'static str> {
        Some("stripe-signature")
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["USD", "EUR", "GBP", "NGN"]
    }

    async fn deposit_instructions(
        &self,
        intent: &DepositIntent,
    ) -> PaymentResult<DepositInstructions> {
        intent.amount.validate_positive("amount")?;
        let success_url = intent
            .callback_url
            .clone()
            .unwrap_or_else(|| self.config.success_url.clone());

        let form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("client_reference_id".into(), intent.reference.clone()),
            ("customer_email".into(), intent.email.clone()),
            ("success_url".into(), success_url),
            ("cancel_url".into(), self.config.cancel_url.clone()),
            ("line_items[0][quantity]".into(), "1".into()),
            (
                "line_items[0][price_data][currency]".into(),
                intent.amount.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                intent.amount.minor_units()?.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                "Wallet top-up".into(),
            ),
            ("metadata[user_id]".into(), intent.user_id.to_string()),
            ("metadata[reference]".into(), intent.reference.clone()),
        ];

        let session: StripeCheckoutSession = self
            .http
            .post_form(
                &format!("{}/checkout/sessions", self.config.base_url),
                &self.config.secret_key,
                &form,
            )
            .await?;

        info!(reference = %intent.reference, session_id = %session.id, "stripe checkout session created");

        Ok(DepositInstructions {
            provider: ProviderName::Stripe,
            reference: intent.reference.clone(),
            payment_url: session.url,
            access_code: None,
            provider_data: Some(serde_json::json!({ "session_id": session.id })),
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature: Option<&str>) -> WebhookVerification {
        match signature {
            Some(header) => verify_signature_header(
                payload,
                header,
                &self.config.webhook_secret,
                Utc::now().timestamp(),
                self.config.tolerance_secs,
            ),
            None => WebhookVerification::Invalid("missing stripe-signature".to_string()),
        }
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<PaymentEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::malformed(format!("invalid webhook JSON payload: {}", e)))?;

        let event_type = parsed
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let object = parsed
            .get("data")
            .and_then(|d| d.get("object"))
            .ok_or_else(|| PaymentError::malformed("stripe event has no data.object"))?;

        let paid = object.get("payment_status").and_then(|v| v.as_str()) == Some("paid");
        let kind = match event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" if paid => {
                PaymentEventKind::Success
            }
            "checkout.session.async_payment_failed" | "checkout.session.expired" => {
                PaymentEventKind::Failed
            }
            _ => PaymentEventKind::Other(event_type.clone()),
        };

        let metadata = object.get("metadata");
        let mut event = PaymentEvent::new(ProviderName::Stripe, event_type, JsonValue::Null);
        event.kind = kind;
        event.reference = string_from(object.get("client_reference_id"))
            .or_else(|| string_from(metadata.and_then(|m| m.get("reference"))));
        event.amount = decimal_from(object.get("amount_total"))
            .and_then(|minor| minor.to_i64())
            .map(from_minor_units);
        event.currency = string_from(object.get("currency")).map(|c| c.to_uppercase());
        event.user_id = user_id_from(metadata);
        event.payload = parsed;
        Ok(event)
    }
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SECRET: &str = "whsec_test";

    fn header_for(payload: &[u8], timestamp: i64) -> String {
        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(payload);
        format!(
            "t={},v1={}",
            timestamp,
            hmac_sha256_hex(SECRET.as_bytes(), &signed).unwrap()
        )
    }

    #[test]
    fn valid_signature_within_tolerance() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = header_for(payload, 1_700_000_000);
        assert_eq!(
            verify_signature_header(payload, &header, SECRET, 1_700_000_100, 300),
            WebhookVerification::Valid
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = header_for(payload, 1_700_000_000);
        assert!(matches!(
            verify_signature_header(payload, &header, SECRET, 1_700_000_301, 300),
            WebhookVerification::Invalid(_)
        ));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = header_for(br#"{"amount_total":100}"#, 1_700_000_000);
        assert!(matches!(
            verify_signature_header(br#"{"amount_total":999}"#, &header, SECRET, 1_700_000_000, 300),
            WebhookVerification::Invalid(_)
        ));
        assert!(matches!(
            verify_signature_header(b"{}", "v1=abc", SECRET, 0, 300),
            WebhookVerification::Invalid(_)
        ));
    }

    #[test]
    fn completed_session_is_parsed() {
        let provider = StripeProvider::new(StripeConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: SECRET.to_string(),
            base_url: "https://api.stripe.com/v1".to_string(),
            success_url: "https://example.com/ok".to_string(),
            cancel_url: "https://example.com/cancel".to_string(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            timeout_secs: 5,
            max_retries: 0,
        })
        .unwrap();
        let payload = br#"{
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_test_1",
                "client_reference_id": "DEP-9",
                "amount_total": 1999,
                "currency": "usd",
                "payment_status": "paid",
                "metadata": {"user_id": "6f1c1f7e-8a4e-4f7e-9a43-4b1f3b1f0c11"}
            }}
        }"#;
        let event = provider.parse_webhook_event(payload).unwrap();
        assert!(event.is_success());
        assert_eq!(event.reference.as_deref(), Some("DEP-9"));
        assert_eq!(event.amount, Some(dec!(19.99)));
        assert_eq!(event.currency.as_deref(), Some("USD"));
    }
}
