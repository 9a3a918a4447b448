//! Client for the SMS-Activate `handler_api.php` protocol.
//!
//! Every action is a GET with `api_key` and `action` query parameters. Most
//! answers are plain text tokens (`ACCESS_NUMBER:id:phone`, `STATUS_OK:code`,
//! `NO_NUMBERS`); `getPrices` answers with JSON.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::SmsActivateConfig;
use crate::numbers::error::{NumberProviderError, NumberResult};
use crate::numbers::provider::NumberProvider;
use crate::numbers::types::{PollStatus, PurchasedNumber, ServiceOffer};

pub const PROVIDER_ID: &str = "sms-activate";

/// Answers that mean the request will never succeed as sent.
const TERMINAL_ANSWERS: &[&str] = &[
    "NO_NUMBERS",
    "NO_BALANCE",
    "BAD_SERVICE",
    "BAD_KEY",
    "BAD_ACTION",
    "BAD_STATUS",
    "NO_ACTIVATION",
    "WRONG_SERVICE",
    "BANNED",
];

/// Answers that mean the upstream is struggling right now.
const TRANSIENT_ANSWERS: &[&str] = &["ERROR_SQL", "ERROR_API", "SERVER_ERROR"];

fn classify_error(answer: &str) -> NumberProviderError {
    let token = answer.split(':').next().unwrap_or(answer).trim();
    if TRANSIENT_ANSWERS.contains(&token) {
        NumberProviderError::transient(PROVIDER_ID, token)
    } else if TERMINAL_ANSWERS.contains(&token) {
        NumberProviderError::terminal(PROVIDER_ID, token)
    } else {
        NumberProviderError::terminal(PROVIDER_ID, format!("UNEXPECTED_RESPONSE {}", token))
    }
}

pub(crate) fn parse_get_number(body: &str) -> NumberResult<PurchasedNumber> {
    let body = body.trim();
    match body.strip_prefix("ACCESS_NUMBER:") {
        Some(rest) => {
            let mut parts = rest.splitn(2, ':');
            match (parts.next(), parts.next()) {
                (Some(id), Some(phone)) if !id.is_empty() && !phone.is_empty() => {
                    Ok(PurchasedNumber {
                        phone_number: phone.to_string(),
                        external_order_id: id.to_string(),
                        expires_at: None,
                    })
                }
                _ => Err(classify_error(body)),
            }
        }
        None => Err(classify_error(body)),
    }
}

pub(crate) fn parse_status(body: &str) -> NumberResult<PollStatus> {
    let body = body.trim();
    if let Some(code) = body.strip_prefix("STATUS_OK:") {
        return Ok(PollStatus::received(code.trim()));
    }
    match body.split(':').next().unwrap_or(body) {
        "STATUS_WAIT_CODE" | "STATUS_WAIT_RETRY" | "STATUS_WAIT_RESEND" => {
            Ok(PollStatus::waiting())
        }
        "STATUS_CANCEL" => Ok(PollStatus::ended()),
        _ => Err(classify_error(body)),
    }
}

pub(crate) fn parse_cancel(body: &str) -> NumberResult<()> {
    match body.trim() {
        "ACCESS_CANCEL" | "ACCESS_CANCEL_ALREADY" => Ok(()),
        other => Err(classify_error(other)),
    }
}

/// `{"<country>": {"<service>": {"cost": 12.5, "count": 40}}}`
pub(crate) fn parse_prices(body: &JsonValue) -> NumberResult<Vec<ServiceOffer>> {
    let countries = body.as_object().ok_or_else(|| {
        NumberProviderError::terminal(PROVIDER_ID, "UNEXPECTED_RESPONSE prices")
    })?;

    let mut offers = Vec::new();
    for (country, services) in countries {
        let Some(services) = services.as_object() else {
            continue;
        };
        for (service_code, entry) in services {
            let cost = entry.get("cost").and_then(|c| match c {
                JsonValue::Number(n) => Decimal::from_str(&n.to_string()).ok(),
                JsonValue::String(s) => Decimal::from_str(s).ok(),
                _ => None,
            });
            let available = entry.get("count").and_then(|c| c.as_u64()).unwrap_or(0);
            if let Some(cost) = cost {
                offers.push(ServiceOffer {
                    service_code: service_code.clone(),
                    country: country.clone(),
                    cost,
                    available: available.min(u32::MAX as u64) as u32,
                });
            }
        }
    }
    offers.sort_by(|a, b| {
        (a.country.as_str(), a.service_code.as_str()).cmp(&(b.country.as_str(), b.service_code.as_str()))
    });
    Ok(offers)
}

pub struct SmsActivateProvider {
    api_key: String,
    base_url: String,
    client: Client,
}

impl SmsActivateProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> NumberResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NumberProviderError::transient(PROVIDER_ID, format!("failed to initialize HTTP client: {}", e)))?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            client,
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &SmsActivateConfig, timeout: Duration) -> NumberResult<Option<Self>> {
        match &config.api_key {
            Some(key) => Self::new(key.clone(), config.base_url.clone(), timeout).map(Some),
            None => Ok(None),
        }
    }

    async fn request(&self, params: &[(&str, &str)]) -> NumberResult<reqwest::Response> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|e| NumberProviderError::from_reqwest(PROVIDER_ID, e))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(NumberProviderError::transient(
                PROVIDER_ID,
                format!("HTTP {}", status.as_u16()),
            ));
        }
        if !status.is_success() {
            return Err(NumberProviderError::terminal(
                PROVIDER_ID,
                format!("HTTP_{}", status.as_u16()),
            ));
        }
        Ok(response)
    }

    async fn request_text(&self, params: &[(&str, &str)]) -> NumberResult<String> {
        self.request(params)
            .await?
            .text()
            .await
            .map_err(|e| NumberProviderError::from_reqwest(PROVIDER_ID, e))
    }
}

#[async_trait]
impl NumberProvider for SmsActivateProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    async fn list_available_services(&self) -> NumberResult<Vec<ServiceOffer>> {
        let text = self.request_text(&[("action", "getPrices")]).await?;
        match serde_json::from_str::<JsonValue>(&text) {
            Ok(json) => parse_prices(&json),
            Err(_) => Err(classify_error(&text)),
        }
    }

    async fn purchase_number(
        &self,
        service_code: &str,
        country: &str,
    ) -> NumberResult<PurchasedNumber> {
        let body = self
            .request_text(&[
                ("action", "getNumber"),
                ("service", service_code),
                ("country", country),
            ])
            .await?;
        let number = parse_get_number(&body)?;
        info!(
            provider = PROVIDER_ID,
            external_order_id = %number.external_order_id,
            service_code,
            country,
            "number purchased"
        );
        Ok(number)
    }

    async fn poll_status(&self, external_order_id: &str) -> NumberResult<PollStatus> {
        let body = self
            .request_text(&[("action", "getStatus"), ("id", external_order_id)])
            .await?;
        parse_status(&body)
    }

    async fn cancel(&self, external_order_id: &str) -> NumberResult<()> {
        let body = self
            .request_text(&[
                ("action", "setStatus"),
                ("status", "8"),
                ("id", external_order_id),
            ])
            .await?;
        parse_cancel(&body).inspect_err(|err| {
            warn!(provider = PROVIDER_ID, external_order_id, error = %err, "upstream cancel rejected");
        })
    }
}
