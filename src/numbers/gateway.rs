//! Registry of number providers with per-call timeout and bounded retry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::OrderConfig;
use crate::numbers::error::{NumberProviderError, NumberResult};
use crate::numbers::provider::NumberProvider;
use crate::numbers::types::{PollStatus, PurchasedNumber, ServiceOffer};

#[derive(Clone)]
pub struct ProviderGateway {
    providers: HashMap<String, Arc<dyn NumberProvider>>,
    call_timeout: Duration,
    max_attempts: u32,
}

impl ProviderGateway {
    pub fn new(call_timeout: Duration, max_attempts: u32) -> Self {
        Self {
            providers: HashMap::new(),
            call_timeout,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &OrderConfig) -> Self {
        Self::new(config.provider_call_timeout(), config.provider_max_attempts)
    }

    pub fn register(&mut self, provider: Arc<dyn NumberProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn NumberProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn provider(&self, provider_id: &str) -> NumberResult<Arc<dyn NumberProvider>> {
        self.providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| NumberProviderError::UnknownProvider {
                provider: provider_id.to_string(),
            })
    }

    /// Runs `op` under the call timeout, retrying transient failures up to `max_attempts`.
    async fn call<T, F, Fut>(&self, provider_id: &str, operation: &'static str, op: F) -> NumberResult<T>
    where
        F: Fn(Arc<dyn NumberProvider>) -> Fut,
        Fut: Future<Output = NumberResult<T>>,
    {
        let provider = self.provider(provider_id)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.call_timeout, op(provider.clone())).await {
                Ok(result) => result,
                Err(_) => Err(NumberProviderError::Timeout {
                    provider: provider_id.to_string(),
                    timeout_secs: self.call_timeout.as_secs(),
                }),
            };

            match result {
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        provider = %provider_id,
                        operation,
                        attempt,
                        error = %err,
                        "number provider call failed, retrying"
                    );
                }
                other => {
                    debug!(provider = %provider_id, operation, attempt, ok = other.is_ok(), "number provider call finished");
                    return other;
                }
            }
        }
    }

    pub async fn purchase_number(
        &self,
        provider_id: &str,
        service_code: &str,
        country: &str,
    ) -> NumberResult<PurchasedNumber> {
        self.call(provider_id, "purchase_number", |p| async move {
            p.purchase_number(service_code, country).await
        })
        .await
    }

    pub async fn poll_status(
        &self,
        provider_id: &str,
        external_order_id: &str,
    ) -> NumberResult<PollStatus> {
        self.call(provider_id, "poll_status", |p| async move {
            p.poll_status(external_order_id).await
        })
        .await
    }

    pub async fn cancel(&self, provider_id: &str, external_order_id: &str) -> NumberResult<()> {
        self.call(provider_id, "cancel", |p| async move {
            p.cancel(external_order_id).await
        })
        .await
    }

    pub async fn list_available_services(&self, provider_id: &str) -> NumberResult<Vec<ServiceOffer>> {
        self.call(provider_id, "list_available_services", |p| async move {
            p.list_available_services().await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
        fail_times: u32,
        terminal: bool,
        delay: Duration,
    }

    impl Flaky {
        fn new(fail_times: u32, terminal: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_times,
                terminal,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl NumberProvider for Flaky {
        fn id(&self) -> &str {
            "flaky"
        }

        async fn list_available_services(&self) -> NumberResult<Vec<ServiceOffer>> {
            Ok(vec![])
        }

        async fn purchase_number(&self, _service: &str, _country: &str) -> NumberResult<PurchasedNumber> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if call <= self.fail_times {
                return Err(if self.terminal {
                    NumberProviderError::terminal("flaky", "NO_NUMBERS")
                } else {
                    NumberProviderError::transient("flaky", "503")
                });
            }
            Ok(PurchasedNumber {
                phone_number: "+2348000000000".to_string(),
                external_order_id: format!("ext-{}", call),
                expires_at: None,
            })
        }

        async fn poll_status(&self, _id: &str) -> NumberResult<PollStatus> {
            Ok(PollStatus::waiting())
        }

        async fn cancel(&self, _id: &str) -> NumberResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let provider = Arc::new(Flaky::new(1, false));
        let gateway = ProviderGateway::new(Duration::from_secs(1), 2).with_provider(provider.clone());

        let number = gateway.purchase_number("flaky", "wa", "ng").await.unwrap();
        assert_eq!(number.external_order_id, "ext-2");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let provider = Arc::new(Flaky::new(5, true));
        let gateway = ProviderGateway::new(Duration::from_secs(1), 2).with_provider(provider.clone());

        let err = gateway.purchase_number("flaky", "wa", "ng").await.unwrap_err();
        assert!(matches!(err, NumberProviderError::Terminal { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let provider = Arc::new(Flaky::new(5, false));
        let gateway = ProviderGateway::new(Duration::from_secs(1), 2).with_provider(provider.clone());

        assert!(gateway.purchase_number("flaky", "wa", "ng").await.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let mut slow = Flaky::new(0, false);
        slow.delay = Duration::from_millis(200);
        let gateway = ProviderGateway::new(Duration::from_millis(20), 1).with_provider(Arc::new(slow));

        let err = gateway.purchase_number("flaky", "wa", "ng").await.unwrap_err();
        assert!(matches!(err, NumberProviderError::Timeout { .. }));
    }

    #[tokio::test]
    async fn unknown_provider_is_reported() {
        let gateway = ProviderGateway::new(Duration::from_secs(1), 2);
        let err = gateway.cancel("missing", "x").await.unwrap_err();
        assert_eq!(
            err,
            NumberProviderError::UnknownProvider {
                provider: "missing".to_string()
            }
        );
    }
}
