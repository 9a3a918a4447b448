use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{
    EtegramProvider, FlutterwaveProvider, PaystackProvider, StripeProvider,
};
use crate::payments::types::ProviderName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct PaymentFactoryConfig {
    pub default_provider: Option<ProviderName>,
    pub enabled_providers: Vec<ProviderName>,
}

impl PaymentFactoryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let enabled_raw = std::env::var("ENABLED_PAYMENT_PROVIDERS").unwrap_or_default();
        let mut enabled_providers = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let provider = ProviderName::from_str(value)?;
            if !enabled_providers.contains(&provider) {
                enabled_providers.push(provider);
            }
        }

        let default_provider = match std::env::var("DEFAULT_PAYMENT_PROVIDER") {
            Ok(value) => Some(ProviderName::from_str(&value)?),
            Err(_) => enabled_providers.first().copied(),
        };

        if let Some(default) = default_provider {
            if !enabled_providers.contains(&default) {
                return Err(PaymentError::ValidationError {
                    message: "default provider must be enabled".to_string(),
                    field: Some("DEFAULT_PAYMENT_PROVIDER".to_string()),
                });
            }
        }

        Ok(Self {
            default_provider,
            enabled_providers,
        })
    }
}

/// Registry of the payment gateways this deployment accepts deposits and
/// webhooks for. Built once at startup and shared.
#[derive(Clone, Default)]
pub struct PaymentGatewayFactory {
    config: PaymentFactoryConfig,
    gateways: HashMap<ProviderName, Arc<dyn PaymentGateway>>,
}

impl PaymentGatewayFactory {
    /// Constructs every enabled gateway from its own environment block.
    pub fn from_env() -> PaymentResult<Self> {
        let config = PaymentFactoryConfig::from_env()?;
        let mut factory = Self::with_config(config.clone());
        for provider in &config.enabled_providers {
            let gateway: Arc<dyn PaymentGateway> = match provider {
                ProviderName::Paystack => Arc::new(PaystackProvider::from_env()?),
                ProviderName::Flutterwave => Arc::new(FlutterwaveProvider::from_env()?),
                ProviderName::Etegram => Arc::new(EtegramProvider::from_env()?),
                ProviderName::Stripe => Arc::new(StripeProvider::from_env()?),
            };
            factory.gateways.insert(*provider, gateway);
        }
        info!(providers = ?config.enabled_providers, "payment gateways configured");
        Ok(factory)
    }

    pub fn with_config(config: PaymentFactoryConfig) -> Self {
        Self {
            config,
            gateways: HashMap::new(),
        }
    }

    /// Registers (and enables) an already constructed gateway.
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        let name = gateway.name();
        if !self.config.enabled_providers.contains(&name) {
            self.config.enabled_providers.push(name);
        }
        if self.config.default_provider.is_none() {
            self.config.default_provider = Some(name);
        }
        self.gateways.insert(name, gateway);
        self
    }

    pub fn get(&self, provider: ProviderName) -> PaymentResult<Arc<dyn PaymentGateway>> {
        if !self.config.enabled_providers.contains(&provider) {
            return Err(PaymentError::ValidationError {
                message: format!("provider {} is disabled", provider),
                field: Some("provider".to_string()),
            });
        }
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or_else(|| PaymentError::ConfigurationError {
                message: format!("provider {} is enabled but not constructed", provider),
            })
    }

    pub fn get_default(&self) -> PaymentResult<Arc<dyn PaymentGateway>> {
        let provider = self
            .config
            .default_provider
            .ok_or_else(|| PaymentError::ConfigurationError {
                message: "no payment provider is enabled".to_string(),
            })?;
        self.get(provider)
    }

    pub fn list_available_providers(&self) -> Vec<ProviderName> {
        self.config.enabled_providers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::providers::etegram::EtegramConfig;

    fn etegram() -> Arc<dyn PaymentGateway> {
        Arc::new(
            EtegramProvider::new(EtegramConfig {
                public_key: "pk".to_string(),
                project_id: "proj".to_string(),
                base_url: "http://localhost".to_string(),
                timeout_secs: 1,
                max_retries: 0,
            })
            .unwrap(),
        )
    }

    #[test]
    fn provider_name_parsing_works() {
        assert!(matches!(
            ProviderName::from_str("paystack"),
            Ok(ProviderName::Paystack)
        ));
        assert!(ProviderName::from_str("unknown").is_err());
    }

    #[test]
    fn registered_gateway_becomes_default() {
        let factory = PaymentGatewayFactory::default().with_gateway(etegram());
        assert_eq!(factory.list_available_providers(), vec![ProviderName::Etegram]);
        assert_eq!(factory.get_default().unwrap().name(), ProviderName::Etegram);
    }

    #[test]
    fn disabled_provider_is_rejected() {
        let factory = PaymentGatewayFactory::default().with_gateway(etegram());
        assert!(matches!(
            factory.get(ProviderName::Stripe),
            Err(PaymentError::ValidationError { .. })
        ));
    }

    #[test]
    fn empty_factory_has_no_default() {
        let factory = PaymentGatewayFactory::with_config(PaymentFactoryConfig::default());
        assert!(factory.get_default().is_err());
        assert!(factory.list_available_providers().is_empty());
    }
}
