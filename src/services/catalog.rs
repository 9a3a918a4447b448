//! Upstream service catalog and price import.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::keys::catalog::ServicesKey;
use crate::cache::Cache;
use crate::database::models::ProviderPrice;
use crate::database::store::LedgerStore;
use crate::error::AppResult;
use crate::numbers::{ProviderGateway, ServiceOffer};

const CATALOG_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn LedgerStore>,
    gateway: ProviderGateway,
    cache: Option<Arc<dyn Cache<Vec<ServiceOffer>>>>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn LedgerStore>, gateway: ProviderGateway) -> Self {
        Self {
            store,
            gateway,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache<Vec<ServiceOffer>>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// What the provider currently sells. Listings are cached for a few minutes.
    pub async fn list_services(&self, provider_id: &str) -> AppResult<Vec<ServiceOffer>> {
        let key = ServicesKey::new(provider_id).to_string();
        if let Some(cache) = &self.cache {
            match cache.get(&key).await {
                Ok(Some(offers)) => return Ok(offers),
                Ok(None) => {}
                Err(err) => warn!(provider = provider_id, error = %err, "catalog cache read failed"),
            }
        }

        let offers = self.gateway.list_available_services(provider_id).await?;
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.set(&key, &offers, Some(CATALOG_TTL)).await {
                warn!(provider = provider_id, error = %err, "catalog cache write failed");
            }
        }
        Ok(offers)
    }

    /// Copies upstream costs into the provider price table. Entries with no
    /// stock or a non-positive cost are skipped. Returns how many prices were written.
    pub async fn sync_prices(&self, provider_id: &str) -> AppResult<usize> {
        if let Some(cache) = &self.cache {
            let key = ServicesKey::new(provider_id).to_string();
            if let Err(err) = cache.delete(&key).await {
                warn!(provider = provider_id, error = %err, "catalog cache invalidation failed");
            }
        }

        let offers = self.list_services(provider_id).await?;
        let mut written = 0;
        for offer in offers.into_iter().filter(|o| o.available > 0) {
            if offer.cost <= Decimal::ZERO {
                warn!(
                    provider = provider_id,
                    service = %offer.service_code,
                    country = %offer.country,
                    cost = %offer.cost,
                    "skipping upstream price that is not positive"
                );
                continue;
            }
            self.store
                .upsert_provider_price(ProviderPrice {
                    provider_id: provider_id.to_string(),
                    service_code: offer.service_code,
                    country: offer.country,
                    base_cost: offer.cost,
                })
                .await?;
            written += 1;
        }
        info!(provider = provider_id, written, "provider prices synced");
        Ok(written)
    }
}
