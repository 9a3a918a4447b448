use async_trait::async_trait;

use crate::numbers::error::NumberResult;
use crate::numbers::types::{PollStatus, PurchasedNumber, ServiceOffer};

/// Capability interface every upstream number provider implements.
#[async_trait]
pub trait NumberProvider: Send + Sync {
    /// Matches `Provider.id` in the catalog.
    fn id(&self) -> &str;

    async fn list_available_services(&self) -> NumberResult<Vec<ServiceOffer>>;

    async fn purchase_number(&self, service_code: &str, country: &str)
        -> NumberResult<PurchasedNumber>;

    async fn poll_status(&self, external_order_id: &str) -> NumberResult<PollStatus>;

    async fn cancel(&self, external_order_id: &str) -> NumberResult<()>;
}
