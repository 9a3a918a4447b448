//! Upstream virtual-number providers.

pub mod error;
pub mod gateway;
pub mod provider;
pub mod providers;
pub mod types;

pub use error::{NumberProviderError, NumberResult};
pub use gateway::ProviderGateway;
pub use provider::NumberProvider;
pub use types::{PollStatus, PurchasedNumber, ServiceOffer};
