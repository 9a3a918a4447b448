//! Business logic over the ledger store and upstream providers

pub mod catalog;
pub mod orders;
pub mod pricing;
pub mod wallet;
pub mod webhook_processor;

pub use catalog::CatalogService;
pub use orders::{Actor, CreateOrderRequest, OrderService, RefreshOutcome};
pub use pricing::{PricedOffer, PricingService};
pub use wallet::{ExternalRef, WalletBalance, WalletService};
pub use webhook_processor::{IntakeOutcome, WebhookProcessor, WebhookProcessorError};
