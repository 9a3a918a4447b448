use crate::payments::error::PaymentResult;
use crate::payments::types::{
    DepositInstructions, DepositIntent, PaymentEvent, ProviderName, WebhookVerification,
};
use async_trait::async_trait;

/// One external payment gateway: its outbound deposit initialisation and
/// its inbound webhook contract.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Header carrying the webhook signature, if the gateway signs at all.
    fn signature_header(&self) -> Option<&'static str>;

    fn supported_currencies(&self) -> &'static [&'static str];

    async fn deposit_instructions(&self, intent: &DepositIntent)
        -> PaymentResult<DepositInstructions>;

    /// Must not fail: every outcome is a verification verdict.
    fn verify_webhook(&self, payload: &[u8], signature: Option<&str>) -> WebhookVerification;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<PaymentEvent>;
}
