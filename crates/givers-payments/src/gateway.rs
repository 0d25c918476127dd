//! Payments Gateway Seam
//!
//! Everything the donation lifecycle needs from the provider. Implementations
//! translate to and from the wire protocol and never persist anything.

use async_trait::async_trait;

use crate::checkout::CheckoutRequest;
use crate::error::Result;
use crate::webhook::WebhookEvent;

#[async_trait]
pub trait PaymentsGateway: Send + Sync {
    /// Whether a provider secret key is configured
    fn is_configured(&self) -> bool;

    /// Connect onboarding URL for a project owner. `project_id` comes back as
    /// the OAuth `state`.
    fn onboarding_link(&self, project_id: &str, redirect_uri: &str) -> Result<String>;

    /// Exchange an onboarding authorization code for the connected account id
    async fn exchange_account_code(&self, code: &str) -> Result<String>;

    /// Create a hosted checkout and return its redirect URL
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<String>;

    /// Check a webhook signature header against the exact body bytes
    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<()>;

    /// Decode and classify a webhook body
    fn parse_event(&self, payload: &[u8]) -> Result<WebhookEvent> {
        crate::webhook::parse_event(payload)
    }

    async fn pause_subscription(&self, subscription_id: &str) -> Result<()>;

    async fn resume_subscription(&self, subscription_id: &str) -> Result<()>;

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()>;
}
