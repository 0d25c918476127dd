//! # givers-payments
//!
//! Gateway to the external payments provider for the GIVErS donation backend.
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────┐  checkout   ┌─────────────────┐  redirect  ┌─────────────┐
//! │  Frontend   │────────────▶│  Provider hosted │──────────▶│  Frontend   │
//! │  (project)  │             │  checkout page   │           │ ?donation=ok│
//! └─────────────┘             └────────┬────────┘           └─────────────┘
//!                                      │ signed webhook
//!                                      ▼
//!                             ┌─────────────────┐
//!                             │ verify → parse  │──▶ DonationService
//!                             └─────────────────┘
//! ```
//!
//! The gateway knows the provider's wire protocol and nothing about projects,
//! donors or activity. Checkout metadata is opaque text that comes back on the
//! confirming webhook.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use givers_payments::{PaymentsGateway, StripeClient};
//!
//! let client = StripeClient::from_env()?;
//! client.verify_webhook(&raw_body, signature_header)?;
//! let event = client.parse_event(&raw_body)?;
//! ```

mod checkout;
mod client;
mod error;
mod gateway;
mod mock;
mod retry;
mod signature;
mod webhook;

pub use checkout::{metadata, CheckoutRequest, METADATA_MESSAGE_CHARS};
pub use client::{upstream_message, StripeClient, StripeConfig, DEFAULT_API_BASE};
pub use error::{PaymentError, Result};
pub use gateway::PaymentsGateway;
pub use mock::{GatewayCall, MockGateway, MOCK_WEBHOOK_SECRET};
pub use retry::RetryPolicy;
pub use signature::{sign_payload, verify_signature, SignatureHeader, SIGNATURE_TOLERANCE_SECS};
pub use webhook::{
    parse_event, DonationMetadata, PaymentConfirmation, ProviderEvent, RemoteSubscriptionState,
    WebhookEvent,
};
