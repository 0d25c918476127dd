//! Mock Gateway
//!
//! For tests and local demos. Records every call, returns a fixed checkout
//! URL and verifies webhook signatures for real against a known secret.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::checkout::CheckoutRequest;
use crate::error::{PaymentError, Result};
use crate::gateway::PaymentsGateway;
use crate::signature::verify_signature;

/// Secret the mock verifies webhooks with by default
pub const MOCK_WEBHOOK_SECRET: &str = "whsec_mock";

/// A call observed by [`MockGateway`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayCall {
    Checkout(CheckoutRequest),
    ExchangeCode(String),
    Pause(String),
    Resume(String),
    Cancel(String),
}

/// Mock gateway with scripted answers
pub struct MockGateway {
    webhook_secret: String,
    checkout_url_prefix: String,
    configured: bool,
    fail_subscription_calls: AtomicBool,
    sessions: AtomicUsize,
    calls: Mutex<Vec<GatewayCall>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// Checkout URLs come back as `https://pay.example/cs_<n>`
    pub fn new() -> Self {
        Self {
            webhook_secret: MOCK_WEBHOOK_SECRET.to_string(),
            checkout_url_prefix: "https://pay.example/cs_".to_string(),
            configured: true,
            fail_subscription_calls: AtomicBool::new(false),
            sessions: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A gateway with no credentials; every call fails with `ConfigMissing`
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    /// Replace the secret webhooks are verified against; empty means unset
    #[must_use]
    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = secret.into();
        self
    }

    pub fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }

    /// Make pause/resume/cancel fail with `UpstreamRejected`
    pub fn fail_subscription_calls(&self, fail: bool) {
        self.fail_subscription_calls.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().clone()
    }

    pub fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.lock()
            .iter()
            .filter_map(|c| match c {
                GatewayCall::Checkout(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<GatewayCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: GatewayCall) {
        self.lock().push(call);
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.configured {
            Ok(())
        } else {
            Err(PaymentError::ConfigMissing("PAYMENTS_SECRET_KEY"))
        }
    }

    fn subscription_call(&self, call: GatewayCall) -> Result<()> {
        self.ensure_configured()?;
        if self.fail_subscription_calls.load(Ordering::SeqCst) {
            return Err(PaymentError::UpstreamRejected(
                "subscription update rejected".into(),
            ));
        }
        self.record(call);
        Ok(())
    }
}

#[async_trait]
impl PaymentsGateway for MockGateway {
    fn is_configured(&self) -> bool {
        self.configured
    }

    fn onboarding_link(&self, project_id: &str, redirect_uri: &str) -> Result<String> {
        self.ensure_configured()?;
        Ok(format!(
            "https://connect.pay.example/oauth/authorize?state={project_id}&redirect_uri={redirect_uri}"
        ))
    }

    async fn exchange_account_code(&self, code: &str) -> Result<String> {
        self.ensure_configured()?;
        if code.is_empty() || code == "bad" {
            return Err(PaymentError::UpstreamRejected("invalid authorization code".into()));
        }
        self.record(GatewayCall::ExchangeCode(code.to_string()));
        Ok(format!("acct_{code}"))
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<String> {
        self.ensure_configured()?;
        self.record(GatewayCall::Checkout(request.clone()));
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{}{n}", self.checkout_url_prefix))
    }

    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        verify_signature(&self.webhook_secret, payload, signature_header, Utc::now())
    }

    async fn pause_subscription(&self, subscription_id: &str) -> Result<()> {
        self.subscription_call(GatewayCall::Pause(subscription_id.to_string()))
    }

    async fn resume_subscription(&self, subscription_id: &str) -> Result<()> {
        self.subscription_call(GatewayCall::Resume(subscription_id.to_string()))
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        self.subscription_call(GatewayCall::Cancel(subscription_id.to_string()))
    }
}
