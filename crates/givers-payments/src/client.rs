//! Stripe Client
//!
//! Talks to the provider over plain HTTPS with form-encoded bodies. Every call
//! carries the request timeout from [`StripeConfig`]; subscription changes go
//! through the [`RetryPolicy`].

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::checkout::CheckoutRequest;
use crate::error::{PaymentError, Result};
use crate::gateway::PaymentsGateway;
use crate::retry::RetryPolicy;
use crate::signature::verify_signature;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";
pub const DEFAULT_CONNECT_BASE: &str = "https://connect.stripe.com";

/// Longest upstream error message passed on to callers
const UPSTREAM_MESSAGE_CHARS: usize = 200;

/// Provider credentials and endpoints
#[derive(Clone, Debug)]
pub struct StripeConfig {
    /// Secret API key; empty disables every call
    pub secret_key: String,

    /// Webhook signing secret
    pub webhook_secret: String,

    /// Connect OAuth client id used for onboarding links
    pub connect_client_id: String,

    pub api_base: String,

    pub connect_base: String,

    /// Platform share on connected-account checkouts, 0-100
    pub platform_fee_percent: u8,

    /// Per-call timeout
    pub timeout: Duration,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: String::new(),
            connect_client_id: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            connect_base: DEFAULT_CONNECT_BASE.to_string(),
            platform_fee_percent: 0,
            timeout: Duration::from_secs(30),
        }
    }
}

impl StripeConfig {
    /// Read `PAYMENTS_*` variables. Missing credentials are left empty so the
    /// server can still start with payments disabled.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).unwrap_or_default().trim().to_string();
        let defaults = Self::default();

        let fee = var("PAYMENTS_PLATFORM_FEE_PERCENT");
        let platform_fee_percent = if fee.is_empty() {
            0
        } else {
            fee.parse::<u8>().map(|p| p.min(100)).unwrap_or_else(|_| {
                tracing::warn!(value = %fee, "Ignoring invalid PAYMENTS_PLATFORM_FEE_PERCENT");
                0
            })
        };

        let api_base = var("PAYMENTS_API_BASE");
        Self {
            secret_key: var("PAYMENTS_SECRET_KEY"),
            webhook_secret: var("PAYMENTS_WEBHOOK_SECRET"),
            connect_client_id: var("PAYMENTS_CONNECT_CLIENT_ID"),
            api_base: if api_base.is_empty() {
                defaults.api_base
            } else {
                api_base.trim_end_matches('/').to_string()
            },
            connect_base: defaults.connect_base,
            platform_fee_percent,
            timeout: defaults.timeout,
        }
    }
}

/// Stripe client wrapper
pub struct StripeClient {
    http: reqwest::Client,
    config: StripeConfig,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct SessionResponse {
    url: Option<String>,
}

#[derive(Deserialize)]
struct OAuthTokenResponse {
    stripe_user_id: Option<String>,
}

impl StripeClient {
    /// Create a new Stripe client
    pub fn new(config: StripeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            config,
            retry: RetryPolicy::default(),
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(StripeConfig::from_env())
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    fn secret_key(&self) -> Result<&str> {
        if self.config.secret_key.is_empty() {
            Err(PaymentError::ConfigMissing("PAYMENTS_SECRET_KEY"))
        } else {
            Ok(&self.config.secret_key)
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let key = self.secret_key()?;
        Ok(self
            .http
            .request(method, format!("{}{path}", self.config.api_base))
            .basic_auth(key, None::<&str>))
    }

    /// Send and decode, turning HTTP >= 400 into `UpstreamRejected`
    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status.is_client_error() || status.is_server_error() {
            return Err(PaymentError::UpstreamRejected(upstream_message(
                status.as_u16(),
                &body,
            )));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn update_subscription(
        &self,
        op: &str,
        method: Method,
        subscription_id: &str,
        form: &[(&str, &str)],
    ) -> Result<()> {
        let path = format!("/v1/subscriptions/{subscription_id}");
        let (this, path, method) = (self, path.as_str(), &method);
        self.retry
            .run(op, move || async move {
                let request = this.request(method.clone(), path)?.form(form);
                Self::send::<serde_json::Value>(request).await.map(|_| ())
            })
            .await?;
        tracing::info!(op, subscription_id, "Subscription updated at provider");
        Ok(())
    }
}

/// Pull the human-readable message out of a provider error body
pub fn upstream_message(status: u16, body: &[u8]) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .and_then(serde_json::Value::as_str)
            .or_else(|| v.get("error_description").and_then(serde_json::Value::as_str))
            .or_else(|| v.get("error").and_then(serde_json::Value::as_str))
    });
    let message = message.map_or_else(|| format!("HTTP {status}"), str::to_string);
    message.chars().take(UPSTREAM_MESSAGE_CHARS).collect()
}

#[async_trait]
impl PaymentsGateway for StripeClient {
    fn is_configured(&self) -> bool {
        !self.config.secret_key.is_empty()
    }

    fn onboarding_link(&self, project_id: &str, redirect_uri: &str) -> Result<String> {
        self.secret_key()?;
        if self.config.connect_client_id.is_empty() {
            return Err(PaymentError::ConfigMissing("PAYMENTS_CONNECT_CLIENT_ID"));
        }
        let url = Url::parse_with_params(
            &format!("{}/oauth/authorize", self.config.connect_base),
            &[
                ("response_type", "code"),
                ("client_id", self.config.connect_client_id.as_str()),
                ("scope", "read_write"),
                ("state", project_id),
                ("redirect_uri", redirect_uri),
            ],
        )
        .map_err(|e| PaymentError::Parse(e.to_string()))?;
        Ok(url.into())
    }

    async fn exchange_account_code(&self, code: &str) -> Result<String> {
        let key = self.secret_key()?;
        let request = self
            .http
            .post(format!("{}/oauth/token", self.config.connect_base))
            .basic_auth(key, None::<&str>)
            .form(&[("grant_type", "authorization_code"), ("code", code)]);

        let token: OAuthTokenResponse = Self::send(request).await?;
        token
            .stripe_user_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PaymentError::UpstreamRejected("no connected account returned".into()))
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<String> {
        let mut builder = self
            .request(Method::POST, "/v1/checkout/sessions")?
            .form(&request.form_params(self.config.platform_fee_percent));
        if let Some(account) = &request.connected_account_id {
            builder = builder.header("Stripe-Account", account);
        }

        let session: SessionResponse = Self::send(builder).await?;
        let url = session
            .url
            .ok_or_else(|| PaymentError::UpstreamRejected("no checkout url returned".into()))?;

        tracing::info!(
            project_id = %request.project_id,
            amount = request.amount,
            recurring = request.is_recurring,
            "Created checkout session"
        );
        Ok(url)
    }

    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        verify_signature(
            &self.config.webhook_secret,
            payload,
            signature_header,
            Utc::now(),
        )
    }

    async fn pause_subscription(&self, subscription_id: &str) -> Result<()> {
        self.update_subscription(
            "pause_subscription",
            Method::POST,
            subscription_id,
            &[("pause_collection[behavior]", "void")],
        )
        .await
    }

    async fn resume_subscription(&self, subscription_id: &str) -> Result<()> {
        self.update_subscription(
            "resume_subscription",
            Method::POST,
            subscription_id,
            &[("pause_collection", "")],
        )
        .await
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        self.update_subscription("cancel_subscription", Method::DELETE, subscription_id, &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> StripeClient {
        StripeClient::new(StripeConfig {
            secret_key: "sk_test_123".into(),
            webhook_secret: "whsec_test".into(),
            connect_client_id: "ca_123".into(),
            ..StripeConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_onboarding_link() {
        let link = configured()
            .onboarding_link("p1", "http://localhost:8080/payments/connect/callback")
            .unwrap();
        let url = Url::parse(&link).unwrap();
        assert_eq!(url.host_str(), Some("connect.stripe.com"));
        let params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(params.contains(&("state".into(), "p1".into())));
        assert!(params.contains(&("client_id".into(), "ca_123".into())));
        assert!(params.contains(&(
            "redirect_uri".into(),
            "http://localhost:8080/payments/connect/callback".into()
        )));
    }

    #[test]
    fn test_onboarding_needs_client_id() {
        let client = StripeClient::new(StripeConfig {
            secret_key: "sk_test_123".into(),
            ..StripeConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.onboarding_link("p1", "http://x"),
            Err(PaymentError::ConfigMissing("PAYMENTS_CONNECT_CLIENT_ID"))
        );
    }

    #[tokio::test]
    async fn test_unconfigured_client_never_calls_out() {
        let client = StripeClient::new(StripeConfig::default()).unwrap();
        assert!(!client.is_configured());
        assert_eq!(
            client.cancel_subscription("sub_9").await,
            Err(PaymentError::ConfigMissing("PAYMENTS_SECRET_KEY"))
        );
        assert_eq!(
            client.exchange_account_code("ac_1").await,
            Err(PaymentError::ConfigMissing("PAYMENTS_SECRET_KEY"))
        );
    }

    #[test]
    fn test_upstream_message() {
        let body = br#"{"error":{"message":"No such subscription: 'sub_x'","type":"invalid_request_error"}}"#;
        assert_eq!(upstream_message(404, body), "No such subscription: 'sub_x'");

        let oauth = br#"{"error":"invalid_grant","error_description":"Authorization code expired"}"#;
        assert_eq!(upstream_message(400, oauth), "Authorization code expired");

        assert_eq!(upstream_message(502, b"<html>"), "HTTP 502");

        let long = format!(r#"{{"error":{{"message":"{}"}}}}"#, "e".repeat(500));
        assert_eq!(upstream_message(400, long.as_bytes()).len(), 200);
    }

    #[test]
    fn test_verify_webhook_uses_configured_secret() {
        let client = configured();
        let body = br#"{"id":"evt_1"}"#;
        let header = crate::signature::sign_payload("whsec_test", Utc::now().timestamp(), body).unwrap();
        assert!(client.verify_webhook(body, &header).is_ok());
    }
}
