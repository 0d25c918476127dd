//! Hosted Checkout Sessions
//!
//! Form encoding for the provider's hosted checkout. The donation details
//! travel as session metadata and come back on the confirming webhook.

use serde::{Deserialize, Serialize};

/// Metadata keys carried from checkout to webhook
pub mod metadata {
    pub const PROJECT_ID: &str = "project_id";
    pub const DONOR_TYPE: &str = "donor_type";
    pub const DONOR_ID: &str = "donor_id";
    pub const IS_RECURRING: &str = "is_recurring";
    pub const MESSAGE: &str = "message";
}

/// Longest message copied into provider metadata
pub const METADATA_MESSAGE_CHARS: usize = 500;

/// Request to create a checkout session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Connected account receiving the funds, sent as `Stripe-Account`
    pub connected_account_id: Option<String>,

    pub project_id: String,

    /// Minor currency units
    pub amount: i64,

    /// Lowercase ISO code
    pub currency: String,

    pub is_recurring: bool,

    pub message: Option<String>,

    pub locale: String,

    pub success_url: String,

    pub cancel_url: String,

    /// `user` or `token`
    pub donor_type: String,

    pub donor_id: String,
}

impl CheckoutRequest {
    /// Form body for `POST /v1/checkout/sessions`.
    ///
    /// `fee_percent` is the platform share applied when the funds go to a
    /// connected account.
    pub fn form_params(&self, fee_percent: u8) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = Vec::with_capacity(24);
        let mut push = |k: &str, v: String| form.push((k.to_string(), v));

        let (mode, product, intent_data) = if self.is_recurring {
            ("subscription", "Monthly support", "subscription_data")
        } else {
            ("payment", "Donation", "payment_intent_data")
        };

        push("mode", mode.into());
        push("line_items[0][quantity]", "1".into());
        push("line_items[0][price_data][currency]", self.currency.clone());
        push("line_items[0][price_data][unit_amount]", self.amount.to_string());
        push("line_items[0][price_data][product_data][name]", product.into());
        if self.is_recurring {
            push("line_items[0][price_data][recurring][interval]", "month".into());
        }
        push("success_url", self.success_url.clone());
        push("cancel_url", self.cancel_url.clone());
        if !self.locale.is_empty() {
            push("locale", self.locale.clone());
        }

        // Session metadata reaches checkout.session.completed; the copy on the
        // payment intent / subscription reaches the later payment events.
        for (key, value) in self.metadata() {
            push(&format!("metadata[{key}]"), value.clone());
            push(&format!("{intent_data}[metadata][{key}]"), value);
        }

        if self.connected_account_id.is_some() && fee_percent > 0 {
            if self.is_recurring {
                push(
                    "subscription_data[application_fee_percent]",
                    fee_percent.to_string(),
                );
            } else {
                push(
                    "payment_intent_data[application_fee_amount]",
                    self.application_fee(fee_percent).to_string(),
                );
            }
        }

        form
    }

    /// Platform share of a one-off donation, rounded down
    pub fn application_fee(&self, fee_percent: u8) -> i64 {
        self.amount * i64::from(fee_percent) / 100
    }

    fn metadata(&self) -> Vec<(&'static str, String)> {
        let mut meta = vec![
            (metadata::PROJECT_ID, self.project_id.clone()),
            (metadata::DONOR_TYPE, self.donor_type.clone()),
            (metadata::DONOR_ID, self.donor_id.clone()),
            (metadata::IS_RECURRING, self.is_recurring.to_string()),
        ];
        if let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) {
            meta.push((
                metadata::MESSAGE,
                message.chars().take(METADATA_MESSAGE_CHARS).collect(),
            ));
        }
        meta
    }
}
