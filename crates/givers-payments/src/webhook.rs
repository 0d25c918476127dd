//! Webhook Event Parsing
//!
//! Decodes the provider's event envelope and classifies it into the handful
//! of events the donation lifecycle reacts to. No semantic validation happens
//! here; missing metadata is passed through as `None`.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::checkout::metadata;
use crate::error::Result;

/// Event envelope as sent by the provider
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub data: EventData,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub object: EventObject,
}

/// The subset of `data.object` fields the lifecycle reads
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventObject {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,

    /// Checkout sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_total: Option<i64>,

    /// Invoices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_paid: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,

    /// `payment` or `subscription` on checkout sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Subscription reference on checkout sessions and invoices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<ObjectRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_details: Option<SubscriptionDetails>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Non-null while a subscription's collection is paused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_collection: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub amount: Option<i64>,

    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDetails {
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: HashMap<String, String>,
}

/// A reference that may arrive as a bare id or as an expanded object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectRef {
    Id(String),
    Expanded { id: String },
}

impl ObjectRef {
    pub fn id(&self) -> &str {
        match self {
            ObjectRef::Id(id) | ObjectRef::Expanded { id } => id,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Donation details echoed back from checkout metadata
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DonationMetadata {
    pub project_id: Option<String>,
    pub donor_type: Option<String>,
    pub donor_id: Option<String>,
    pub message: Option<String>,
}

impl DonationMetadata {
    fn from_map(map: &HashMap<String, String>) -> Self {
        let get = |key: &str| map.get(key).filter(|v| !v.is_empty()).cloned();
        Self {
            project_id: get(metadata::PROJECT_ID),
            donor_type: get(metadata::DONOR_TYPE),
            donor_id: get(metadata::DONOR_ID),
            message: get(metadata::MESSAGE),
        }
    }

    fn is_empty(&self) -> bool {
        self.project_id.is_none() && self.donor_id.is_none()
    }
}

/// A provider-confirmed payment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub event_id: String,

    /// Payment id (one-off) or subscription id (recurring)
    pub reference: String,

    /// Minor units; `None` when the event carried no amount
    pub amount: Option<i64>,

    pub currency: Option<String>,

    pub metadata: DonationMetadata,
}

/// Provider-side subscription state reported by an update event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteSubscriptionState {
    Active,
    Paused,
    Cancelled,
}

/// Classified webhook event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    /// One-off payment confirmed
    PaymentSucceeded(PaymentConfirmation),

    /// Subscription created through checkout
    SubscriptionStarted(PaymentConfirmation),

    /// Recurring charge collected
    InvoicePaid(PaymentConfirmation),

    /// Provider changed a subscription (pause, resume, status)
    SubscriptionUpdated {
        event_id: String,
        subscription_id: String,
        state: RemoteSubscriptionState,
    },

    /// Subscription ended at the provider
    SubscriptionCancelled {
        event_id: String,
        subscription_id: String,
    },

    /// Unhandled event type
    Other { event_id: String, event_type: String },
}

impl WebhookEvent {
    pub fn event_id(&self) -> &str {
        match self {
            WebhookEvent::PaymentSucceeded(c)
            | WebhookEvent::SubscriptionStarted(c)
            | WebhookEvent::InvoicePaid(c) => &c.event_id,
            WebhookEvent::SubscriptionUpdated { event_id, .. }
            | WebhookEvent::SubscriptionCancelled { event_id, .. }
            | WebhookEvent::Other { event_id, .. } => event_id,
        }
    }

    /// Stable label for logs
    pub fn kind(&self) -> &str {
        match self {
            WebhookEvent::PaymentSucceeded(_) => "payment_succeeded",
            WebhookEvent::SubscriptionStarted(_) => "subscription_started",
            WebhookEvent::InvoicePaid(_) => "invoice_paid",
            WebhookEvent::SubscriptionUpdated { .. } => "subscription_updated",
            WebhookEvent::SubscriptionCancelled { .. } => "subscription_cancelled",
            WebhookEvent::Other { event_type, .. } => event_type,
        }
    }

    pub fn is_handled(&self) -> bool {
        !matches!(self, WebhookEvent::Other { .. })
    }
}

impl ProviderEvent {
    /// Decode an envelope from the raw request body
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Map the envelope onto the lifecycle's event set
    pub fn classify(self) -> WebhookEvent {
        let event_id = self.id;
        let event_type = self.event_type;
        let object = self.data.object;

        match event_type.as_str() {
            "payment_intent.succeeded" => WebhookEvent::PaymentSucceeded(PaymentConfirmation {
                event_id,
                reference: object.id,
                amount: object.amount,
                currency: object.currency,
                metadata: DonationMetadata::from_map(&object.metadata),
            }),

            "checkout.session.completed" if object.mode.as_deref() == Some("subscription") => {
                let Some(subscription) = object.subscription.as_ref().map(|s| s.id().to_string())
                else {
                    return WebhookEvent::Other {
                        event_id,
                        event_type: event_type.clone(),
                    };
                };
                WebhookEvent::SubscriptionStarted(PaymentConfirmation {
                    event_id,
                    reference: subscription,
                    amount: object.amount_total.or(object.amount),
                    currency: object.currency,
                    metadata: DonationMetadata::from_map(&object.metadata),
                })
            }

            "customer.subscription.created" => {
                let plan = object.plan.unwrap_or_default();
                WebhookEvent::SubscriptionStarted(PaymentConfirmation {
                    event_id,
                    reference: object.id,
                    amount: plan.amount.or(object.amount),
                    currency: plan.currency.or(object.currency),
                    metadata: DonationMetadata::from_map(&object.metadata),
                })
            }

            "invoice.paid" | "invoice.payment_succeeded" => {
                let Some(subscription) = object.subscription.as_ref().map(|s| s.id().to_string())
                else {
                    // One-off invoices are confirmed through payment_intent.succeeded
                    return WebhookEvent::Other {
                        event_id,
                        event_type: event_type.clone(),
                    };
                };
                let mut metadata = DonationMetadata::from_map(&object.metadata);
                if metadata.is_empty() {
                    if let Some(details) = &object.subscription_details {
                        metadata = DonationMetadata::from_map(&details.metadata);
                    }
                }
                WebhookEvent::InvoicePaid(PaymentConfirmation {
                    event_id,
                    reference: subscription,
                    amount: object
                        .amount_paid
                        .or(object.amount_total)
                        .or(object.amount),
                    currency: object.currency,
                    metadata,
                })
            }

            "customer.subscription.updated" => {
                let paused = object
                    .pause_collection
                    .as_ref()
                    .is_some_and(|p| !p.is_null());
                let state = match object.status.as_deref() {
                    Some("canceled" | "cancelled") => RemoteSubscriptionState::Cancelled,
                    _ if paused => RemoteSubscriptionState::Paused,
                    Some("paused") => RemoteSubscriptionState::Paused,
                    _ => RemoteSubscriptionState::Active,
                };
                WebhookEvent::SubscriptionUpdated {
                    event_id,
                    subscription_id: object.id,
                    state,
                }
            }

            "customer.subscription.deleted" | "customer.subscription.cancelled" => {
                WebhookEvent::SubscriptionCancelled {
                    event_id,
                    subscription_id: object.id,
                }
            }

            _ => WebhookEvent::Other {
                event_id,
                event_type: event_type.clone(),
            },
        }
    }
}

/// Decode and classify a raw webhook body
pub fn parse_event(raw: &[u8]) -> Result<WebhookEvent> {
    ProviderEvent::from_slice(raw).map(ProviderEvent::classify)
}
