//! # givers-donations
//!
//! The donation lifecycle on top of [`givers_payments`] and [`givers_store`].
//!
//! ```text
//! donor ──checkout──▶ DonationService ──create_checkout──▶ provider
//!                                                            │
//!                  signed webhook ◀──────────────────────────┘
//!                        │
//!     verify ─▶ parse ─▶ [tx: ledger ─▶ insert_if_absent ─▶ milestone] ─▶ commit ─▶ activity
//! ```
//!
//! Replays are absorbed twice: by the processed-event ledger keyed on
//! `event.id`, and by the `(project_id, external_payment_id)` unique key.

mod activity;
mod error;
mod service;

pub use activity::{ActivityRecorder, DEFAULT_GLOBAL_FEED, MAX_GLOBAL_FEED, MAX_PROJECT_FEED};
pub use error::{DonationError, Result};
pub use service::{
    CheckoutInput, DonationService, MessageParams, Principal, WebhookOutcome, DEFAULT_LOCALE,
    HISTORY_LIMIT,
};
