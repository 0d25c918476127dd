//! # givers-core
//!
//! Domain model shared by every layer of the GIVErS donation backend.
//!
//! ## Donation lifecycle
//!
//! ```text
//! ┌────────────┐   checkout    ┌────────────┐   webhook    ┌──────────────┐
//! │   Donor    │──────────────▶│  Provider  │─────────────▶│   Donation   │
//! │ user/token │               │  (hosted)  │              │ (+ activity) │
//! └────────────┘               └────────────┘              └──────────────┘
//!                                                                 │
//!                                          recurring only         ▼
//!                                   ┌────────┐ pause ┌────────┐ cancel ┌───────────┐
//!                                   │ active │──────▶│ paused │───────▶│ cancelled │
//!                                   └────────┘◀──────└────────┘        └───────────┘
//!                                               resume
//! ```
//!
//! Nothing in this crate performs I/O. The [`milestone`] module is a pure
//! function over a project's targets and its running monthly total.

pub mod activity;
pub mod donation;
pub mod error;
pub mod milestone;
pub mod project;
pub mod report;

pub use activity::{ActivityItem, ActivityKind};
pub use donation::{
    month_key, Donation, DonationPatch, Donor, DonorType, NewDonation, SubscriptionStatus,
    MAX_DONATION_AMOUNT, MAX_MESSAGE_CHARS, MAX_STORED_MESSAGE_CHARS,
};
pub use error::{ModelError, Result};
pub use milestone::{Milestone, MilestoneKind};
pub use project::{Project, ProjectStatus};
pub use report::{
    ChartPoint, DonationMessage, MessagePage, MessageQuery, MigrationOutcome, MonthlySum,
    SortOrder, ANONYMOUS_DONOR, DEFAULT_MESSAGE_PAGE, MAX_MESSAGE_PAGE,
};
