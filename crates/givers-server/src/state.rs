//! Application State

use std::sync::Arc;

use givers_donations::DonationService;

use crate::auth::SessionKeys;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Donation lifecycle
    pub donations: Arc<DonationService>,

    /// Session token verification
    pub sessions: Arc<SessionKeys>,

    /// `postgres` or `memory`, reported by `/health`
    pub storage: &'static str,

    /// Onboarding callback handed to the provider
    pub connect_redirect_uri: Arc<str>,
}
