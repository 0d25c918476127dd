//! HTTP Handlers

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Redirect,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use givers_core::{ActivityItem, ChartPoint, Donation, DonationPatch, Donor, MessagePage};
use givers_donations::{CheckoutInput, DonationError, MessageParams};

use crate::auth::{cookie, AuthUser, MaybeUser, DONOR_TOKEN_COOKIE};
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::AppState;

/// Header carrying the provider's webhook signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub payments_configured: bool,
    pub storage: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub project_id: String,
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    /// Anonymous donor id, used when no session is present
    #[serde(default)]
    pub donor_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
}

#[derive(Serialize)]
pub struct DonationsResponse {
    pub donations: Vec<Donation>,
}

#[derive(Serialize)]
pub struct ChartResponse {
    pub chart: Vec<ChartPoint>,
}

#[derive(Serialize)]
pub struct ActivityResponse {
    pub activities: Vec<ActivityItem>,
}

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectCallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

fn ok() -> Json<Value> {
    Json(json!({"ok": true}))
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        payments_configured: state.donations.payments_configured(),
        storage: state.storage,
    })
}

/// `POST /donations/checkout`
pub async fn create_checkout(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    ApiJson(body): ApiJson<CheckoutBody>,
) -> ApiResult<CheckoutResponse> {
    let donor = match (user, body.donor_token) {
        (Some(principal), _) => Donor::User(principal.user_id),
        (None, Some(token)) if !token.trim().is_empty() => Donor::Token(token.trim().to_string()),
        (None, _) => {
            return Err(DonationError::ValidationFailed("donor_token_missing".into()).into());
        }
    };

    let checkout_url = state
        .donations
        .checkout(CheckoutInput {
            project_id: body.project_id,
            amount: body.amount,
            currency: body.currency,
            is_recurring: body.is_recurring,
            message: body.message,
            locale: body.locale,
            donor,
        })
        .await?;
    Ok(Json(CheckoutResponse { checkout_url }))
}

/// `POST /webhooks/payments`; the body is taken as raw bytes so the
/// signature is checked against exactly what the provider sent
pub async fn payments_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Value> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Webhook without signature header");
            ApiError(DonationError::Unauthorized)
        })?;

    state.donations.handle_webhook(&body, signature).await?;
    Ok(Json(json!({"received": true})))
}

/// `GET /me/donations`
pub async fn my_donations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<DonationsResponse> {
    let donations = state.donations.list_for_user(&user.user_id).await?;
    Ok(Json(DonationsResponse { donations }))
}

/// `PATCH /me/donations/{id}`
pub async fn update_donation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(donation_id): Path<String>,
    ApiJson(patch): ApiJson<DonationPatch>,
) -> ApiResult<Value> {
    state
        .donations
        .patch(&donation_id, &user.user_id, &patch)
        .await?;
    Ok(ok())
}

/// `DELETE /me/donations/{id}`
pub async fn delete_donation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(donation_id): Path<String>,
) -> ApiResult<Value> {
    state.donations.delete(&donation_id, &user.user_id).await?;
    Ok(ok())
}

/// `POST /me/migrate-from-token`
pub async fn migrate_from_token(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
) -> ApiResult<givers_core::MigrationOutcome> {
    let token = cookie(&headers, DONOR_TOKEN_COOKIE).unwrap_or_default();
    let outcome = state
        .donations
        .migrate_token(&token, &user.user_id)
        .await?;
    Ok(Json(outcome))
}

/// `GET /projects/{id}/messages`
pub async fn project_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(project_id): Path<String>,
    Query(params): Query<MessageParams>,
) -> ApiResult<MessagePage> {
    let page = state
        .donations
        .list_project_messages(&project_id, &user, &params.into())
        .await?;
    Ok(Json(page))
}

/// `GET /projects/{id}/chart`
pub async fn project_chart(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<ChartResponse> {
    let chart = state.donations.chart(&project_id).await?;
    Ok(Json(ChartResponse { chart }))
}

/// `GET /activity`
pub async fn activity_feed(
    State(state): State<AppState>,
    Query(params): Query<FeedParams>,
) -> ApiResult<ActivityResponse> {
    let activities = state.donations.activity().global_feed(params.limit).await?;
    Ok(Json(ActivityResponse { activities }))
}

/// `GET /projects/{id}/activity`
pub async fn project_activity(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(params): Query<FeedParams>,
) -> ApiResult<ActivityResponse> {
    let activities = state
        .donations
        .activity()
        .project_feed(&project_id, params.limit)
        .await?;
    Ok(Json(ActivityResponse { activities }))
}

/// `GET /projects/{id}/payments/onboarding`
pub async fn onboarding_link(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(project_id): Path<String>,
) -> ApiResult<Value> {
    let url = state
        .donations
        .onboarding_link(&project_id, &user, &state.connect_redirect_uri)
        .await?;
    Ok(Json(json!({"onboarding_url": url})))
}

/// `GET /payments/connect/callback`
pub async fn connect_callback(
    State(state): State<AppState>,
    Query(params): Query<ConnectCallbackParams>,
) -> Redirect {
    let url = state
        .donations
        .complete_onboarding(
            params.code.as_deref().unwrap_or_default(),
            params.state.as_deref().unwrap_or_default(),
        )
        .await;
    Redirect::to(&url)
}
