//! JSON body extractor whose rejections use the API error shape

use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;

use givers_donations::DonationError;

use crate::error::ApiError;

/// `Json<T>` that answers 400 `invalid_payload` for a missing content type,
/// malformed JSON or a body of the wrong shape
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, ApiError> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                tracing::debug!(error = %rejection.body_text(), "Rejected request body");
                Err(ApiError(DonationError::ValidationFailed(
                    "invalid_payload".into(),
                )))
            }
        }
    }
}
