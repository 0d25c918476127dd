//! Router

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};

use givers_donations::DonationError;

use crate::error::ApiError;
use crate::handlers::{
    activity_feed, connect_callback, create_checkout, delete_donation, health,
    migrate_from_token, my_donations, onboarding_link, payments_webhook, project_activity,
    project_chart, project_messages, update_donation,
};
use crate::state::AppState;

/// Donation endpoints answer 503 while no provider key is configured
async fn require_payments(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.donations.payments_configured() {
        next.run(request).await
    } else {
        ApiError(DonationError::PaymentsDisabled).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let donations = Router::new()
        .route("/donations/checkout", post(create_checkout))
        .route("/webhooks/payments", post(payments_webhook))
        .route("/me/donations", get(my_donations))
        .route(
            "/me/donations/{id}",
            patch(update_donation).delete(delete_donation),
        )
        .route("/me/migrate-from-token", post(migrate_from_token))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_payments));

    Router::new()
        .route("/health", get(health))
        .route("/activity", get(activity_feed))
        .route("/projects/{id}/activity", get(project_activity))
        .route("/projects/{id}/chart", get(project_chart))
        .route("/projects/{id}/messages", get(project_messages))
        .route("/projects/{id}/payments/onboarding", get(onboarding_link))
        .route("/payments/connect/callback", get(connect_callback))
        .merge(donations)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use chrono::Utc;
    use serde_json::{json, Value};
    use tower::util::ServiceExt; // for `oneshot`

    use givers_core::{Donation, Donor, NewDonation, Project, ProjectStatus};
    use givers_donations::DonationService;
    use givers_payments::{sign_payload, MockGateway, PaymentsGateway, MOCK_WEBHOOK_SECRET};
    use givers_store::MemoryStore;

    use crate::auth::{testing, SessionKeys};

    struct TestApp {
        store: Arc<MemoryStore>,
        gateway: Arc<MockGateway>,
    }

    fn project() -> Project {
        Project {
            id: "p1".into(),
            owner_id: "owner".into(),
            name: "Open Tool".into(),
            status: ProjectStatus::Active,
            external_account_id: Some("acct_owner".into()),
            monthly_target: None,
            owner_want_monthly: None,
            currency: "jpy".into(),
        }
    }

    impl TestApp {
        fn new() -> Self {
            Self::with_gateway(MockGateway::new())
        }

        fn with_gateway(gateway: MockGateway) -> Self {
            let store = Arc::new(MemoryStore::new());
            store.insert_project(project());
            Self {
                store,
                gateway: Arc::new(gateway),
            }
        }

        fn router(&self) -> Router {
            let gateway: Arc<dyn PaymentsGateway> = self.gateway.clone();
            let service =
                DonationService::with_store(gateway, self.store.clone(), "https://givers.example");
            router(AppState {
                donations: Arc::new(service),
                sessions: Arc::new(SessionKeys::new(testing::SECRET)),
                storage: "memory",
                connect_redirect_uri: Arc::from("http://localhost:8080/payments/connect/callback"),
            })
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.router().oneshot(request).await.unwrap();
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = if body.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&body).unwrap_or(Value::Null)
            };
            (status, json)
        }
    }

    fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn as_user(mut request: Request<Body>, user: &str) -> Request<Body> {
        let value = format!("Bearer {}", testing::token(user, false));
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, value.parse().unwrap());
        request
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn webhook(event: &Value) -> Request<Body> {
        let body = event.to_string();
        let signature =
            sign_payload(MOCK_WEBHOOK_SECRET, Utc::now().timestamp(), body.as_bytes()).unwrap();
        Request::builder()
            .method(Method::POST)
            .uri("/webhooks/payments")
            .header("stripe-signature", signature)
            .body(Body::from(body))
            .unwrap()
    }

    fn seeded(id: &str, donor: Donor) -> Donation {
        let mut d = Donation::new(
            NewDonation {
                project_id: "p1".into(),
                donor,
                amount: 1000,
                currency: "jpy".into(),
                is_recurring: false,
                message: Some("Thanks".into()),
                external_payment_id: format!("pi_{id}"),
            },
            Utc::now(),
        );
        d.id = id.into();
        d
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new();
        let (status, body) = app.send(get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payments_configured"], true);
        assert_eq!(body["storage"], "memory");
    }

    #[tokio::test]
    async fn test_happy_one_off_over_http() {
        let app = TestApp::new();

        let (status, body) = app
            .send(json_request(
                Method::POST,
                "/donations/checkout",
                &json!({"project_id": "p1", "amount": 1000, "currency": "jpy",
                        "is_recurring": false, "donor_token": "tk_abc"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checkout_url"], "https://pay.example/cs_1");

        let event = json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {"object": {
                "id": "pi_1", "amount": 1000, "currency": "jpy",
                "metadata": {"project_id": "p1", "donor_type": "token", "donor_id": "tk_abc"}
            }}
        });
        let (status, body) = app.send(webhook(&event)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"received": true}));

        let (status, body) = app.send(get("/projects/p1/chart")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chart"].as_array().unwrap().len(), 1);
        assert_eq!(body["chart"][0]["actual_amount"], 1000);

        let (status, _) = app.send(webhook(&event)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.store.all_donations().await.len(), 1);
        assert_eq!(app.store.activity_count(), 1);

        let (_, body) = app.send(get("/activity")).await;
        assert_eq!(body["activities"][0]["type"], "donation");
    }

    #[tokio::test]
    async fn test_checkout_validation_and_missing_project() {
        let app = TestApp::new();

        let (status, body) = app
            .send(json_request(
                Method::POST,
                "/donations/checkout",
                &json!({"project_id": "p1", "amount": 0, "donor_token": "tk_abc"}),
            ))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "validation_failed");

        let (status, _) = app
            .send(json_request(
                Method::POST,
                "/donations/checkout",
                &json!({"project_id": "nope", "amount": 100, "donor_token": "tk_abc"}),
            ))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .send(json_request(
                Method::POST,
                "/donations/checkout",
                &json!({"project_id": "p1", "amount": 100}),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unreadable_bodies_use_error_shape() {
        let app = TestApp::new();

        let (status, body) = app
            .send(json_request(
                Method::POST,
                "/donations/checkout",
                &json!({"amount": "lots"}),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["reason"], "invalid_payload");

        let plain = Request::builder()
            .method(Method::POST)
            .uri("/donations/checkout")
            .body(Body::from(r#"{"project_id":"p1","amount":100}"#))
            .unwrap();
        let (status, body) = app.send(plain).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], "invalid_payload");

        let broken = Request::builder()
            .method(Method::PATCH)
            .uri("/me/donations/d1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = app.send(as_user(broken, "alice")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");
    }

    #[tokio::test]
    async fn test_bad_signature_is_unauthorized() {
        let app = TestApp::new();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/payments")
            .header("stripe-signature", "t=1,v1=00")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let unsigned = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/payments")
            .body(Body::from("{}"))
            .unwrap();
        assert_eq!(app.send(unsigned).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_payments_disabled() {
        let app = TestApp::with_gateway(MockGateway::unconfigured());
        let (status, body) = app
            .send(json_request(
                Method::POST,
                "/donations/checkout",
                &json!({"project_id": "p1", "amount": 1000, "donor_token": "tk_abc"}),
            ))
            .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "payments_disabled");

        let (status, _) = app.send(get("/projects/p1/chart")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_me_endpoints_require_session() {
        let app = TestApp::new();
        let (status, _) = app.send(get("/me/donations")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut forged = get("/me/donations");
        forged
            .headers_mut()
            .insert(header::AUTHORIZATION, "Bearer forged".parse().unwrap());
        assert_eq!(app.send(forged).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_token_migration_over_http() {
        let app = TestApp::new();
        app.store
            .seed_donation(seeded("d1", Donor::Token("tk_xyz".into())))
            .await;
        app.store
            .seed_donation(seeded("d2", Donor::Token("tk_xyz".into())))
            .await;

        let migrate = || {
            let mut request = as_user(
                Request::builder()
                    .method(Method::POST)
                    .uri("/me/migrate-from-token")
                    .body(Body::empty())
                    .unwrap(),
                "u7",
            );
            request
                .headers_mut()
                .insert(header::COOKIE, "donor_token=tk_xyz".parse().unwrap());
            request
        };

        let (status, body) = app.send(migrate()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"migrated_count": 2, "already_migrated": false}));

        let (_, body) = app.send(migrate()).await;
        assert_eq!(body, json!({"migrated_count": 0, "already_migrated": true}));

        let (_, body) = app.send(as_user(get("/me/donations"), "u7")).await;
        assert_eq!(body["donations"].as_array().unwrap().len(), 2);

        let no_cookie = as_user(
            Request::builder()
                .method(Method::POST)
                .uri("/me/migrate-from-token")
                .body(Body::empty())
                .unwrap(),
            "u7",
        );
        assert_eq!(app.send(no_cookie).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ownership_enforcement_over_http() {
        let app = TestApp::new();
        app.store
            .seed_donation(seeded("d1", Donor::User("u1".into())))
            .await;

        let patch_as = |user: &str| {
            as_user(
                json_request(Method::PATCH, "/me/donations/d1", &json!({"amount": 2000})),
                user,
            )
        };

        let (status, body) = app.send(patch_as("u2")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");
        assert_eq!(app.store.all_donations().await[0].amount, 1000);

        let (status, body) = app.send(patch_as("u1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));

        let delete = |user: &str| {
            as_user(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/me/donations/d1")
                    .body(Body::empty())
                    .unwrap(),
                user,
            )
        };
        assert_eq!(app.send(delete("u2")).await.0, StatusCode::FORBIDDEN);
        assert_eq!(app.send(delete("u1")).await.0, StatusCode::OK);
        assert_eq!(app.send(delete("u1")).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_messages_for_owner_only() {
        let app = TestApp::new();
        app.store
            .seed_donation(seeded("d1", Donor::Token("tk_abc".into())))
            .await;

        let (status, _) = app
            .send(as_user(get("/projects/p1/messages"), "stranger"))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .send(as_user(get("/projects/p1/messages?limit=10&sort=asc"), "owner"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["messages"][0]["donor_name"], "Anonymous");
    }

    #[tokio::test]
    async fn test_onboarding_flow() {
        let app = TestApp::new();

        let (status, body) = app
            .send(as_user(get("/projects/p1/payments/onboarding"), "owner"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["onboarding_url"].as_str().unwrap().contains("state=p1"));

        let response = app
            .router()
            .oneshot(get("/payments/connect/callback?code=abc&state=p1"))
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://givers.example/projects/p1?payments_connected=1"
        );
        assert_eq!(app.gateway.calls().len(), 1);
    }
}
