pub mod auth;
pub mod complexes;
pub mod health;
pub mod orders;
pub mod payments;
pub mod subscriptions;

use axum::Extension;
use axum::body::Body;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;

use crate::auth::JwtSecret;
use crate::error::ApiError;
use crate::state::AppState;
use nesta_core::traits::*;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generates a random hex id for requests that arrive without one.
#[derive(Clone, Copy, Default)]
pub struct MakeHexRequestId;

impl MakeRequestId for MakeHexRequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&nesta_crypto::new_id())
            .ok()
            .map(RequestId::new)
    }
}

/// Copy the request id into the body of any [`ApiError`] response.
pub async fn stamp_request_id(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let response = next.run(request).await;
    match response.extensions().get::<ApiError>() {
        Some(err) => err.to_response(request_id.as_deref()),
        None => response,
    }
}

pub fn build_router<C, L, G>(state: AppState<C, L, G>) -> axum::Router
where
    C: CredentialStore + Clone,
    L: LedgerStore + Clone,
    G: LocationStore + Clone,
{
    let jwt_secret = JwtSecret(state.config.auth.jwt_secret.clone());

    let api = axum::Router::new()
        // Sessions
        .route("/auth/otp/send", post(auth::send_code::<C, L, G>))
        .route("/auth/otp/verify", post(auth::verify_code::<C, L, G>))
        .route("/auth/refresh", post(auth::refresh::<C, L, G>))
        .route("/auth/logout", post(auth::logout::<C, L, G>))
        .route(
            "/me",
            get(auth::me::<C, L, G>).patch(auth::update_me::<C, L, G>),
        )
        // Ledgers
        .route("/orders", post(orders::create_order::<C, L, G>))
        .route(
            "/subscriptions",
            post(subscriptions::create_subscription::<C, L, G>),
        )
        .route(
            "/subscriptions/{id}",
            post(subscriptions::update_subscription::<C, L, G>),
        )
        // Payments
        .route("/payments/init", post(payments::init_payment::<C, L, G>))
        .route(
            "/payments/webhook/{provider}",
            post(payments::webhook::<C, L, G>),
        )
        // Locations
        .route(
            "/complexes/{id}/request",
            post(complexes::create_request::<C, L, G>),
        )
        .route(
            "/complexes/requests/{id}/verify",
            post(complexes::verify_request::<C, L, G>),
        );

    axum::Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check::<C, L, G>))
        .nest("/api/v1", api)
        .layer(Extension(jwt_secret))
        .layer(middleware::from_fn(stamp_request_id))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<Body>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id
                )
            }),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeHexRequestId))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any)
                .expose_headers(tower_http::cors::Any),
        )
        // Request bodies are small JSON documents; 1 MiB is plenty.
        .layer(tower_http::limit::RequestBodyLimitLayer::new(1024 * 1024))
        .with_state(state)
}
