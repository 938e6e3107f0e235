//! JSON and HTML endpoints over the engine. Handlers only translate; every
//! rule lives in the engine.

mod bookings;
mod caller;
mod cron;
mod error;
mod slots;

pub use caller::{Caller, USER_ID_HEADER};
pub use error::ApiError;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::observability::HTTP_REQUESTS_TOTAL;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// `None` disables `POST /cron/expire`.
    pub sweep_secret: Option<Arc<str>>,
    pub sweep_batch: usize,
}

async fn count_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".into());
    let response = next.run(request).await;
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

async fn health() -> &'static str {
    "ok"
}

pub fn router(state: AppState, max_concurrency: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rooms/{room_id}/slots", get(slots::list).post(slots::create))
        .route("/slots/delete", post(slots::delete))
        .route("/bookings/request", post(bookings::request))
        .route("/bookings/approve", get(bookings::approve_link))
        .route("/bookings/reject", get(bookings::reject_link))
        .route("/bookings/approve-owner", post(bookings::approve_owner))
        .route("/bookings/{booking_id}", get(bookings::get_booking))
        .route("/cron/expire", post(cron::expire))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(ConcurrencyLimitLayer::new(max_concurrency))
                .layer(middleware::from_fn(count_requests)),
        )
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    max_concurrency: usize,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state, max_concurrency))
        .with_graceful_shutdown(shutdown)
        .await
}
