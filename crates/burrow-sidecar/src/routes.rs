//! Router assembly and bearer-token authentication.

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::{AppState, handlers};

/// Build the protocol router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/bash", post(handlers::bash))
        .route("/read", post(handlers::read))
        .route("/write", post(handlers::write))
        .route("/edit", post(handlers::edit))
        .route("/ls", post(handlers::ls))
        .route("/find", post(handlers::find))
        .route("/grep", post(handlers::grep))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reject requests without the configured bearer token. A daemon without a
/// token accepts everything (trusted socket deployments).
async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.token {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token == expected)
            .unwrap_or(false);
        if !authorized {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    next.run(request).await
}
