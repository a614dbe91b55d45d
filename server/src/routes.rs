use axum::{
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};

use crate::auth::middleware::IdentitySecret;
use crate::chat::routes as chat_routes;
use crate::rooms::routes as room_routes;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the identity secret into request extensions so the Identity
/// extractor can find it.
async fn inject_identity_secret(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    req.extensions_mut()
        .insert(IdentitySecret(state.identity_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Identity-bearing routes (Identity extractor validates the bearer token)
    let chat_routes = Router::new()
        .route("/api/rooms", get(room_routes::list_rooms))
        .route(
            "/api/chats/{chat_id}/messages",
            get(chat_routes::list_messages).post(chat_routes::send_message),
        )
        .route(
            "/api/chats/{chat_id}/typing",
            post(chat_routes::start_typing).delete(chat_routes::stop_typing),
        );

    // Collaboration workflow webhook (shared token, not a user identity)
    let collaborator_routes = Router::new().route(
        "/api/collaborations/notify",
        post(room_routes::collaboration_notify),
    );

    // WebSocket endpoint (identity via query param, not a header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(chat_routes)
        .merge(collaborator_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_identity_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
