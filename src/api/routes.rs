use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::require_authentication;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Routes that need a valid authentication token
    let protected_routes = Router::new()
        .route("/v1/movies", post(handlers::create_movie))
        .route(
            "/v1/movies/:id",
            patch(handlers::update_movie).delete(handlers::delete_movie),
        )
        .route(
            "/v1/tokens/authentication",
            post(handlers::create_authentication_token)
                .delete(handlers::revoke_authentication_tokens),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_authentication,
        ));

    let public_routes = Router::new()
        .route("/v1/healthcheck", get(handlers::healthcheck))
        .route("/v1/movies/:id", get(handlers::show_movie))
        // Redeeming an activation token is how a subject first signs in
        .route(
            "/v1/tokens/activation",
            post(handlers::create_activation_token).put(handlers::activate),
        );

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
