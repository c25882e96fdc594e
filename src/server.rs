//! HTTP server, routes, and control channel.

mod control;
mod handlers;
mod lifecycle;
mod state;

pub use control::{ControlClient, NewUser, PasswordChange, Rename, control_router};
pub use lifecycle::{LocalAddrs, Server, ServerState};
pub use state::AppState;

use crate::opds;
use axum::{Router, middleware, routing::get};
use tower_http::trace::TraceLayer;

/// Create the public OPDS router. Every route requires HTTP Basic credentials.
pub fn create_router(state: AppState) -> Router {
    let opds_routes = Router::new()
        .route("/search", get(handlers::opensearch))
        .route("/catalog", get(handlers::catalog))
        .route("/series/{sid}", get(handlers::series))
        .route(
            "/series/{sid}/entries/{eid}/archive",
            get(handlers::archive),
        )
        .route("/series/{sid}/entries/{eid}/cover", get(handlers::cover))
        .route(
            "/series/{sid}/entries/{eid}/page/{num}",
            get(handlers::page),
        );

    Router::new()
        .nest(opds::ROOT, opds_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::require_auth,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
