//! API route definitions

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::{request_id_middleware, require_service_key};
use crate::state::AppState;

/// The full API router with application state.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::liveness))
        .route("/health/ready", get(handlers::readiness))
        .merge(public_auth_routes())
        .merge(service_routes(state.clone()))
        .merge(domain_routes())
        .merge(invitation_routes())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Token endpoints that need no credentials beyond the request body.
fn public_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/jwks", get(handlers::auth::jwks))
}

/// Endpoints reserved for backend services holding the `X-Service-Key`.
fn service_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/issue", post(handlers::auth::issue))
        .route("/auth/identify", post(handlers::auth::identify))
        .route("/auth/revoke", post(handlers::auth::revoke))
        .route("/auth/authorize", post(handlers::authz::authorize))
        .route("/auth/objects/count", post(handlers::authz::count_objects))
        .route("/auth/objects/list", post(handlers::authz::list_objects))
        .route("/auth/subjects/list", post(handlers::authz::list_subjects))
        .route("/auth/expand", post(handlers::authz::expand))
        .route("/auth/policies", post(handlers::authz::create_policies))
        .route("/auth/policies/delete", post(handlers::authz::delete_policies))
        .route("/auth/policies/read", post(handlers::authz::read_policies))
        .route("/auth/policies/permissions", post(handlers::authz::retrieve_permissions))
        .route("/auth/entities/{type}/{id}", delete(handlers::authz::delete_entity))
        .route_layer(from_fn_with_state(state, require_service_key))
}

fn domain_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/domains",
            post(handlers::domains::create_domain).get(handlers::domains::list_domains),
        )
        .route(
            "/domains/{id}",
            get(handlers::domains::get_domain).patch(handlers::domains::update_domain),
        )
        .route("/domains/{id}/enable", post(handlers::domains::enable_domain))
        .route("/domains/{id}/disable", post(handlers::domains::disable_domain))
        .route("/domains/{id}/freeze", post(handlers::domains::freeze_domain))
        .route("/domains/{id}/users/assign", post(handlers::domains::assign_users))
        .route("/domains/{id}/users/unassign", post(handlers::domains::unassign_users))
        .route("/users/{id}/domains", get(handlers::domains::list_user_domains))
}

fn invitation_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/invitations",
            post(handlers::invitations::send_invitation).get(handlers::invitations::list_invitations),
        )
        .route("/invitations/accept", post(handlers::invitations::accept_invitations))
        .route(
            "/invitations/{user_id}/{domain_id}",
            get(handlers::invitations::view_invitation).delete(handlers::invitations::delete_invitation),
        )
}
