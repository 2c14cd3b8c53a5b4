use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{auth, handlers, middleware::metrics_middleware, tickets, users, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Auth
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        // Users
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/role/{role}", get(users::users_by_role))
        .route(
            "/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        // Tickets
        .route(
            "/tickets",
            get(tickets::list_tickets).post(tickets::create_ticket),
        )
        .route("/tickets/search", get(tickets::search_tickets))
        .route("/tickets/stats", get(tickets::ticket_stats))
        .route("/tickets/status/{status}", get(tickets::tickets_by_status))
        .route(
            "/tickets/dispatcher/{dispatcher_id}",
            get(tickets::tickets_by_dispatcher),
        )
        .route(
            "/tickets/{id}",
            get(tickets::get_ticket)
                .put(tickets::update_ticket)
                .delete(tickets::delete_ticket),
        )
        .route("/tickets/{id}/status", put(tickets::set_ticket_status))
        // Live updates
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .nest("/api", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
