//! HTTP and WebSocket front end for the dispatch ticket service.

pub mod api;
pub mod metrics;
pub mod state;

pub use api::create_router;
pub use state::AppState;
