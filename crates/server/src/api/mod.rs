pub mod auth;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod tickets;
pub mod users;
pub mod ws;

pub use response::{ApiError, ApiResponse};
pub use routes::create_router;
