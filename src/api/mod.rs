//! API module
//!
//! HTTP API endpoints, middleware and the response envelope.

pub mod dto;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod state;

pub use response::{ApiReply, ApiResponse, FieldError};
pub use routes::create_router;
pub use state::AppState;
