//! Bastion API - HTTP mapping of the token, authorization and domain surfaces
//!
//! Service endpoints under `/auth` are guarded by the shared `X-Service-Key`;
//! domain and invitation endpoints take an access token as `Bearer`. Errors
//! render as `{"success": false, "data": null, "error": {"code", "message"}}`.

pub mod dto;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod validation;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::{AppState, DEFAULT_REQUEST_TIMEOUT};
