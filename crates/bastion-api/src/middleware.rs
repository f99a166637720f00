//! API middleware: request ids and service key authentication

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::{digest, AppState};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const SERVICE_KEY_HEADER: &str = "x-service-key";

const MAX_REQUEST_ID_LEN: usize = 128;

// =============================================================================
// Request ID Middleware
// =============================================================================

/// Request ID wrapper for extensions
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Tags every request with an id, reusing a well-formed incoming `x-request-id`.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().to_string());

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

// =============================================================================
// Service Key Middleware
// =============================================================================

/// Guards the service surface with the shared `X-Service-Key`.
pub async fn require_service_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.service_key_digest() else {
        warn!("service key not configured; service endpoints disabled");
        return Err(ApiError::unavailable("service endpoints are not configured"));
    };

    let provided = request
        .headers()
        .get(SERVICE_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    match provided {
        Some(key) if constant_time_eq(&digest(key.as_bytes()), expected) => {
            debug!("service key accepted");
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!("invalid service key");
            Err(bastion_core::BastionError::unauthenticated("invalid service key").into())
        }
        None => Err(bastion_core::BastionError::unauthenticated("X-Service-Key header required").into()),
    }
}

/// Compares two digests without short-circuiting.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
