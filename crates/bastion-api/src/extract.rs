//! Request extractors that reject with the API error envelope

use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Query, Request},
    http::{header, request::Parts},
    Json,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use bastion_core::{BastionError, DomainId, RequestContext, UserId};
use bastion_token::{Identity, TokenKind};

use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::state::AppState;

/// JSON body. A missing or wrong content type is 415; a body that does not
/// parse or does not match the expected shape is 422.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(JsonRejection::MissingJsonContentType(e)) => {
                Err(ApiError::unsupported_media_type(e.body_text()))
            }
            Err(JsonRejection::JsonSyntaxError(e)) => Err(ApiError::malformed_entity(e.body_text())),
            Err(JsonRejection::JsonDataError(e)) => Err(ApiError::malformed_entity(e.body_text())),
            Err(other) => Err(ApiError::new(other.status(), "invalid-argument", other.body_text())),
        }
    }
}

/// Query string; a malformed one is 400.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| ApiQuery(value))
            .map_err(|e| BastionError::invalid_argument(e.body_text()).into())
    }
}

/// Deadline and request id for the current request.
pub struct Ctx(pub RequestContext);

impl FromRequestParts<AppState> for Ctx {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Ctx(context_for(parts, state)))
    }
}

/// The authenticated user behind an access token in `Authorization: Bearer`.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: UserId,
    pub domain: Option<DomainId>,
    pub identity: Identity,
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| BastionError::unauthenticated("bearer token required"))?;
        let ctx = context_for(parts, state);
        let identity = state.tokens.identify(&ctx, token).await?;
        if identity.kind != TokenKind::Access {
            debug!(kind = %identity.kind, "non-access token used as bearer");
            return Err(BastionError::unauthenticated("access token required").into());
        }
        Ok(Caller {
            user: identity.subject,
            domain: identity.domain,
            identity,
        })
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn context_for(parts: &Parts, state: &AppState) -> RequestContext {
    let request_id = parts.extensions.get::<RequestId>().map(|r| r.0.as_str());
    state.request_context(request_id)
}
