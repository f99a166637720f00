//! Token handlers: issue, identify, revoke, refresh and the public key set

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, info};

use bastion_core::{BastionError, ObjectRef, SubjectRef};
use bastion_token::{Identity, IssueRequest, JwkSet, TokenKind, TokenPair};

use crate::dto::{IssueTokenRequest, RefreshRequest, TokenRequest};
use crate::error::ApiResult;
use crate::extract::{ApiJson, Ctx};
use crate::state::AppState;
use crate::validation::Validator;

/// Mints a single token, or an access/refresh pair when `pair` is set.
pub async fn issue(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiJson(body): ApiJson<IssueTokenRequest>,
) -> ApiResult<Response> {
    if body.pair {
        if body.kind != TokenKind::Access || body.relation.is_some() {
            return Err(BastionError::invalid_argument(
                "pair issuance takes kind access and no relation",
            )
            .into());
        }
        let pair = state
            .tokens
            .issue_pair(&ctx, &body.subject, body.domain.as_ref())
            .await?;
        return Ok(Json(pair).into_response());
    }

    let mut request = IssueRequest::new(body.subject, body.kind);
    if let Some(domain) = body.domain {
        request = request.in_domain(domain);
    }
    if let Some(relation) = body.relation {
        request = request.with_relation(relation);
    }
    let issued = state.tokens.issue(&ctx, &request).await?;
    Ok(Json(issued).into_response())
}

pub async fn identify(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiJson(body): ApiJson<TokenRequest>,
) -> ApiResult<Json<Identity>> {
    let mut v = Validator::new();
    v.token("token", &body.token);
    v.validate()?;

    let identity = state.tokens.identify(&ctx, &body.token).await?;
    Ok(Json(identity))
}

pub async fn revoke(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiJson(body): ApiJson<TokenRequest>,
) -> ApiResult<StatusCode> {
    let mut v = Validator::new();
    v.token("token", &body.token);
    v.validate()?;

    state.tokens.revoke(&ctx, &body.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Rotates a refresh token. Scoping the new pair to a domain requires
/// membership in it.
pub async fn refresh(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiJson(body): ApiJson<RefreshRequest>,
) -> ApiResult<Json<TokenPair>> {
    let mut v = Validator::new();
    v.token("refresh_token", &body.refresh_token);
    v.validate()?;

    let authz = state.authz.clone();
    let check_ctx = ctx.clone();
    let target = body.domain;
    let pair = state
        .tokens
        .refresh_with(&ctx, &body.refresh_token, body.domain.as_ref(), |identity| async move {
            let Some(domain) = target else {
                return Ok(());
            };
            let member = authz
                .check(
                    &check_ctx,
                    &SubjectRef::user(&identity.subject),
                    "membership",
                    &ObjectRef::domain(&domain),
                )
                .await?;
            if !member {
                debug!(user_id = %identity.subject, domain_id = %domain, "refresh into foreign domain");
                return Err(BastionError::permission_denied(
                    "membership",
                    format!("domain:{}", domain),
                ));
            }
            Ok(())
        })
        .await?;
    info!("refresh token rotated");
    Ok(Json(pair))
}

pub async fn jwks(State(state): State<AppState>) -> Json<JwkSet> {
    Json(state.tokens.jwks())
}
