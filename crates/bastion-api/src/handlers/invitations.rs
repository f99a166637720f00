//! Invitation handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use bastion_core::{DomainId, Invitation, InvitationFilter, InvitationPage, UserId};
use bastion_domains::{AcceptOutcome, SendInvitation};

use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiQuery, Caller, Ctx};
use crate::state::AppState;
use crate::validation::path_id;

/// 201 for a new invitation, 200 when an existing one was resent.
pub async fn send_invitation(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    caller: Caller,
    ApiJson(body): ApiJson<SendInvitation>,
) -> ApiResult<(StatusCode, Json<Invitation>)> {
    let (invitation, created) = state.invitations.send(&ctx, &caller.user, &body).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(invitation)))
}

pub async fn list_invitations(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    caller: Caller,
    ApiQuery(filter): ApiQuery<InvitationFilter>,
) -> ApiResult<Json<InvitationPage>> {
    let page = state.invitations.list(&ctx, &caller.user, filter).await?;
    Ok(Json(page))
}

pub async fn accept_invitations(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    caller: Caller,
) -> ApiResult<Json<AcceptOutcome>> {
    let outcome = state.invitations.accept(&ctx, &caller.user).await?;
    Ok(Json(outcome))
}

pub async fn view_invitation(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    caller: Caller,
    Path((user_id, domain_id)): Path<(String, String)>,
) -> ApiResult<Json<Invitation>> {
    let (user_id, domain_id) = invitation_key(&user_id, &domain_id)?;
    let invitation = state
        .invitations
        .view(&ctx, &caller.user, user_id, domain_id)
        .await?;
    Ok(Json(invitation))
}

pub async fn delete_invitation(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    caller: Caller,
    Path((user_id, domain_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let (user_id, domain_id) = invitation_key(&user_id, &domain_id)?;
    state
        .invitations
        .delete(&ctx, &caller.user, user_id, domain_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn invitation_key(user_id: &str, domain_id: &str) -> bastion_core::Result<(UserId, DomainId)> {
    Ok((path_id(user_id)?, path_id(domain_id)?))
}
