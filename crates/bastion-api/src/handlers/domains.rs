//! Domain management handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use bastion_core::{Domain, DomainFilter, DomainId, DomainPage, DomainPatch, DomainStatus, NewDomain, UserId};

use crate::dto::{AssignUsersRequest, UnassignUsersRequest};
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiQuery, Caller, Ctx};
use crate::state::AppState;
use crate::validation::{path_id, Validator};

pub async fn create_domain(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    caller: Caller,
    ApiJson(body): ApiJson<NewDomain>,
) -> ApiResult<(StatusCode, Json<Domain>)> {
    let domain = state.domains.create(&ctx, &caller.user, body).await?;
    info!(domain_id = %domain.id, alias = %domain.alias, "domain created via api");
    Ok((StatusCode::CREATED, Json(domain)))
}

pub async fn list_domains(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    caller: Caller,
    ApiQuery(filter): ApiQuery<DomainFilter>,
) -> ApiResult<Json<DomainPage>> {
    let page = state.domains.list(&ctx, &caller.user, filter).await?;
    Ok(Json(page))
}

pub async fn get_domain(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<Domain>> {
    let id: DomainId = path_id(&id)?;
    let domain = state.domains.retrieve(&ctx, &caller.user, id).await?;
    Ok(Json(domain))
}

pub async fn update_domain(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    caller: Caller,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<DomainPatch>,
) -> ApiResult<Json<Domain>> {
    let id: DomainId = path_id(&id)?;
    let domain = state.domains.update(&ctx, &caller.user, id, patch).await?;
    Ok(Json(domain))
}

pub async fn enable_domain(
    state: State<AppState>,
    ctx: Ctx,
    caller: Caller,
    id: Path<String>,
) -> ApiResult<Json<Domain>> {
    change_status(state, ctx, caller, id, DomainStatus::Enabled).await
}

pub async fn disable_domain(
    state: State<AppState>,
    ctx: Ctx,
    caller: Caller,
    id: Path<String>,
) -> ApiResult<Json<Domain>> {
    change_status(state, ctx, caller, id, DomainStatus::Disabled).await
}

pub async fn freeze_domain(
    state: State<AppState>,
    ctx: Ctx,
    caller: Caller,
    id: Path<String>,
) -> ApiResult<Json<Domain>> {
    change_status(state, ctx, caller, id, DomainStatus::Frozen).await
}

async fn change_status(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    caller: Caller,
    Path(id): Path<String>,
    status: DomainStatus,
) -> ApiResult<Json<Domain>> {
    let id: DomainId = path_id(&id)?;
    let domain = state
        .domains
        .change_status(&ctx, &caller.user, id, status)
        .await?;
    Ok(Json(domain))
}

pub async fn assign_users(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    caller: Caller,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<AssignUsersRequest>,
) -> ApiResult<StatusCode> {
    let id: DomainId = path_id(&id)?;
    let mut v = Validator::new();
    v.batch("user_ids", &body.user_ids);
    v.validate()?;

    state
        .domains
        .assign_users(&ctx, &caller.user, id, &body.user_ids, body.relation)
        .await?;
    Ok(StatusCode::CREATED)
}

pub async fn unassign_users(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    caller: Caller,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<UnassignUsersRequest>,
) -> ApiResult<StatusCode> {
    let id: DomainId = path_id(&id)?;
    let mut v = Validator::new();
    v.batch("user_ids", &body.user_ids);
    v.validate()?;

    state
        .domains
        .unassign_users(&ctx, &caller.user, id, &body.user_ids, body.relation)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_user_domains(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    caller: Caller,
    Path(user_id): Path<String>,
    ApiQuery(filter): ApiQuery<DomainFilter>,
) -> ApiResult<Json<DomainPage>> {
    let user_id: UserId = path_id(&user_id)?;
    let page = state
        .domains
        .list_by_user(&ctx, &caller.user, &user_id, filter)
        .await?;
    Ok(Json(page))
}
