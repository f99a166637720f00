//! Authorization handlers: checks, lookups and policy management

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{debug, info};

use bastion_core::{BastionError, ObjectRef, ObjectType, RelationFilter, RelationPage, SubjectRef, UsersetTree};
use bastion_policy::store::DEFAULT_READ_LIMIT;
use bastion_token::TokenKind;

use crate::dto::{
    AuthorizeRequest, AuthorizeResponse, CountResponse, ExpandRequest, LookupObjectsRequest,
    LookupSubjectsRequest, ObjectsResponse, PermissionsRequest, PermissionsResponse,
    ReadRelationsRequest, RelationsRequest, SubjectKind, SubjectsResponse,
};
use crate::error::ApiResult;
use crate::extract::{ApiJson, Ctx};
use crate::state::AppState;
use crate::validation::Validator;

/// Checks a permission. With `subject_kind: token` the subject is the bearer
/// of the given access token.
pub async fn authorize(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiJson(body): ApiJson<AuthorizeRequest>,
) -> ApiResult<Json<AuthorizeResponse>> {
    let mut v = Validator::new();
    v.name("permission", &body.permission);
    match body.subject_kind {
        SubjectKind::Id => v.uuid("subject", &body.subject),
        SubjectKind::Token => v.token("subject", &body.subject),
    };
    if let Some(relation) = &body.subject_relation {
        v.name("subject_relation", relation);
    }
    v.validate()?;

    let subject = match body.subject_kind {
        SubjectKind::Id => SubjectRef {
            subject_type: body.subject_type,
            id: body.subject,
            relation: body.subject_relation,
        },
        SubjectKind::Token => {
            let identity = state.tokens.identify(&ctx, &body.subject).await?;
            if identity.kind != TokenKind::Access {
                return Err(BastionError::unauthenticated("access token required").into());
            }
            SubjectRef::user(&identity.subject)
        }
    };
    let object = ObjectRef::new(body.object_type, body.object);

    let authorized = state
        .authz
        .check(&ctx, &subject, &body.permission, &object)
        .await?;
    debug!(
        subject = %subject.id,
        permission = %body.permission,
        object = %object.id,
        authorized,
        "authorize"
    );
    Ok(Json(AuthorizeResponse {
        authorized,
        id: subject.id,
    }))
}

pub async fn count_objects(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiJson(body): ApiJson<LookupObjectsRequest>,
) -> ApiResult<Json<CountResponse>> {
    let objects = lookup_objects(&state, &ctx, &body).await?;
    Ok(Json(CountResponse {
        count: objects.len() as u64,
    }))
}

pub async fn list_objects(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiJson(body): ApiJson<LookupObjectsRequest>,
) -> ApiResult<Json<ObjectsResponse>> {
    let objects = lookup_objects(&state, &ctx, &body).await?;
    Ok(Json(ObjectsResponse { objects }))
}

async fn lookup_objects(
    state: &AppState,
    ctx: &bastion_core::RequestContext,
    body: &LookupObjectsRequest,
) -> bastion_core::Result<Vec<String>> {
    let mut v = Validator::new();
    v.name("permission", &body.permission);
    v.validate()?;
    state
        .authz
        .lookup_resources(ctx, &body.subject, &body.permission, body.object_type)
        .await
}

pub async fn list_subjects(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiJson(body): ApiJson<LookupSubjectsRequest>,
) -> ApiResult<Json<SubjectsResponse>> {
    let mut v = Validator::new();
    v.name("permission", &body.permission);
    v.validate()?;

    let subjects = state
        .authz
        .lookup_subjects(&ctx, &body.permission, &body.object, body.subject_type)
        .await?;
    Ok(Json(SubjectsResponse { subjects }))
}

pub async fn expand(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiJson(body): ApiJson<ExpandRequest>,
) -> ApiResult<Json<UsersetTree>> {
    let mut v = Validator::new();
    v.name("permission", &body.permission);
    v.validate()?;

    let tree = state.authz.expand(&ctx, &body.permission, &body.object).await?;
    Ok(Json(tree))
}

// =============================================================================
// Policies
// =============================================================================

pub async fn create_policies(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiJson(body): ApiJson<RelationsRequest>,
) -> ApiResult<StatusCode> {
    let mut v = Validator::new();
    v.batch("tuples", &body.tuples);
    v.validate()?;

    state.authz.create_relations(&ctx, &body.tuples).await?;
    info!(count = body.tuples.len(), "policies created");
    Ok(StatusCode::CREATED)
}

pub async fn delete_policies(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiJson(filter): ApiJson<RelationFilter>,
) -> ApiResult<StatusCode> {
    let removed = state.authz.delete_relations(&ctx, &filter).await?;
    info!(removed, "policies deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn read_policies(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiJson(body): ApiJson<ReadRelationsRequest>,
) -> ApiResult<Json<RelationPage>> {
    let page = state
        .authz
        .read_relations(
            &ctx,
            &body.filter,
            body.cursor.as_deref(),
            body.limit.unwrap_or(DEFAULT_READ_LIMIT),
        )
        .await?;
    Ok(Json(page))
}

/// Direct relations of the subject on the object.
pub async fn retrieve_permissions(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiJson(body): ApiJson<PermissionsRequest>,
) -> ApiResult<Json<PermissionsResponse>> {
    let relations = state
        .authz
        .retrieve_permissions(&ctx, &body.subject, &body.object)
        .await?;
    Ok(Json(PermissionsResponse { relations }))
}

pub async fn delete_entity(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let entity = ObjectRef::new(entity_type.parse::<ObjectType>()?, entity_id);
    entity.validate()?;

    let removed = state.authz.delete_entity_policies(&ctx, &entity).await?;
    info!(entity_type = %entity.object_type, entity_id = %entity.id, removed, "entity policies deleted");
    Ok(StatusCode::NO_CONTENT)
}
