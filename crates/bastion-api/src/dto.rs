//! Data Transfer Objects for API requests and responses

use serde::{Deserialize, Serialize};

use bastion_core::{
    DomainId, DomainRelation, ObjectRef, ObjectType, RelationFilter, RelationTuple, SubjectRef,
    UserId,
};
use bastion_token::TokenKind;

// ============================================================================
// Generic Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

// ============================================================================
// Token DTOs
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueTokenRequest {
    pub subject: UserId,
    pub kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<DomainRelation>,
    /// Mint an access/refresh pair instead of a single token.
    #[serde(default)]
    pub pair: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainId>,
}

// ============================================================================
// Authorization DTOs
// ============================================================================

/// How `AuthorizeRequest::subject` is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// The subject is an id of `subject_type`.
    #[default]
    Id,
    /// The subject is an access token; the id is taken from it.
    Token,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    #[serde(default = "default_subject_type")]
    pub subject_type: ObjectType,
    #[serde(default)]
    pub subject_kind: SubjectKind,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_relation: Option<String>,
    pub permission: String,
    pub object_type: ObjectType,
    pub object: String,
}

fn default_subject_type() -> ObjectType {
    ObjectType::User
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub authorized: bool,
    /// Id of the subject the decision was made for.
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LookupObjectsRequest {
    pub subject: SubjectRef,
    pub permission: String,
    pub object_type: ObjectType,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ObjectsResponse {
    pub objects: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LookupSubjectsRequest {
    pub permission: String,
    pub object: ObjectRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<ObjectType>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubjectsResponse {
    pub subjects: Vec<SubjectRef>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExpandRequest {
    pub permission: String,
    pub object: ObjectRef,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelationsRequest {
    pub tuples: Vec<RelationTuple>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadRelationsRequest {
    #[serde(default)]
    pub filter: RelationFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionsRequest {
    pub subject: SubjectRef,
    pub object: ObjectRef,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionsResponse {
    pub relations: Vec<String>,
}

// ============================================================================
// Domain DTOs
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignUsersRequest {
    pub user_ids: Vec<UserId>,
    pub relation: DomainRelation,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnassignUsersRequest {
    pub user_ids: Vec<UserId>,
    /// Every domain relation is removed when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<DomainRelation>,
}
