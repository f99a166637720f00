//! Relation tuples, filters and userset trees

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{BastionError, Result};
use crate::ids::{parse_canonical_uuid, DomainId, GroupId, ThingId, UserId, PLATFORM_ID};

/// Maximum number of tuples accepted or returned by a single store call.
pub const MAX_BATCH: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Platform,
    Domain,
    Group,
    Thing,
    User,
}

impl ObjectType {
    pub const ALL: [ObjectType; 5] = [
        ObjectType::Platform,
        ObjectType::Domain,
        ObjectType::Group,
        ObjectType::Thing,
        ObjectType::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Platform => "platform",
            ObjectType::Domain => "domain",
            ObjectType::Group => "group",
            ObjectType::Thing => "thing",
            ObjectType::User => "user",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = BastionError;

    fn from_str(s: &str) -> Result<Self> {
        ObjectType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| BastionError::invalid_argument(format!("unknown object type: {:?}", s)))
    }
}

/// A typed object reference such as `domain:<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub id: String,
}

impl ObjectRef {
    pub fn new(object_type: ObjectType, id: impl Into<String>) -> Self {
        Self {
            object_type,
            id: id.into(),
        }
    }

    pub fn platform() -> Self {
        Self::new(ObjectType::Platform, PLATFORM_ID)
    }

    pub fn domain(id: &DomainId) -> Self {
        Self::new(ObjectType::Domain, id.to_string())
    }

    pub fn group(id: &GroupId) -> Self {
        Self::new(ObjectType::Group, id.to_string())
    }

    pub fn thing(id: &ThingId) -> Self {
        Self::new(ObjectType::Thing, id.to_string())
    }

    pub fn validate(&self) -> Result<()> {
        parse_canonical_uuid(self.object_type.as_str(), &self.id).map(|_| ())
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.id)
    }
}

impl FromStr for ObjectRef {
    type Err = BastionError;

    fn from_str(s: &str) -> Result<Self> {
        let (object_type, id) = s
            .split_once(':')
            .ok_or_else(|| BastionError::invalid_argument(format!("expected type:id, got {:?}", s)))?;
        let object = ObjectRef::new(object_type.parse()?, id);
        object.validate()?;
        Ok(object)
    }
}

/// A subject: either a concrete principal or a userset `type:id#relation`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    #[serde(rename = "type")]
    pub subject_type: ObjectType,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

impl SubjectRef {
    pub fn new(subject_type: ObjectType, id: impl Into<String>) -> Self {
        Self {
            subject_type,
            id: id.into(),
            relation: None,
        }
    }

    pub fn user(id: &UserId) -> Self {
        Self::new(ObjectType::User, id.to_string())
    }

    pub fn userset(object: &ObjectRef, relation: impl Into<String>) -> Self {
        Self {
            subject_type: object.object_type,
            id: object.id.clone(),
            relation: Some(relation.into()),
        }
    }

    pub fn is_userset(&self) -> bool {
        self.relation.is_some()
    }

    /// The subject viewed as an object, dropping any userset relation.
    pub fn as_object(&self) -> ObjectRef {
        ObjectRef::new(self.subject_type, self.id.clone())
    }

    pub fn validate(&self) -> Result<()> {
        parse_canonical_uuid(self.subject_type.as_str(), &self.id)?;
        if let Some(relation) = &self.relation {
            if relation.is_empty() {
                return Err(BastionError::invalid_argument("subject relation must not be empty"));
            }
        }
        Ok(())
    }
}

impl From<ObjectRef> for SubjectRef {
    fn from(object: ObjectRef) -> Self {
        SubjectRef::new(object.object_type, object.id)
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}:{}#{}", self.subject_type, self.id, relation),
            None => write!(f, "{}:{}", self.subject_type, self.id),
        }
    }
}

impl FromStr for SubjectRef {
    type Err = BastionError;

    fn from_str(s: &str) -> Result<Self> {
        let (object, relation) = match s.split_once('#') {
            Some((object, relation)) => (object, Some(relation.to_string())),
            None => (s, None),
        };
        let object: ObjectRef = object.parse()?;
        let subject = SubjectRef {
            subject_type: object.object_type,
            id: object.id,
            relation,
        };
        subject.validate()?;
        Ok(subject)
    }
}

/// One row in the relationship store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationTuple {
    pub subject: SubjectRef,
    pub relation: String,
    pub object: ObjectRef,
}

impl RelationTuple {
    pub fn new(subject: SubjectRef, relation: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            subject,
            relation: relation.into(),
            object,
        }
    }

    pub fn key(&self) -> TupleKey {
        TupleKey {
            object_type: self.object.object_type.as_str().to_string(),
            object_id: self.object.id.clone(),
            relation: self.relation.clone(),
            subject_type: self.subject.subject_type.as_str().to_string(),
            subject_id: self.subject.id.clone(),
            subject_relation: self.subject.relation.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.relation, self.object)
    }
}

/// Storage key of a tuple. Field order is the canonical read order; an absent
/// subject relation is stored as the empty string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TupleKey {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub subject_type: String,
    pub subject_id: String,
    pub subject_relation: String,
}

impl TupleKey {
    pub fn to_tuple(&self) -> Result<RelationTuple> {
        let subject_relation = if self.subject_relation.is_empty() {
            None
        } else {
            Some(self.subject_relation.clone())
        };
        Ok(RelationTuple {
            subject: SubjectRef {
                subject_type: self.subject_type.parse()?,
                id: self.subject_id.clone(),
                relation: subject_relation,
            },
            relation: self.relation.clone(),
            object: ObjectRef::new(self.object_type.parse()?, self.object_id.clone()),
        })
    }

    /// Opaque continuation token pointing just past this key.
    pub fn to_cursor(&self) -> String {
        let fields = [
            &self.object_type,
            &self.object_id,
            &self.relation,
            &self.subject_type,
            &self.subject_id,
            &self.subject_relation,
        ];
        let json = serde_json::to_vec(&fields).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn from_cursor(cursor: &str) -> Result<Self> {
        let invalid = || BastionError::invalid_argument("malformed cursor");
        let bytes = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| invalid())?;
        let fields: [String; 6] = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
        let [object_type, object_id, relation, subject_type, subject_id, subject_relation] = fields;
        Ok(Self {
            object_type,
            object_id,
            relation,
            subject_type,
            subject_id,
            subject_relation,
        })
    }
}

/// Tuple filter; every populated field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<ObjectType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<ObjectType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_relation: Option<String>,
}

impl RelationFilter {
    pub fn for_object(object: &ObjectRef) -> Self {
        Self {
            object_type: Some(object.object_type),
            object_id: Some(object.id.clone()),
            ..Default::default()
        }
    }

    pub fn for_subject(subject: &SubjectRef) -> Self {
        Self {
            subject_type: Some(subject.subject_type),
            subject_id: Some(subject.id.clone()),
            subject_relation: subject.relation.clone(),
            ..Default::default()
        }
    }

    /// Exact match on a single tuple.
    pub fn exact(tuple: &RelationTuple) -> Self {
        Self {
            object_type: Some(tuple.object.object_type),
            object_id: Some(tuple.object.id.clone()),
            relation: Some(tuple.relation.clone()),
            subject_type: Some(tuple.subject.subject_type),
            subject_id: Some(tuple.subject.id.clone()),
            subject_relation: Some(tuple.subject.relation.clone().unwrap_or_default()),
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn with_object_type(mut self, object_type: ObjectType) -> Self {
        self.object_type = Some(object_type);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.object_type.is_none()
            && self.object_id.is_none()
            && self.relation.is_none()
            && self.subject_type.is_none()
            && self.subject_id.is_none()
            && self.subject_relation.is_none()
    }

    /// `subject_relation = Some("")` selects tuples whose subject is not a userset.
    pub fn matches(&self, tuple: &RelationTuple) -> bool {
        self.object_type.map_or(true, |t| t == tuple.object.object_type)
            && self.object_id.as_ref().map_or(true, |id| *id == tuple.object.id)
            && self.relation.as_ref().map_or(true, |r| *r == tuple.relation)
            && self.subject_type.map_or(true, |t| t == tuple.subject.subject_type)
            && self.subject_id.as_ref().map_or(true, |id| *id == tuple.subject.id)
            && self.subject_relation.as_ref().map_or(true, |r| {
                r.as_str() == tuple.subject.relation.as_deref().unwrap_or("")
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationPage {
    pub tuples: Vec<RelationTuple>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of expanding a permission on an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersetTree {
    pub object: ObjectRef,
    pub relation: String,
    #[serde(flatten)]
    pub node: UsersetNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum UsersetNode {
    /// Concrete subjects holding the relation directly.
    Leaf { subjects: Vec<SubjectRef> },
    Union { children: Vec<UsersetTree> },
    /// Branch cut by cycle detection or the depth bound.
    Truncated,
}

impl UsersetTree {
    /// All concrete subjects reachable from this tree.
    pub fn leaves(&self) -> Vec<SubjectRef> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out.sort();
        out.dedup();
        out
    }

    fn collect_leaves(&self, out: &mut Vec<SubjectRef>) {
        match &self.node {
            UsersetNode::Leaf { subjects } => out.extend(subjects.iter().cloned()),
            UsersetNode::Union { children } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            UsersetNode::Truncated => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tuple() -> RelationTuple {
        RelationTuple::new(
            SubjectRef::user(&UserId::new()),
            "viewer",
            ObjectRef::domain(&DomainId::new()),
        )
    }

    #[test]
    fn test_cursor_roundtrip() {
        let key = sample_tuple().key();
        let cursor = key.to_cursor();
        assert_eq!(TupleKey::from_cursor(&cursor).unwrap(), key);
        assert!(TupleKey::from_cursor("%%%").is_err());
    }

    #[test]
    fn test_subject_parsing() {
        let domain = DomainId::new();
        let subject: SubjectRef = format!("domain:{}#member", domain).parse().unwrap();
        assert_eq!(subject.subject_type, ObjectType::Domain);
        assert_eq!(subject.relation.as_deref(), Some("member"));
        assert_eq!(subject.to_string(), format!("domain:{}#member", domain));

        assert!("domain".parse::<SubjectRef>().is_err());
        assert!("widget:1".parse::<SubjectRef>().is_err());
    }

    #[test]
    fn test_filter_matches() {
        let tuple = sample_tuple();
        assert!(RelationFilter::default().matches(&tuple));
        assert!(RelationFilter::exact(&tuple).matches(&tuple));
        assert!(RelationFilter::for_object(&tuple.object).matches(&tuple));

        let other = RelationFilter::default().with_relation("editor");
        assert!(!other.matches(&tuple));
    }

    #[test]
    fn test_key_ordering_follows_object_first() {
        let mut a = sample_tuple();
        let mut b = a.clone();
        a.object.id = "00000000-0000-0000-0000-00000000000a".into();
        b.object.id = "00000000-0000-0000-0000-00000000000b".into();
        b.relation = "administrator".into();
        assert!(a.key() < b.key());
    }
}
