//! Depth-first permission evaluation over a store snapshot.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use bastion_core::{
    ObjectRef, ObjectType, PolicySnapshot, Result, SubjectRef, UsersetNode, UsersetTree,
};

use crate::schema::{Operand, Rewrite, Schema};

/// Maximum evaluation depth; deeper branches evaluate to `false`.
pub const MAX_DEPTH: u32 = 16;

/// Path state for one branch of an evaluation.
#[derive(Debug, Clone)]
struct TraversalContext {
    depth: u32,
    /// Frames on the current path, for cycle detection.
    visited: Arc<HashSet<String>>,
}

impl TraversalContext {
    fn new() -> Self {
        Self {
            depth: 0,
            visited: Arc::new(HashSet::new()),
        }
    }

    /// Enters `frame`, returning `None` if it is already on the path.
    fn enter(&self, frame: String) -> Option<Self> {
        if self.visited.contains(&frame) {
            return None;
        }
        let mut visited = (*self.visited).clone();
        visited.insert(frame);
        Some(Self {
            depth: self.depth + 1,
            visited: Arc::new(visited),
        })
    }
}

pub struct Evaluator {
    schema: &'static Schema,
    max_depth: u32,
}

impl Evaluator {
    pub fn new(schema: &'static Schema) -> Self {
        Self {
            schema,
            max_depth: MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    /// Does `subject` hold `permission` on `object`?
    pub async fn check(
        &self,
        snapshot: &dyn PolicySnapshot,
        subject: &SubjectRef,
        permission: &str,
        object: &ObjectRef,
    ) -> Result<bool> {
        self.schema.validate_name(object.object_type, permission)?;
        self.check_frame(snapshot, subject, permission, object.clone(), TraversalContext::new())
            .await
    }

    fn check_frame<'a>(
        &'a self,
        snapshot: &'a dyn PolicySnapshot,
        subject: &'a SubjectRef,
        name: &'a str,
        object: ObjectRef,
        ctx: TraversalContext,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            if ctx.depth >= self.max_depth {
                warn!(%subject, name, %object, max_depth = self.max_depth, "check depth limit reached");
                return Ok(false);
            }
            let Some(ctx) = ctx.enter(format!("{}|{}|{}", subject, name, object)) else {
                debug!(%subject, name, %object, "cycle detected, branch is false");
                return Ok(false);
            };
            let Some(rewrite) = self.schema.resolve(object.object_type, name) else {
                return Ok(false);
            };

            match rewrite {
                Rewrite::Relation(relation) => {
                    let tuples = snapshot.object_tuples(&object, relation.name).await?;
                    if tuples.iter().any(|t| t.subject == *subject) {
                        return Ok(true);
                    }
                    for tuple in tuples.iter().filter(|t| t.subject.is_userset()) {
                        let Some(userset_relation) = tuple.subject.relation.as_deref() else {
                            continue;
                        };
                        let Some(userset_relation) = self.static_name(tuple.subject.subject_type, userset_relation) else {
                            continue;
                        };
                        if self
                            .check_frame(snapshot, subject, userset_relation, tuple.subject.as_object(), ctx.clone())
                            .await?
                        {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                Rewrite::Permission(permission) => {
                    for operand in permission.operands {
                        let allowed = match *operand {
                            Operand::Computed(computed) => {
                                self.check_frame(snapshot, subject, computed, object.clone(), ctx.clone())
                                    .await?
                            }
                            Operand::Arrow { tupleset, computed } => {
                                self.check_arrow(snapshot, subject, tupleset, computed, &object, &ctx)
                                    .await?
                            }
                        };
                        if allowed {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
            }
        })
    }

    async fn check_arrow(
        &self,
        snapshot: &dyn PolicySnapshot,
        subject: &SubjectRef,
        tupleset: &str,
        computed: &'static str,
        object: &ObjectRef,
        ctx: &TraversalContext,
    ) -> Result<bool> {
        let parents = snapshot.object_tuples(object, tupleset).await?;
        for parent in parents {
            if self
                .check_frame(snapshot, subject, computed, parent.subject.as_object(), ctx.clone())
                .await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Maps a stored userset relation onto the schema's `'static` name.
    fn static_name(&self, object_type: ObjectType, name: &str) -> Option<&'static str> {
        match self.schema.resolve(object_type, name)? {
            Rewrite::Relation(r) => Some(r.name),
            Rewrite::Permission(p) => Some(p.name),
        }
    }

    /// Userset tree of everything holding `permission` on `object`.
    pub async fn expand(
        &self,
        snapshot: &dyn PolicySnapshot,
        permission: &str,
        object: &ObjectRef,
    ) -> Result<UsersetTree> {
        let name = match self.schema.validate_name(object.object_type, permission)? {
            Rewrite::Relation(r) => r.name,
            Rewrite::Permission(p) => p.name,
        };
        self.expand_frame(snapshot, name, object.clone(), TraversalContext::new())
            .await
    }

    fn expand_frame<'a>(
        &'a self,
        snapshot: &'a dyn PolicySnapshot,
        name: &'static str,
        object: ObjectRef,
        ctx: TraversalContext,
    ) -> BoxFuture<'a, Result<UsersetTree>> {
        Box::pin(async move {
            let truncated = |object: ObjectRef| UsersetTree {
                object,
                relation: name.to_string(),
                node: UsersetNode::Truncated,
            };
            if ctx.depth >= self.max_depth {
                warn!(name, %object, max_depth = self.max_depth, "expand depth limit reached");
                return Ok(truncated(object));
            }
            let Some(ctx) = ctx.enter(format!("{}|{}", name, object)) else {
                return Ok(truncated(object));
            };
            let Some(rewrite) = self.schema.resolve(object.object_type, name) else {
                return Ok(truncated(object));
            };

            let node = match rewrite {
                Rewrite::Relation(relation) => {
                    let tuples = snapshot.object_tuples(&object, relation.name).await?;
                    let concrete: Vec<SubjectRef> = tuples
                        .iter()
                        .filter(|t| !t.subject.is_userset())
                        .map(|t| t.subject.clone())
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .collect();
                    let mut children = Vec::new();
                    for tuple in tuples.iter().filter(|t| t.subject.is_userset()) {
                        let Some(rel) = tuple.subject.relation.as_deref() else {
                            continue;
                        };
                        let Some(rel) = self.static_name(tuple.subject.subject_type, rel) else {
                            continue;
                        };
                        children.push(
                            self.expand_frame(snapshot, rel, tuple.subject.as_object(), ctx.clone())
                                .await?,
                        );
                    }
                    if children.is_empty() {
                        UsersetNode::Leaf { subjects: concrete }
                    } else {
                        children.insert(
                            0,
                            UsersetTree {
                                object: object.clone(),
                                relation: name.to_string(),
                                node: UsersetNode::Leaf { subjects: concrete },
                            },
                        );
                        UsersetNode::Union { children }
                    }
                }
                Rewrite::Permission(permission) => {
                    let mut children = Vec::with_capacity(permission.operands.len());
                    for operand in permission.operands {
                        match *operand {
                            Operand::Computed(computed) => {
                                children.push(
                                    self.expand_frame(snapshot, computed, object.clone(), ctx.clone())
                                        .await?,
                                );
                            }
                            Operand::Arrow { tupleset, computed } => {
                                let parents = snapshot.object_tuples(&object, tupleset).await?;
                                let mut arrow_children = Vec::with_capacity(parents.len());
                                for parent in parents {
                                    arrow_children.push(
                                        self.expand_frame(
                                            snapshot,
                                            computed,
                                            parent.subject.as_object(),
                                            ctx.clone(),
                                        )
                                        .await?,
                                    );
                                }
                                children.push(UsersetTree {
                                    object: object.clone(),
                                    relation: format!("{}->{}", tupleset, computed),
                                    node: UsersetNode::Union {
                                        children: arrow_children,
                                    },
                                });
                            }
                        }
                    }
                    UsersetNode::Union { children }
                }
            };

            Ok(UsersetTree {
                object,
                relation: name.to_string(),
                node,
            })
        })
    }

    /// Sorted ids of `object_type` objects on which `subject` holds `permission`.
    pub async fn lookup_resources(
        &self,
        snapshot: &dyn PolicySnapshot,
        subject: &SubjectRef,
        permission: &str,
        object_type: ObjectType,
    ) -> Result<Vec<String>> {
        self.schema.validate_name(object_type, permission)?;
        let candidates = snapshot.object_ids(object_type).await?;
        let mut found = Vec::new();
        for id in candidates {
            let object = ObjectRef::new(object_type, id);
            if self
                .check_frame(snapshot, subject, permission, object.clone(), TraversalContext::new())
                .await?
            {
                found.push(object.id);
            }
        }
        found.sort();
        Ok(found)
    }

    /// Concrete subjects holding `permission` on `object`, optionally of one type.
    pub async fn lookup_subjects(
        &self,
        snapshot: &dyn PolicySnapshot,
        permission: &str,
        object: &ObjectRef,
        subject_type: Option<ObjectType>,
    ) -> Result<Vec<SubjectRef>> {
        let tree = self.expand(snapshot, permission, object).await?;
        Ok(tree
            .leaves()
            .into_iter()
            .filter(|s| subject_type.map_or(true, |t| s.subject_type == t))
            .collect())
    }
}
