//! The fixed authorization schema, compiled into typed definitions.
//!
//! ```text
//! platform: administrator            admin = administrator, member = administrator
//! domain:   platform, administrator, editor, viewer, member
//!           admin = administrator + platform->admin
//!           edit = editor + admin, view = viewer + edit, membership = member + view
//! group:    domain, administrator, editor, viewer
//!           admin = administrator + domain->admin, edit = editor + admin, view = viewer + edit
//! thing:    domain, group, administrator, editor, viewer
//!           admin = administrator + domain->admin, write = editor + admin
//!           read = viewer + write + group->view
//! ```

use std::fmt;

use bastion_core::{BastionError, ObjectType, RelationTuple, Result};

/// A subject type a relation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowedSubject {
    /// A concrete object of the type.
    Type(ObjectType),
    /// A userset `type#name`.
    Userset(ObjectType, &'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationDef {
    pub name: &'static str,
    pub allowed: &'static [AllowedSubject],
}

/// One term of a permission union.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// A relation or permission on the same object.
    Computed(&'static str),
    /// Follow `tupleset` to its subjects and evaluate `computed` there.
    Arrow {
        tupleset: &'static str,
        computed: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionDef {
    pub name: &'static str,
    pub operands: &'static [Operand],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDef {
    pub object_type: ObjectType,
    pub relations: &'static [RelationDef],
    pub permissions: &'static [PermissionDef],
}

/// What a name on a type rewrites to.
#[derive(Debug, Clone, Copy)]
pub enum Rewrite {
    Relation(&'static RelationDef),
    Permission(&'static PermissionDef),
}

#[derive(Debug)]
pub struct Schema {
    types: &'static [TypeDef],
}

use AllowedSubject::{Type, Userset};
use ObjectType::{Domain, Group, Platform, Thing, User};
use Operand::{Arrow, Computed};

const USERS: &[AllowedSubject] = &[Type(User)];
const GROUP_SUBJECTS: &[AllowedSubject] = &[Type(User), Type(Thing), Userset(Domain, "membership")];
const THING_SUBJECTS: &[AllowedSubject] = &[
    Type(User),
    Userset(Domain, "membership"),
    Userset(Group, "view"),
];

pub static SCHEMA: Schema = Schema {
    types: &[
        TypeDef {
            object_type: Platform,
            relations: &[RelationDef {
                name: "administrator",
                allowed: USERS,
            }],
            permissions: &[
                PermissionDef {
                    name: "admin",
                    operands: &[Computed("administrator")],
                },
                PermissionDef {
                    name: "member",
                    operands: &[Computed("administrator")],
                },
            ],
        },
        TypeDef {
            object_type: Domain,
            relations: &[
                RelationDef {
                    name: "platform",
                    allowed: &[Type(Platform)],
                },
                RelationDef {
                    name: "administrator",
                    allowed: USERS,
                },
                RelationDef {
                    name: "editor",
                    allowed: USERS,
                },
                RelationDef {
                    name: "viewer",
                    allowed: USERS,
                },
                RelationDef {
                    name: "member",
                    allowed: USERS,
                },
            ],
            permissions: &[
                PermissionDef {
                    name: "admin",
                    operands: &[
                        Computed("administrator"),
                        Arrow {
                            tupleset: "platform",
                            computed: "admin",
                        },
                    ],
                },
                PermissionDef {
                    name: "edit",
                    operands: &[Computed("editor"), Computed("admin")],
                },
                PermissionDef {
                    name: "view",
                    operands: &[Computed("viewer"), Computed("edit")],
                },
                PermissionDef {
                    name: "membership",
                    operands: &[Computed("member"), Computed("view")],
                },
            ],
        },
        TypeDef {
            object_type: Group,
            relations: &[
                RelationDef {
                    name: "domain",
                    allowed: &[Type(Domain)],
                },
                RelationDef {
                    name: "administrator",
                    allowed: GROUP_SUBJECTS,
                },
                RelationDef {
                    name: "editor",
                    allowed: GROUP_SUBJECTS,
                },
                RelationDef {
                    name: "viewer",
                    allowed: GROUP_SUBJECTS,
                },
            ],
            permissions: &[
                PermissionDef {
                    name: "admin",
                    operands: &[
                        Computed("administrator"),
                        Arrow {
                            tupleset: "domain",
                            computed: "admin",
                        },
                    ],
                },
                PermissionDef {
                    name: "edit",
                    operands: &[Computed("editor"), Computed("admin")],
                },
                PermissionDef {
                    name: "view",
                    operands: &[Computed("viewer"), Computed("edit")],
                },
            ],
        },
        TypeDef {
            object_type: Thing,
            relations: &[
                RelationDef {
                    name: "domain",
                    allowed: &[Type(Domain)],
                },
                RelationDef {
                    name: "group",
                    allowed: &[Type(Group)],
                },
                RelationDef {
                    name: "administrator",
                    allowed: THING_SUBJECTS,
                },
                RelationDef {
                    name: "editor",
                    allowed: THING_SUBJECTS,
                },
                RelationDef {
                    name: "viewer",
                    allowed: THING_SUBJECTS,
                },
            ],
            permissions: &[
                PermissionDef {
                    name: "admin",
                    operands: &[
                        Computed("administrator"),
                        Arrow {
                            tupleset: "domain",
                            computed: "admin",
                        },
                    ],
                },
                PermissionDef {
                    name: "write",
                    operands: &[Computed("editor"), Computed("admin")],
                },
                PermissionDef {
                    name: "read",
                    operands: &[
                        Computed("viewer"),
                        Computed("write"),
                        Arrow {
                            tupleset: "group",
                            computed: "view",
                        },
                    ],
                },
            ],
        },
        TypeDef {
            object_type: User,
            relations: &[],
            permissions: &[],
        },
    ],
};

impl TypeDef {
    pub fn relation(&self, name: &str) -> Option<&'static RelationDef> {
        let relations: &'static [RelationDef] = self.relations;
        relations.iter().find(|r| r.name == name)
    }

    pub fn permission(&self, name: &str) -> Option<&'static PermissionDef> {
        let permissions: &'static [PermissionDef] = self.permissions;
        permissions.iter().find(|p| p.name == name)
    }
}

impl Schema {
    pub const fn new(types: &'static [TypeDef]) -> Self {
        Self { types }
    }

    pub fn definition(&self, object_type: ObjectType) -> Option<&'static TypeDef> {
        let types: &'static [TypeDef] = self.types;
        types.iter().find(|t| t.object_type == object_type)
    }

    pub fn resolve(&self, object_type: ObjectType, name: &str) -> Option<Rewrite> {
        let def = self.definition(object_type)?;
        def.relation(name)
            .map(Rewrite::Relation)
            .or_else(|| def.permission(name).map(Rewrite::Permission))
    }

    /// Checks that `name` is a relation or permission on `object_type`.
    pub fn validate_name(&self, object_type: ObjectType, name: &str) -> Result<Rewrite> {
        self.resolve(object_type, name).ok_or_else(|| {
            BastionError::invalid_argument(format!(
                "{} has no relation or permission named {:?}",
                object_type, name
            ))
        })
    }

    /// Schema-level validation of a tuple: relation exists and the subject type is allowed.
    pub fn validate_tuple(&self, tuple: &RelationTuple) -> Result<()> {
        let def = self.definition(tuple.object.object_type).ok_or_else(|| {
            BastionError::invalid_argument(format!("unknown object type {}", tuple.object.object_type))
        })?;
        let relation = def.relation(&tuple.relation).ok_or_else(|| {
            BastionError::invalid_argument(format!(
                "{} has no relation {:?}",
                tuple.object.object_type, tuple.relation
            ))
        })?;

        let subject = &tuple.subject;
        let allowed = relation.allowed.iter().any(|allowed| match (allowed, &subject.relation) {
            (Type(t), None) => *t == subject.subject_type,
            (Userset(t, rel), Some(subject_rel)) => {
                *t == subject.subject_type && *rel == subject_rel.as_str()
            }
            _ => false,
        });
        if !allowed {
            return Err(BastionError::invalid_argument(format!(
                "subject {} is not allowed on {}#{}",
                subject, tuple.object.object_type, tuple.relation
            )));
        }
        Ok(())
    }

    /// Verifies every operand resolves; run once at startup and in tests.
    pub fn verify(&self) -> Result<()> {
        for def in self.types {
            for perm in def.permissions {
                for operand in perm.operands {
                    match operand {
                        Computed(name) => {
                            self.validate_name(def.object_type, name)?;
                        }
                        Arrow { tupleset, computed } => {
                            let rel = def.relation(tupleset).ok_or_else(|| {
                                BastionError::internal(format!(
                                    "{}#{} arrows through unknown relation {}",
                                    def.object_type, perm.name, tupleset
                                ))
                            })?;
                            for allowed in rel.allowed {
                                let Type(target) = allowed else {
                                    return Err(BastionError::internal(format!(
                                        "tupleset {}#{} must hold concrete objects",
                                        def.object_type, tupleset
                                    )));
                                };
                                self.validate_name(*target, computed)?;
                            }
                        }
                    }
                }
            }
            for rel in def.relations {
                for allowed in rel.allowed {
                    if let Userset(t, name) = allowed {
                        self.validate_name(*t, name)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for AllowedSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type(t) => write!(f, "{}", t),
            Userset(t, rel) => write!(f, "{}#{}", t, rel),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Computed(name) => f.write_str(name),
            Arrow { tupleset, computed } => write!(f, "{}->{}", tupleset, computed),
        }
    }
}

/// Renders the schema in the usual relation-definition syntax.
impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, def) in self.types.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "definition {} {{", def.object_type)?;
            for rel in def.relations {
                let allowed: Vec<String> = rel.allowed.iter().map(|a| a.to_string()).collect();
                writeln!(f, "    relation {}: {}", rel.name, allowed.join(" | "))?;
            }
            for perm in def.permissions {
                let operands: Vec<String> = perm.operands.iter().map(|o| o.to_string()).collect();
                writeln!(f, "    permission {} = {}", perm.name, operands.join(" + "))?;
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::{DomainId, GroupId, ObjectRef, SubjectRef, ThingId, UserId};

    #[test]
    fn test_schema_verifies() {
        SCHEMA.verify().unwrap();
    }

    #[test]
    fn test_schema_contains_definitions() {
        let rendered = SCHEMA.to_string();
        assert!(rendered.contains("definition platform"));
        assert!(rendered.contains("definition domain"));
        assert!(rendered.contains("definition group"));
        assert!(rendered.contains("definition thing"));
        assert!(rendered.contains("permission admin = administrator + platform->admin"));
        assert!(rendered.contains("permission read = viewer + write + group->view"));
    }

    #[test]
    fn test_resolve_relations_and_permissions() {
        assert!(matches!(
            SCHEMA.resolve(ObjectType::Domain, "viewer"),
            Some(Rewrite::Relation(_))
        ));
        assert!(matches!(
            SCHEMA.resolve(ObjectType::Domain, "membership"),
            Some(Rewrite::Permission(_))
        ));
        assert!(SCHEMA.resolve(ObjectType::Domain, "read").is_none());
        assert!(SCHEMA.resolve(ObjectType::User, "admin").is_none());
    }

    #[test]
    fn test_validate_tuple_subject_types() {
        let d = DomainId::new();
        let ok = RelationTuple::new(SubjectRef::user(&UserId::new()), "viewer", ObjectRef::domain(&d));
        SCHEMA.validate_tuple(&ok).unwrap();

        let bad_relation =
            RelationTuple::new(SubjectRef::user(&UserId::new()), "owner", ObjectRef::domain(&d));
        assert!(SCHEMA.validate_tuple(&bad_relation).is_err());

        let thing_on_domain = RelationTuple::new(
            SubjectRef::new(ObjectType::Thing, ThingId::new().to_string()),
            "viewer",
            ObjectRef::domain(&d),
        );
        assert!(SCHEMA.validate_tuple(&thing_on_domain).is_err());

        let userset = RelationTuple::new(
            SubjectRef::userset(&ObjectRef::group(&GroupId::new()), "view"),
            "viewer",
            ObjectRef::thing(&ThingId::new()),
        );
        SCHEMA.validate_tuple(&userset).unwrap();

        let wrong_userset = RelationTuple::new(
            SubjectRef::userset(&ObjectRef::group(&GroupId::new()), "admin"),
            "viewer",
            ObjectRef::thing(&ThingId::new()),
        );
        assert!(SCHEMA.validate_tuple(&wrong_userset).is_err());
    }
}
