//! Unit tests for bastion-core

use super::*;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};

// =============================================================================
// Error Tests
// =============================================================================

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            BastionError::not_found("domain", "x").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            BastionError::failed_precondition("frozen").kind(),
            ErrorKind::FailedPrecondition
        );
        assert_eq!(
            BastionError::deadline_exceeded("check").kind(),
            ErrorKind::DeadlineExceeded
        );
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(BastionError::internal("boom").is_retryable());
        assert!(BastionError::deadline_exceeded("check").is_retryable());
        assert!(!BastionError::conflict("dup").is_retryable());
        assert!(!BastionError::unauthenticated("bad").is_retryable());
        assert!(!BastionError::permission_denied("view", "domain").is_retryable());
    }

    #[test]
    fn test_internal_source_hidden_from_callers() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let err = BastionError::internal_with("query failed", io);
        assert_eq!(err.public_message(), "internal error");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_unauthenticated_message_is_uniform() {
        let a = BastionError::unauthenticated("unknown subject");
        let b = BastionError::unauthenticated("bad signature");
        assert_eq!(a.public_message(), b.public_message());
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::FailedPrecondition).unwrap();
        assert_eq!(json, "\"failed-precondition\"");
        assert_eq!(ErrorKind::InvalidArgument.to_string(), "invalid-argument");
    }
}

// =============================================================================
// Model Tests
// =============================================================================

#[cfg(test)]
mod model_tests {
    use super::*;

    fn sample_domain() -> Domain {
        Domain {
            id: DomainId::new(),
            name: "Acme".to_string(),
            alias: "acme".to_string(),
            tags: BTreeSet::from(["iot".to_string()]),
            metadata: HashMap::new(),
            status: DomainStatus::Enabled,
            created_by: UserId::new(),
            created_at: Utc::now(),
            updated_by: None,
            updated_at: None,
            frozen_at: None,
        }
    }

    #[test]
    fn test_domain_status_serialization() {
        let json = serde_json::to_string(&DomainStatus::Frozen).unwrap();
        assert_eq!(json, "\"frozen\"");

        let deserialized: DomainStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, DomainStatus::Frozen);
    }

    #[test]
    fn test_domain_status_transitions() {
        assert!(DomainStatus::Enabled.can_transition_to(DomainStatus::Disabled));
        assert!(DomainStatus::Disabled.can_transition_to(DomainStatus::Enabled));
        assert!(DomainStatus::Disabled.can_transition_to(DomainStatus::Frozen));
        assert!(!DomainStatus::Frozen.can_transition_to(DomainStatus::Enabled));
        assert!(!DomainStatus::Frozen.can_transition_to(DomainStatus::Disabled));
    }

    #[test]
    fn test_alias_validation() {
        assert!(validate_alias("acme").is_ok());
        assert!(validate_alias("acme_iot-01").is_ok());
        assert!(validate_alias("ab").is_err());
        assert!(validate_alias("Acme").is_err());
        assert!(validate_alias("acme corp").is_err());
        assert!(validate_alias(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_new_domain_validation() {
        let new = NewDomain {
            name: "  ".to_string(),
            alias: "acme".to_string(),
            ..Default::default()
        };
        assert_eq!(new.validate().unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_patch_apply() {
        let mut domain = sample_domain();
        let patch = DomainPatch {
            name: Some("Acme Corp".to_string()),
            tags: None,
            metadata: Some(HashMap::from([(
                "region".to_string(),
                serde_json::json!("eu"),
            )])),
        };
        patch.validate().unwrap();
        patch.apply(&mut domain);
        assert_eq!(domain.name, "Acme Corp");
        assert!(domain.tags.contains("iot"));
        assert_eq!(domain.metadata["region"], "eu");

        assert!(DomainPatch::default().validate().is_err());
    }

    #[test]
    fn test_domain_filter_matches() {
        let domain = sample_domain();
        let filter = DomainFilter {
            name: Some("acm".to_string()),
            tag: Some("iot".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&domain));

        let filter = DomainFilter {
            status: Some(DomainStatus::Disabled),
            ..Default::default()
        };
        assert!(!filter.matches(&domain));
    }

    #[test]
    fn test_domain_relation_parsing() {
        assert_eq!(
            "viewer".parse::<DomainRelation>().unwrap(),
            DomainRelation::Viewer
        );
        assert!("owner".parse::<DomainRelation>().is_err());
    }

    #[test]
    fn test_invitation_token_not_serialized() {
        let invitation = Invitation {
            invited_by: UserId::new(),
            user_id: UserId::new(),
            domain_id: DomainId::new(),
            relation: DomainRelation::Member,
            token: "secret".to_string(),
            created_at: Utc::now(),
            updated_at: None,
            confirmed_at: None,
        };
        let json = serde_json::to_value(&invitation).unwrap();
        assert!(json.get("token").is_none());
        assert_eq!(json["relation"], "member");
    }

    #[test]
    fn test_invitation_filter_scope() {
        let me = UserId::new();
        let managed = DomainId::new();
        let invitation = Invitation {
            invited_by: UserId::new(),
            user_id: UserId::new(),
            domain_id: managed,
            relation: DomainRelation::Viewer,
            token: String::new(),
            created_at: Utc::now(),
            updated_at: None,
            confirmed_at: None,
        };

        let own_only = InvitationFilter {
            scope: Some(InvitationScope {
                user: me,
                domains: vec![],
            }),
            ..Default::default()
        };
        assert!(!own_only.matches(&invitation));

        let with_domains = InvitationFilter {
            scope: Some(InvitationScope {
                user: me,
                domains: vec![managed],
            }),
            ..Default::default()
        };
        assert!(with_domains.matches(&invitation));

        let other_user = InvitationFilter {
            user_id: Some(me),
            scope: with_domains.scope.clone(),
            ..Default::default()
        };
        assert!(!other_user.matches(&invitation));

        let accepted = InvitationFilter {
            state: InvitationState::Accepted,
            ..Default::default()
        };
        assert!(!accepted.matches(&invitation));
    }
}
