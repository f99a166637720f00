//! Bastion Domains - domain lifecycle and invitation management
//!
//! Both managers authorize callers and write memberships exclusively through
//! an [`Authorizer`](bastion_core::Authorizer); domain rows and invitations
//! live in their own repositories.

mod access;
pub mod domains;
pub mod invitations;

pub use domains::{DomainService, PurgeReport, DEFAULT_FREEZE_RETENTION_DAYS};
pub use invitations::{
    AcceptFailure, AcceptOutcome, InvitationService, SendInvitation, CONFIRM_ATTEMPTS, MAX_ACCEPT,
};
