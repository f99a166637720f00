//! Bastion Token - typed, Ed25519-signed tokens
//!
//! Four kinds share one envelope: `access`, `refresh`, `invitation` and
//! `recovery`. Refresh tokens rotate along a chain; every revocation lands in
//! the nonce blacklist, which a background task prunes once entries expire.

pub mod blacklist;
pub mod claims;
pub mod directory;
pub mod keys;
pub mod service;

pub use blacklist::{NonceBlacklist, PRUNE_INTERVAL};
pub use claims::{Claims, Identity, IssuedToken, TokenKind, TokenPair};
pub use directory::{OpenDirectory, StaticDirectory, SubjectDirectory};
pub use keys::{generate_pem_pair, GeneratedKeyPair, Jwk, JwkSet, KeySource, SigningKeys};
pub use service::{IssueRequest, TokenConfig, TokenService, LEEWAY_SECS, MAX_RECOVERY_TTL};
