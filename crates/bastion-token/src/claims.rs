//! Token kinds and the signed claim set.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use bastion_core::{BastionError, DomainId, DomainRelation, Result, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    Invitation,
    Recovery,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::Invitation => "invitation",
            TokenKind::Recovery => "recovery",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = BastionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "access" => Ok(TokenKind::Access),
            "refresh" => Ok(TokenKind::Refresh),
            "invitation" => Ok(TokenKind::Invitation),
            "recovery" => Ok(TokenKind::Recovery),
            other => Err(BastionError::invalid_argument(format!(
                "unknown token kind: {:?}",
                other
            ))),
        }
    }
}

/// The JWT payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    /// Subject (user id)
    pub sub: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    /// Nonce; the blacklist key.
    pub jti: String,
    pub kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Relation an invitation grants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<DomainRelation>,
    /// Refresh chain shared by an access/refresh pair and its rotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// What a verified token says about its bearer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainId>,
    pub kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<DomainRelation>,
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    pub(crate) fn from_claims(claims: &Claims) -> Result<Self> {
        let subject = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| BastionError::unauthenticated("token subject is not a user id"))?;
        let domain = claims
            .domain
            .as_deref()
            .map(str::parse::<DomainId>)
            .transpose()
            .map_err(|_| BastionError::unauthenticated("token domain is not a domain id"))?;
        Ok(Self {
            subject,
            domain,
            kind: claims.kind,
            relation: claims.relation,
            nonce: claims.jti.clone(),
            expires_at: claims.expires_at(),
        })
    }
}

/// A signed token plus the metadata callers usually want next to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub kind: TokenKind,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_and_display() {
        for kind in [
            TokenKind::Access,
            TokenKind::Refresh,
            TokenKind::Invitation,
            TokenKind::Recovery,
        ] {
            assert_eq!(kind.to_string().parse::<TokenKind>().unwrap(), kind);
        }
        assert!("session".parse::<TokenKind>().is_err());
    }

    #[test]
    fn test_optional_claims_omitted() {
        let claims = Claims {
            iss: "bastion".into(),
            aud: "bastion".into(),
            sub: UserId::new().to_string(),
            iat: 0,
            nbf: 0,
            exp: 60,
            jti: "n".into(),
            kind: TokenKind::Access,
            domain: None,
            relation: None,
            chain: None,
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("domain").is_none());
        assert!(json.get("chain").is_none());
        assert_eq!(json["kind"], "access");
    }

    #[test]
    fn test_identity_rejects_foreign_subject() {
        let claims = Claims {
            iss: "bastion".into(),
            aud: "bastion".into(),
            sub: "root".into(),
            iat: 0,
            nbf: 0,
            exp: 60,
            jti: "n".into(),
            kind: TokenKind::Access,
            domain: None,
            relation: None,
            chain: None,
        };
        let err = Identity::from_claims(&claims).unwrap_err();
        assert_eq!(err.kind(), bastion_core::ErrorKind::Unauthenticated);
    }
}
