//! Outcome of one authentication attempt.

use http::StatusCode;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::types::Principal;

/// Role every authenticated identity carries.
pub const PLATFORM_ROLE: &str = "islandora";

/// Role given to unauthenticated safe-method access.
pub const ANONYMOUS_ROLE: &str = "anonymous";

/// How an identity was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Jwt,
    StaticToken,
    Anonymous,
}

/// Authenticated principal and its roles.
///
/// Immutable once created; the host reads it to make authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    user: Principal,
    roles: BTreeSet<String>,
    method: AuthMethod,
}

impl Identity {
    pub fn new(
        user: impl Into<Principal>,
        roles: impl IntoIterator<Item = String>,
        method: AuthMethod,
    ) -> Self {
        Self {
            user: user.into(),
            roles: roles.into_iter().collect(),
            method,
        }
    }

    /// Identity for unauthenticated access to `origin`.
    pub fn anonymous(origin: &str) -> Self {
        Self::new(
            ANONYMOUS_ROLE,
            [
                ANONYMOUS_ROLE.to_string(),
                PLATFORM_ROLE.to_string(),
                origin.to_string(),
            ],
            AuthMethod::Anonymous,
        )
    }

    pub fn user(&self) -> &Principal {
        &self.user
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn method(&self) -> AuthMethod {
        self.method
    }

    pub fn is_anonymous(&self) -> bool {
        self.method == AuthMethod::Anonymous
    }

    /// Roles joined with commas, for the outbound role header.
    pub fn role_header_value(&self) -> String {
        self.roles.iter().map(String::as_str).collect::<Vec<_>>().join(",")
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// No Authorization header and anonymous access not allowed.
    NoToken,
    /// Authorization header is not `Bearer <token>`.
    MalformedHeader,
    /// Bearer value is neither a static token nor a decodable JWT.
    InvalidToken,
    /// No site (and no default) for the token's issuer.
    UnknownSite,
    /// The token is well formed but its signature or lifetime did not check out.
    SignatureInvalid,
}

impl RejectReason {
    /// 403 for a bad signature, 401 for everything else.
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::SignatureInvalid => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoToken => write!(f, "no bearer token"),
            Self::MalformedHeader => write!(f, "malformed Authorization header"),
            Self::InvalidToken => write!(f, "invalid token"),
            Self::UnknownSite => write!(f, "no site configured for token issuer"),
            Self::SignatureInvalid => write!(f, "token signature did not verify"),
        }
    }
}

/// Result of running the authenticator over one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuthResult {
    Authenticated(Identity),
    Rejected { reason: RejectReason },
}

impl AuthResult {
    pub fn rejected(reason: RejectReason) -> Self {
        Self::Rejected { reason }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Authenticated(identity) => Some(identity),
            Self::Rejected { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Authenticated(_) => None,
            Self::Rejected { reason } => Some(*reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_identity() {
        let identity = Identity::anonymous("http://a.com");
        assert_eq!(identity.user().as_str(), "anonymous");
        assert!(identity.is_anonymous());
        assert!(identity.has_role("anonymous"));
        assert!(identity.has_role("islandora"));
        assert!(identity.has_role("http://a.com"));
    }

    #[test]
    fn test_roles_deduplicated_and_joined() {
        let identity = Identity::new(
            "bob",
            ["islandora".to_string(), "editor".to_string(), "islandora".to_string()],
            AuthMethod::Jwt,
        );
        assert_eq!(identity.roles().len(), 2);
        assert_eq!(identity.role_header_value(), "editor,islandora");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RejectReason::SignatureInvalid.status_code(), StatusCode::FORBIDDEN);
        for reason in [
            RejectReason::NoToken,
            RejectReason::MalformedHeader,
            RejectReason::InvalidToken,
            RejectReason::UnknownSite,
        ] {
            assert_eq!(reason.status_code(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn test_auth_result_serializes_tagged() {
        let rejected = serde_json::to_value(AuthResult::rejected(RejectReason::UnknownSite)).unwrap();
        assert_eq!(rejected["outcome"], "rejected");
        assert_eq!(rejected["reason"], "unknown_site");

        let ok = serde_json::to_value(AuthResult::Authenticated(Identity::new(
            "bob",
            ["islandora".to_string()],
            AuthMethod::Jwt,
        )))
        .unwrap();
        assert_eq!(ok["outcome"], "authenticated");
        assert_eq!(ok["user"], "bob");
        assert_eq!(ok["method"], "jwt");
    }
}
