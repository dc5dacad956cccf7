//! Per-request authentication decision.

use http::Method;
use tracing::{debug, info};

use crate::auth::context::{AuthMethod, AuthResult, Identity, PLATFORM_ROLE, RejectReason};
use crate::auth::origin::RequestOrigin;
use crate::registry::{SharedRegistry, SiteRegistry, token_fingerprint};
use crate::token;

/// The parts of an HTTP request the authenticator reads.
#[derive(Debug, Clone)]
pub struct AuthRequest<'a> {
    /// Raw `Authorization` header value, if any.
    pub authorization: Option<&'a str>,
    pub method: &'a Method,
    /// Effective origin; `None` when the request carried no usable host.
    pub origin: Option<&'a RequestOrigin>,
}

/// Split `Bearer <token>` into the token, matching the scheme ignoring case.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let mut parts = header.split(' ');
    let scheme = parts.next()?;
    let token = parts.next()?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}

fn is_safe_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

/// Decide whether a request is admitted and under which identity.
///
/// Order: anonymous access (no header), header shape, static tokens, JWT
/// decode, issuer lookup with default fallback, signature check.
pub fn authenticate(registry: &SiteRegistry, request: &AuthRequest<'_>) -> AuthResult {
    let Some(header) = request.authorization else {
        return match request.origin {
            Some(origin) if is_safe_method(request.method) && registry.allows_anonymous(origin) => {
                debug!(origin = %origin, method = %request.method, "Anonymous access granted");
                AuthResult::Authenticated(Identity::anonymous(&origin.to_string()))
            }
            _ => AuthResult::rejected(RejectReason::NoToken),
        };
    };

    let Some(bearer) = parse_bearer(header) else {
        debug!("Authorization header is not a bearer credential");
        return AuthResult::rejected(RejectReason::MalformedHeader);
    };

    if let Some(record) = registry.static_token(bearer) {
        info!(
            token = %token_fingerprint(bearer),
            user = %record.user,
            "Authenticated with static token"
        );
        let roles = record
            .roles
            .iter()
            .cloned()
            .chain([PLATFORM_ROLE.to_string()]);
        return AuthResult::Authenticated(Identity::new(
            record.user.as_str(),
            roles,
            AuthMethod::StaticToken,
        ));
    }

    let decoded = match token::decode(bearer, registry.claim_profiles()) {
        Ok(decoded) => decoded,
        Err(e) => {
            debug!(error = %e, "Bearer token is not a usable JWT");
            return AuthResult::rejected(RejectReason::InvalidToken);
        }
    };

    let Some(algorithm) = registry.algorithm_for(decoded.issuer()) else {
        info!(issuer = decoded.issuer(), "No site configured for token issuer");
        return AuthResult::rejected(RejectReason::UnknownSite);
    };

    if !token::verify(&decoded, algorithm) {
        info!(
            issuer = decoded.issuer(),
            user = decoded.display_name(),
            "Token signature verification failed"
        );
        return AuthResult::rejected(RejectReason::SignatureInvalid);
    }

    info!(
        issuer = decoded.issuer(),
        user = decoded.display_name(),
        profile = %decoded.profile(),
        "Authenticated with JWT"
    );
    let roles = decoded
        .roles()
        .iter()
        .cloned()
        .chain([PLATFORM_ROLE.to_string(), decoded.issuer().to_string()]);
    AuthResult::Authenticated(Identity::new(decoded.display_name(), roles, AuthMethod::Jwt))
}

/// Authenticator bound to a reloadable registry.
#[derive(Debug, Clone)]
pub struct AuthExtractor {
    registry: SharedRegistry,
}

impl AuthExtractor {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Whether authentication is switched off globally.
    pub fn is_disabled(&self) -> bool {
        self.registry.current().is_disabled()
    }

    /// Authenticate against the registry current at call time.
    pub fn authenticate(&self, request: &AuthRequest<'_>) -> AuthResult {
        authenticate(&self.registry.current(), request)
    }
}
