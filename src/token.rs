//! JWT decoding and signature verification.
//!
//! Decoding reads the claims without trusting the signature so the issuer
//! can pick the verification key; [`verify`] then checks the signature and
//! the temporal claims with that key.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

use crate::keys::SiteAlgorithm;

/// Claim-naming convention a token was minted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimProfile {
    /// Registered claim names: `webid`, `iss`, `sub`.
    Standard,
    /// Older tokens: `uid`, `url`, `name`.
    Legacy,
}

/// Names of the six required claims under one profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimNames {
    pub subject_id: &'static str,
    pub issuer: &'static str,
    pub display_name: &'static str,
    pub roles: &'static str,
    pub issued_at: &'static str,
    pub expires_at: &'static str,
}

impl ClaimNames {
    fn all(&self) -> [&'static str; 6] {
        [
            self.subject_id,
            self.issuer,
            self.display_name,
            self.roles,
            self.issued_at,
            self.expires_at,
        ]
    }
}

impl ClaimProfile {
    /// Every profile, in default preference order.
    pub const ALL: [ClaimProfile; 2] = [ClaimProfile::Standard, ClaimProfile::Legacy];

    pub fn names(self) -> ClaimNames {
        match self {
            Self::Standard => ClaimNames {
                subject_id: "webid",
                issuer: "iss",
                display_name: "sub",
                roles: "roles",
                issued_at: "iat",
                expires_at: "exp",
            },
            Self::Legacy => ClaimNames {
                subject_id: "uid",
                issuer: "url",
                display_name: "name",
                roles: "roles",
                issued_at: "iat",
                expires_at: "exp",
            },
        }
    }
}

impl fmt::Display for ClaimProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

/// A structurally valid JWT whose signature has not been checked yet.
#[derive(Debug, Clone)]
pub struct DecodedToken {
    raw: String,
    header: Header,
    profile: ClaimProfile,
    subject_id: String,
    issuer: String,
    display_name: String,
    roles: Vec<String>,
    issued_at: i64,
    expires_at: i64,
}

impl DecodedToken {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn profile(&self) -> ClaimProfile {
        self.profile
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Site URL the token claims to come from.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn issued_at(&self) -> i64 {
        self.issued_at
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

/// Why a bearer string could not be decoded as a JWT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Not three base64url segments, or header/payload is not JSON.
    MalformedToken(String),
    /// A required claim is absent under every accepted profile.
    MissingClaim(&'static str),
    /// A required claim is present with the wrong type.
    InvalidClaim(&'static str),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedToken(msg) => write!(f, "malformed token: {}", msg),
            Self::MissingClaim(name) => write!(f, "missing required claim '{}'", name),
            Self::InvalidClaim(name) => write!(f, "claim '{}' has an unexpected type", name),
        }
    }
}

impl std::error::Error for TokenError {}

/// Decode a JWT without verifying its signature.
///
/// `profiles` lists the accepted claim-naming profiles in preference order;
/// the first whose six claims are all present is used. An empty list
/// accepts every profile.
pub fn decode(token: &str, profiles: &[ClaimProfile]) -> Result<DecodedToken, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let header =
        jsonwebtoken::decode_header(token).map_err(|e| TokenError::MalformedToken(e.to_string()))?;

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1])
        .map_err(|e| TokenError::MalformedToken(format!("payload: {}", e)))?;
    let claims: Map<String, Value> = serde_json::from_slice(&payload)
        .map_err(|e| TokenError::MalformedToken(format!("payload: {}", e)))?;

    let profiles = if profiles.is_empty() {
        &ClaimProfile::ALL[..]
    } else {
        profiles
    };
    let profile = select_profile(&claims, profiles)?;
    let names = profile.names();

    Ok(DecodedToken {
        raw: token.to_string(),
        header,
        profile,
        subject_id: scalar_claim(&claims, names.subject_id)?,
        issuer: string_claim(&claims, names.issuer)?,
        display_name: string_claim(&claims, names.display_name)?,
        roles: roles_claim(&claims, names.roles)?,
        issued_at: timestamp_claim(&claims, names.issued_at)?,
        expires_at: timestamp_claim(&claims, names.expires_at)?,
    })
}

/// Check the signature and temporal claims with the site's key.
///
/// Any failure, expiry included, yields `false`.
pub fn verify(token: &DecodedToken, algorithm: &SiteAlgorithm) -> bool {
    let mut validation = Validation::new(algorithm.algorithm());
    validation.validate_aud = false;

    if let Err(e) =
        jsonwebtoken::decode::<Value>(&token.raw, algorithm.decoding_key(), &validation)
    {
        debug!(issuer = %token.issuer, error = %e, "JWT verification failed");
        return false;
    }

    // jsonwebtoken leaves `iat` alone; tokens issued in the future are refused.
    let now = chrono::Utc::now().timestamp();
    let leeway = i64::try_from(validation.leeway).unwrap_or(i64::MAX);
    if token.issued_at > now.saturating_add(leeway) {
        debug!(issuer = %token.issuer, iat = token.issued_at, "JWT issued in the future");
        return false;
    }

    true
}

fn present(claims: &Map<String, Value>, name: &str) -> bool {
    claims.get(name).is_some_and(|v| !v.is_null())
}

fn select_profile(
    claims: &Map<String, Value>,
    profiles: &[ClaimProfile],
) -> Result<ClaimProfile, TokenError> {
    let mut closest: Option<(usize, &'static str)> = None;

    for profile in profiles {
        let names = profile.names().all();
        let missing: Vec<&'static str> = names
            .iter()
            .copied()
            .filter(|name| !present(claims, name))
            .collect();

        let Some(first_missing) = missing.first().copied() else {
            return Ok(*profile);
        };

        let found = names.len() - missing.len();
        if closest.is_none_or(|(best, _)| found > best) {
            closest = Some((found, first_missing));
        }
    }

    let name = closest.map(|(_, name)| name).unwrap_or("iss");
    Err(TokenError::MissingClaim(name))
}

fn string_claim(claims: &Map<String, Value>, name: &'static str) -> Result<String, TokenError> {
    match claims.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(TokenError::InvalidClaim(name)),
    }
}

/// Subject ids are strings or numbers (numeric user ids in older tokens).
fn scalar_claim(claims: &Map<String, Value>, name: &'static str) -> Result<String, TokenError> {
    match claims.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(TokenError::InvalidClaim(name)),
    }
}

fn roles_claim(claims: &Map<String, Value>, name: &'static str) -> Result<Vec<String>, TokenError> {
    match claims.get(name) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                _ => Err(TokenError::InvalidClaim(name)),
            })
            .collect(),
        _ => Err(TokenError::InvalidClaim(name)),
    }
}

fn timestamp_claim(claims: &Map<String, Value>, name: &'static str) -> Result<i64, TokenError> {
    match claims.get(name) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or(TokenError::InvalidClaim(name)),
        _ => Err(TokenError::InvalidClaim(name)),
    }
}
