//! Shared fixtures for unit tests: PEM keys, claim sets and token signing.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};

pub const SITE_A_PRIVATE_PEM: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/site_a_private.pem"
));
pub const SITE_A_PUBLIC_PEM: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/site_a_public.pem"
));
pub const SITE_B_PRIVATE_PEM: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/site_b_private.pem"
));
pub const SITE_B_PUBLIC_PEM: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/site_b_public.pem"
));
/// Site A's public key as a PKCS#1 `RSA PUBLIC KEY` block.
pub const SITE_A_PUBLIC_PKCS1_PEM: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/site_a_public_pkcs1.pem"
));
/// A P-256 public key; valid PEM, but not RSA.
pub const EC_PUBLIC_PEM: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/ec_public.pem"
));

/// Claims under the standard profile, valid for the next two hours.
pub fn standard_claims(sub: &str, iss: &str, roles: &[&str]) -> Value {
    let now = chrono::Utc::now().timestamp();
    json!({
        "webid": format!("{}/user/{}", iss, sub),
        "iss": iss,
        "sub": sub,
        "roles": roles,
        "iat": now,
        "exp": now + 7200,
    })
}

/// Claims under the legacy profile, valid for the next two hours.
pub fn legacy_claims(uid: i64, name: &str, url: &str, roles: &[&str]) -> Value {
    let now = chrono::Utc::now().timestamp();
    json!({
        "uid": uid,
        "name": name,
        "url": url,
        "roles": roles,
        "iat": now,
        "exp": now + 7200,
    })
}

/// Copy of `claims` with one claim removed.
pub fn without(claims: &Value, name: &str) -> Value {
    let mut claims = claims.clone();
    if let Some(map) = claims.as_object_mut() {
        map.remove(name);
    }
    claims
}

pub fn sign_hmac(alg: Algorithm, claims: &Value, secret: &[u8]) -> String {
    jsonwebtoken::encode(&Header::new(alg), claims, &EncodingKey::from_secret(secret)).unwrap()
}

pub fn sign_rsa(alg: Algorithm, claims: &Value, private_pem: &str) -> String {
    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&Header::new(alg), claims, &key).unwrap()
}

/// Write a settings document into a fresh temp dir and return both.
pub fn settings_file(doc: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(crate::config::SETTINGS_FILE_NAME);
    std::fs::write(&path, doc).unwrap();
    (dir, path)
}
