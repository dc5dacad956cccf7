//! Per-site signing algorithm resolution.
//!
//! Binds a site's declared algorithm name to its loaded key material,
//! producing a verifier that lives as long as the registry holding it.

use jsonwebtoken::{Algorithm, DecodingKey};
use std::fmt;

use super::material::{KeyLoadError, KeyLoader, KeyMaterial};
use crate::config::Site;

/// Family of a signing algorithm, which decides the acceptable key encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmFamily {
    Hmac,
    Rsa,
}

impl fmt::Display for AlgorithmFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hmac => write!(f, "HMAC"),
            Self::Rsa => write!(f, "RSA"),
        }
    }
}

/// Match an algorithm name like "hs256" or "RS512", ignoring case.
pub fn parse_algorithm(name: &str) -> Result<(AlgorithmFamily, Algorithm), AlgorithmError> {
    let upper = name.trim().to_ascii_uppercase();
    let unsupported = || AlgorithmError::UnsupportedAlgorithm(name.to_string());

    let (family, width) = if let Some(width) = upper.strip_prefix("HS") {
        (AlgorithmFamily::Hmac, width)
    } else if let Some(width) = upper.strip_prefix("RS") {
        (AlgorithmFamily::Rsa, width)
    } else {
        return Err(unsupported());
    };

    let algorithm = match (family, width) {
        (AlgorithmFamily::Hmac, "256") => Algorithm::HS256,
        (AlgorithmFamily::Hmac, "384") => Algorithm::HS384,
        (AlgorithmFamily::Hmac, "512") => Algorithm::HS512,
        (AlgorithmFamily::Rsa, "256") => Algorithm::RS256,
        (AlgorithmFamily::Rsa, "384") => Algorithm::RS384,
        (AlgorithmFamily::Rsa, "512") => Algorithm::RS512,
        _ => return Err(unsupported()),
    };

    Ok((family, algorithm))
}

/// A site's algorithm bound to its verification key.
/// RSA keys must be X.509 SubjectPublicKeyInfo, not PKCS#1 or private keys.
const SPKI_PEM_HEADER: &[u8] = b"-----BEGIN PUBLIC KEY-----";

#[derive(Clone)]
pub struct SiteAlgorithm {
    algorithm: Algorithm,
    family: AlgorithmFamily,
    key: DecodingKey,
}

impl SiteAlgorithm {
    /// Bind an algorithm to decoded key material.
    pub fn new(algorithm: Algorithm, material: KeyMaterial) -> Result<Self, AlgorithmError> {
        let family = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => AlgorithmFamily::Hmac,
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => AlgorithmFamily::Rsa,
            other => return Err(AlgorithmError::UnsupportedAlgorithm(format!("{:?}", other))),
        };

        let key = match (family, material) {
            (AlgorithmFamily::Hmac, KeyMaterial::Secret(secret)) => DecodingKey::from_secret(&secret),
            (AlgorithmFamily::Rsa, KeyMaterial::Pem(pem)) => {
                if !pem.trim_ascii_start().starts_with(SPKI_PEM_HEADER) {
                    return Err(KeyLoadError::InvalidKey(
                        "expected a PEM \"PUBLIC KEY\" (SubjectPublicKeyInfo) block".to_string(),
                    )
                    .into());
                }
                DecodingKey::from_rsa_pem(&pem).map_err(|e| KeyLoadError::InvalidKey(e.to_string()))?
            }
            (family, _) => {
                return Err(KeyLoadError::UnsupportedEncoding {
                    encoding: "mismatched key material".to_string(),
                    family,
                }
                .into());
            }
        };

        Ok(Self {
            algorithm,
            family,
            key,
        })
    }

    /// Parse the site's algorithm, load its key and bind the two.
    pub fn resolve(site: &Site, loader: &KeyLoader) -> Result<Self, AlgorithmError> {
        let (family, algorithm) = parse_algorithm(&site.algorithm)?;
        let material = loader.load(site, family)?;
        Self::new(algorithm, material)
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn family(&self) -> AlgorithmFamily {
        self.family
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// Canonical algorithm name, e.g. "HS256".
    pub fn name(&self) -> &'static str {
        match self.algorithm {
            Algorithm::HS256 => "HS256",
            Algorithm::HS384 => "HS384",
            Algorithm::HS512 => "HS512",
            Algorithm::RS256 => "RS256",
            Algorithm::RS384 => "RS384",
            Algorithm::RS512 => "RS512",
            _ => "unsupported",
        }
    }
}

impl fmt::Debug for SiteAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteAlgorithm")
            .field("algorithm", &self.name())
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

/// Errors resolving a site's algorithm. Each one disqualifies only that site.
#[derive(Debug)]
pub enum AlgorithmError {
    /// Unknown family prefix or hash width.
    UnsupportedAlgorithm(String),
    /// The key could not be loaded or does not fit the algorithm.
    Key(KeyLoadError),
}

impl fmt::Display for AlgorithmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedAlgorithm(name) => write!(f, "unsupported algorithm '{}'", name),
            Self::Key(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AlgorithmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Key(e) => Some(e),
            Self::UnsupportedAlgorithm(_) => None,
        }
    }
}

impl From<KeyLoadError> for AlgorithmError {
    fn from(e: KeyLoadError) -> Self {
        Self::Key(e)
    }
}
