//! Key material loading.
//!
//! Resolves a site's raw key bytes from an inline value or a key file and
//! decodes them according to the declared encoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use super::algorithm::AlgorithmFamily;
use crate::config::Site;

/// Declared encoding of a site's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEncoding {
    Plain,
    Base64,
    Pem,
}

impl KeyEncoding {
    /// Match an encoding name, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("plain") {
            Some(Self::Plain)
        } else if name.eq_ignore_ascii_case("base64") {
            Some(Self::Base64)
        } else if name.eq_ignore_ascii_case("pem") {
            Some(Self::Pem)
        } else {
            None
        }
    }

    fn supported_by(self, family: AlgorithmFamily) -> bool {
        match family {
            AlgorithmFamily::Hmac => matches!(self, Self::Plain | Self::Base64),
            AlgorithmFamily::Rsa => self == Self::Pem,
        }
    }
}

/// Decoded key bytes, ready for the algorithm resolver.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// HMAC shared secret.
    Secret(Vec<u8>),
    /// PEM document holding an RSA public key.
    Pem(Vec<u8>),
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret(s) => write!(f, "Secret({} bytes)", s.len()),
            Self::Pem(p) => write!(f, "Pem({} bytes)", p.len()),
        }
    }
}

/// Loads key material for sites, resolving relative key paths against a root.
#[derive(Debug, Clone)]
pub struct KeyLoader {
    key_root: PathBuf,
}

impl KeyLoader {
    pub fn new(key_root: impl Into<PathBuf>) -> Self {
        Self {
            key_root: key_root.into(),
        }
    }

    pub fn key_root(&self) -> &Path {
        &self.key_root
    }

    /// Expand a key path to an absolute location that exists and can be read.
    pub fn expand_path(&self, path: &str) -> Result<PathBuf, KeyLoadError> {
        let candidate = Path::new(path);
        let candidate = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.key_root.join(candidate)
        };

        let not_found = |source| KeyLoadError::KeyNotFound {
            path: candidate.clone(),
            source,
        };

        let resolved = fs::canonicalize(&candidate).map_err(not_found)?;
        // Opening proves readability; a directory opens fine on unix, so check the kind too.
        let file = fs::File::open(&resolved).map_err(not_found)?;
        let is_file = file.metadata().map(|m| m.is_file()).map_err(not_found)?;
        if !is_file {
            return Err(KeyLoadError::KeyNotFound {
                path: resolved,
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }

        Ok(resolved)
    }

    /// Load and decode a site's key for the given algorithm family.
    ///
    /// The inline `key` wins when both are present; the registry rejects such
    /// sites before they get here.
    pub fn load(&self, site: &Site, family: AlgorithmFamily) -> Result<KeyMaterial, KeyLoadError> {
        let encoding = KeyEncoding::parse(&site.encoding)
            .filter(|e| e.supported_by(family))
            .ok_or_else(|| KeyLoadError::UnsupportedEncoding {
                encoding: site.encoding.clone(),
                family,
            })?;

        let raw = self.read_raw(site)?;

        match encoding {
            KeyEncoding::Plain => Ok(KeyMaterial::Secret(raw)),
            KeyEncoding::Base64 => STANDARD
                .decode(raw.trim_ascii())
                .map(KeyMaterial::Secret)
                .map_err(|e| KeyLoadError::InvalidEncoding(e.to_string())),
            KeyEncoding::Pem => Ok(KeyMaterial::Pem(raw.trim_ascii().to_vec())),
        }
    }

    fn read_raw(&self, site: &Site) -> Result<Vec<u8>, KeyLoadError> {
        if let Some(key) = site.key.as_deref().filter(|k| !k.is_empty()) {
            return Ok(key.trim().as_bytes().to_vec());
        }

        let Some(path) = site.path.as_deref().filter(|p| !p.is_empty()) else {
            return Err(KeyLoadError::NoKeySource);
        };

        let path = self.expand_path(path)?;
        fs::read(&path).map_err(|source| KeyLoadError::KeyNotFound { path, source })
    }
}

/// Errors loading a site's key. Each one disqualifies only that site.
#[derive(Debug)]
pub enum KeyLoadError {
    /// Neither an inline key nor a key path was given.
    NoKeySource,
    /// The key file is missing or unreadable.
    KeyNotFound {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The key is not valid base64.
    InvalidEncoding(String),
    /// The PEM document is malformed or does not hold an RSA public key.
    InvalidKey(String),
    /// The encoding is unknown or does not fit the algorithm family.
    UnsupportedEncoding {
        encoding: String,
        family: AlgorithmFamily,
    },
}

impl fmt::Display for KeyLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoKeySource => write!(f, "no key or key path given"),
            Self::KeyNotFound { path, source } => {
                write!(f, "key file {} not readable: {}", path.display(), source)
            }
            Self::InvalidEncoding(msg) => write!(f, "invalid base64 key: {}", msg),
            Self::InvalidKey(msg) => write!(f, "invalid public key: {}", msg),
            Self::UnsupportedEncoding { encoding, family } => {
                write!(f, "encoding '{}' not supported for {} keys", encoding, family)
            }
        }
    }
}

impl std::error::Error for KeyLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::KeyNotFound { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn inline_site(key: &str, encoding: &str) -> Site {
        Site {
            url: Some("http://test.com".to_string()),
            algorithm: "HS256".to_string(),
            key: Some(key.to_string()),
            encoding: encoding.to_string(),
            ..Default::default()
        }
    }

    fn path_site(path: &str, encoding: &str) -> Site {
        Site {
            url: Some("http://test.com".to_string()),
            algorithm: "HS256".to_string(),
            path: Some(path.to_string()),
            encoding: encoding.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_encoding_parse_ignores_case() {
        assert_eq!(KeyEncoding::parse("PEM"), Some(KeyEncoding::Pem));
        assert_eq!(KeyEncoding::parse("pem"), Some(KeyEncoding::Pem));
        assert_eq!(KeyEncoding::parse("Base64"), Some(KeyEncoding::Base64));
        assert_eq!(KeyEncoding::parse("plain"), Some(KeyEncoding::Plain));
        assert_eq!(KeyEncoding::parse("badalgorithm"), None);
    }

    #[test]
    fn test_inline_plain_is_trimmed() {
        let loader = KeyLoader::new(".");
        let material = loader
            .load(&inline_site("\n   test data\n  ", "plain"), AlgorithmFamily::Hmac)
            .unwrap();
        assert_eq!(material, KeyMaterial::Secret(b"test data".to_vec()));
    }

    #[test]
    fn test_inline_base64_decoded() {
        let loader = KeyLoader::new(".");
        let material = loader
            .load(
                &inline_site("am9uYXRoYW4gaXMgYXdlc29tZQ==", "base64"),
                AlgorithmFamily::Hmac,
            )
            .unwrap();
        assert_eq!(material, KeyMaterial::Secret(b"jonathan is awesome".to_vec()));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let loader = KeyLoader::new(".");
        let err = loader
            .load(&inline_site("this is invalid base64", "base64"), AlgorithmFamily::Hmac)
            .unwrap_err();
        assert!(matches!(err, KeyLoadError::InvalidEncoding(_)));
    }

    #[test]
    fn test_unknown_encoding_rejected() {
        let loader = KeyLoader::new(".");
        let err = loader
            .load(&inline_site("secret", "badalgorithm"), AlgorithmFamily::Hmac)
            .unwrap_err();
        assert!(matches!(err, KeyLoadError::UnsupportedEncoding { .. }));
    }

    #[test]
    fn test_encoding_must_fit_family() {
        let loader = KeyLoader::new(".");
        let rsa_plain = loader
            .load(&inline_site("test data", "plain"), AlgorithmFamily::Rsa)
            .unwrap_err();
        assert!(matches!(
            rsa_plain,
            KeyLoadError::UnsupportedEncoding {
                family: AlgorithmFamily::Rsa,
                ..
            }
        ));

        let hmac_pem = loader
            .load(&inline_site("test data", "PEM"), AlgorithmFamily::Hmac)
            .unwrap_err();
        assert!(matches!(hmac_pem, KeyLoadError::UnsupportedEncoding { .. }));
    }

    #[test]
    fn test_relative_path_resolves_against_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("site.key"), b"file secret\n").unwrap();

        let loader = KeyLoader::new(dir.path());
        let expanded = loader.expand_path("site.key").unwrap();
        assert!(expanded.is_absolute());

        // File contents are used as-is for plain secrets.
        let material = loader
            .load(&path_site("site.key", "plain"), AlgorithmFamily::Hmac)
            .unwrap();
        assert_eq!(material, KeyMaterial::Secret(b"file secret\n".to_vec()));
    }

    #[test]
    fn test_base64_file_tolerates_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b64.key"), b"am9uYXRoYW4gaXMgYXdlc29tZQ==\n").unwrap();

        let loader = KeyLoader::new(dir.path());
        let material = loader
            .load(&path_site("b64.key", "base64"), AlgorithmFamily::Hmac)
            .unwrap();
        assert_eq!(material, KeyMaterial::Secret(b"jonathan is awesome".to_vec()));
    }

    #[test]
    fn test_missing_file_is_key_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let loader = KeyLoader::new(dir.path());

        let err = loader.expand_path("missing.key").unwrap_err();
        assert!(matches!(err, KeyLoadError::KeyNotFound { .. }));

        let err = loader
            .load(&path_site("missing.key", "plain"), AlgorithmFamily::Hmac)
            .unwrap_err();
        assert!(matches!(err, KeyLoadError::KeyNotFound { .. }));
    }

    #[test]
    fn test_directory_is_not_a_key_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("keys")).unwrap();
        let loader = KeyLoader::new(dir.path());
        assert!(matches!(
            loader.expand_path("keys"),
            Err(KeyLoadError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_pem_file_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("public.pem");
        fs::write(&path, testutil::SITE_A_PUBLIC_PEM).unwrap();

        let loader = KeyLoader::new("/nonexistent");
        let material = loader
            .load(&path_site(path.to_str().unwrap(), "PEM"), AlgorithmFamily::Rsa)
            .unwrap();
        match material {
            KeyMaterial::Pem(bytes) => {
                assert!(bytes.starts_with(b"-----BEGIN PUBLIC KEY-----"));
            }
            other => panic!("expected PEM material, got {:?}", other),
        }
    }

    #[test]
    fn test_no_key_source() {
        let site = Site {
            algorithm: "HS256".to_string(),
            encoding: "plain".to_string(),
            ..Default::default()
        };
        let err = KeyLoader::new(".").load(&site, AlgorithmFamily::Hmac).unwrap_err();
        assert!(matches!(err, KeyLoadError::NoKeySource));
    }
}
