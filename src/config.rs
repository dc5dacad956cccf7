//! Settings document model and parser.
//!
//! The settings file is YAML. Only hard failures (unreadable file, malformed
//! document, fields outside the schema, wrong `version`) are reported here;
//! per-site problems are left for the registry build so one bad site does not
//! take the others down with it.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::token::ClaimProfile;

/// The only settings schema version this build understands.
pub const SUPPORTED_VERSION: i64 = 1;

/// User assigned to static tokens that do not name one.
pub const DEFAULT_TOKEN_USER: &str = "islandoraAdmin";

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "SYN_SETTINGS";

/// File name looked up when no explicit settings path is given.
pub const SETTINGS_FILE_NAME: &str = "syn-settings.yml";

/// One tenant site as declared in the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Site {
    /// Issuer URL this site's tokens carry. Absent only for the default site.
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub url: Option<String>,
    /// Signing algorithm name, e.g. "HS256" or "RS512".
    #[serde(default)]
    pub algorithm: String,
    /// Inline secret or PEM text.
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub key: Option<String>,
    /// Location of a key file.
    #[serde(default)]
    pub path: Option<String>,
    /// Key encoding: "plain", "base64" or "PEM".
    #[serde(default)]
    pub encoding: String,
    #[serde(default, rename = "default", deserialize_with = "lenient_bool")]
    pub is_default: bool,
    #[serde(default, rename = "anonymous", deserialize_with = "lenient_bool")]
    pub allow_anonymous_get: bool,
}

impl Site {
    /// Whether an inline key was given.
    pub fn key_defined(&self) -> bool {
        self.key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Whether a key file path was given.
    pub fn path_defined(&self) -> bool {
        self.path.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// A short name for log lines.
    pub fn label(&self) -> &str {
        match self.url.as_deref() {
            Some(url) if !url.is_empty() => url,
            _ if self.is_default => "default",
            _ => "<no url>",
        }
    }
}

/// A pre-shared bearer credential that bypasses JWT verification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawStaticToken")]
pub struct StaticToken {
    /// The literal bearer value, whitespace trimmed. May be empty.
    pub value: String,
    pub user: String,
    pub roles: Vec<String>,
}

impl StaticToken {
    pub fn new(value: &str, user: Option<&str>, roles: &str) -> Self {
        Self {
            value: value.trim().to_string(),
            user: user.unwrap_or(DEFAULT_TOKEN_USER).to_string(),
            roles: parse_roles(roles),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStaticToken {
    #[serde(default, alias = "token", deserialize_with = "lenient_opt_string")]
    value: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    user: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    roles: Option<String>,
}

impl From<RawStaticToken> for StaticToken {
    fn from(raw: RawStaticToken) -> Self {
        StaticToken::new(
            raw.value.as_deref().unwrap_or_default(),
            raw.user.as_deref(),
            raw.roles.as_deref().unwrap_or_default(),
        )
    }
}

/// Split a comma separated role declaration.
pub fn parse_roles(roles: &str) -> Vec<String> {
    roles
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    #[serde(default)]
    version: Option<i64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    disabled: bool,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    header: Option<String>,
    #[serde(default)]
    claims: Option<Vec<ClaimProfile>>,
    #[serde(default, deserialize_with = "one_or_many")]
    site: Vec<Site>,
    #[serde(default, deserialize_with = "one_or_many")]
    token: Vec<StaticToken>,
}

/// Parsed settings document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub version: i64,
    /// Global kill-switch: when set, requests are passed through unauthenticated.
    pub disabled: bool,
    /// Outbound header to fill with the comma-joined role list.
    pub role_header: Option<String>,
    /// Accepted JWT claim-naming profiles, in preference order.
    pub claim_profiles: Vec<ClaimProfile>,
    pub sites: Vec<Site>,
    pub tokens: Vec<StaticToken>,
}

impl Settings {
    /// Parse a settings document.
    pub fn parse(text: &str) -> Result<Self, SettingsError> {
        let raw: RawSettings = serde_yaml::from_str(text).map_err(SettingsError::Parse)?;

        match raw.version {
            Some(SUPPORTED_VERSION) => {}
            other => return Err(SettingsError::UnsupportedVersion(other)),
        }

        let claim_profiles = match raw.claims {
            Some(profiles) if !profiles.is_empty() => profiles,
            _ => ClaimProfile::ALL.to_vec(),
        };

        Ok(Self {
            version: SUPPORTED_VERSION,
            disabled: raw.disabled,
            role_header: raw.header.filter(|h| !h.trim().is_empty()),
            claim_profiles,
            sites: raw.site,
            tokens: raw.token,
        })
    }

    /// Read and parse a settings file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }
}

/// Fatal settings errors. Any of these aborts the whole load.
#[derive(Debug)]
pub enum SettingsError {
    /// The settings file could not be read.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// No settings file was given and none was found in the usual places.
    NotFound,
    /// The document is not valid YAML or does not match the schema.
    Parse(serde_yaml::Error),
    /// `version` is missing or not the supported one.
    UnsupportedVersion(Option<i64>),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read settings file {}: {}", path.display(), source)
            }
            Self::NotFound => write!(
                f,
                "could not find {} (set {} or pass --settings)",
                SETTINGS_FILE_NAME, SETTINGS_ENV
            ),
            Self::Parse(e) => write!(f, "malformed settings document: {}", e),
            Self::UnsupportedVersion(Some(v)) => write!(
                f,
                "unsupported settings version {} (expected {})",
                v, SUPPORTED_VERSION
            ),
            Self::UnsupportedVersion(None) => write!(f, "settings version is missing"),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(e) => Some(e),
            Self::NotFound | Self::UnsupportedVersion(_) => None,
        }
    }
}

/// Locate the settings file.
///
/// Order: explicit path, `SYN_SETTINGS`, `$XDG_CONFIG_HOME/syn/syn-settings.yml`,
/// `./syn-settings.yml`.
pub fn resolve_settings_path(explicit: Option<&Path>) -> Result<PathBuf, SettingsError> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }

    if let Ok(p) = env::var(SETTINGS_ENV) {
        return Ok(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("syn").join(SETTINGS_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let candidate = PathBuf::from(SETTINGS_FILE_NAME);
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(SettingsError::NotFound)
}

/// Directory relative key paths resolve against when no key root is configured.
pub fn settings_dir(settings_path: &Path) -> PathBuf {
    match settings_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Accept a YAML bool, or a string where only "true" (any case) is true.
/// Any other value reads as false.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::Bool(b) => b,
        serde_yaml::Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// Accept any YAML scalar as a string, so `value: 1337` reads as "1337".
fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::Null => Ok(None),
        serde_yaml::Value::String(s) => Ok(Some(s)),
        serde_yaml::Value::Number(n) => Ok(Some(n.to_string())),
        serde_yaml::Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(D::Error::custom(format!(
            "expected a scalar value, found {:?}",
            other
        ))),
    }
}

/// Accept either a single mapping or a sequence of them.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::Null => Ok(Vec::new()),
        seq @ serde_yaml::Value::Sequence(_) => {
            serde_yaml::from_value(seq).map_err(D::Error::custom)
        }
        single => serde_yaml::from_value(single)
            .map(|item| vec![item])
            .map_err(D::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(doc: &str) -> Settings {
        Settings::parse(doc).unwrap()
    }

    fn disabled_value(raw: &str) -> bool {
        parse(&format!(
            "version: 1\ndisabled: {}\nsite:\n  url: http://test.com\n  algorithm: RS384\n  path: test/path.key\n  encoding: PEM\n",
            raw
        ))
        .disabled
    }

    #[test]
    fn test_parse_single_site_mapping() {
        let settings = parse(
            "version: 1\nsite:\n  url: http://test.com\n  algorithm: HS256\n  encoding: plain\n  anonymous: true\n  key: secret\n",
        );

        assert_eq!(settings.sites.len(), 1);
        let site = &settings.sites[0];
        assert_eq!(site.url.as_deref(), Some("http://test.com"));
        assert_eq!(site.algorithm, "HS256");
        assert_eq!(site.key.as_deref(), Some("secret"));
        assert!(site.allow_anonymous_get);
        assert!(!site.is_default);
        assert!(!settings.disabled);
        assert!(settings.tokens.is_empty());
    }

    #[test]
    fn test_parse_site_sequence_keeps_order() {
        let settings = parse(
            r#"
version: 1
site:
  - url: http://one.com
    algorithm: HS256
    encoding: plain
    key: one
  - algorithm: RS256
    encoding: PEM
    path: keys/public.pem
    default: true
"#,
        );

        assert_eq!(settings.sites.len(), 2);
        assert_eq!(settings.sites[0].label(), "http://one.com");
        assert_eq!(settings.sites[1].label(), "default");
        assert!(settings.sites[1].path_defined());
        assert!(!settings.sites[1].key_defined());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let err = Settings::parse("version: 2\ntoken:\n  value: c00lpazzward\n").unwrap_err();
        assert!(matches!(err, SettingsError::UnsupportedVersion(Some(2))));
    }

    #[test]
    fn test_version_missing_rejected() {
        let err = Settings::parse("token:\n  value: c00lpazzward\n").unwrap_err();
        assert!(matches!(err, SettingsError::UnsupportedVersion(None)));
    }

    #[test]
    fn test_version_not_an_integer_is_parse_error() {
        let err = Settings::parse(
            "version: bad\nsite:\n  url: http://test.com\n  algorithm: HS256\n  key: secret\n",
        )
        .unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let top = Settings::parse("version: 1\nsites: []\n").unwrap_err();
        assert!(matches!(top, SettingsError::Parse(_)));

        let in_site = Settings::parse(
            "version: 1\nsite:\n  url: http://test.com\n  algorithm: HS256\n  colour: blue\n",
        )
        .unwrap_err();
        assert!(matches!(in_site, SettingsError::Parse(_)));
        assert!(in_site.to_string().contains("colour"));
    }

    #[test]
    fn test_disabled_is_case_insensitive() {
        assert!(disabled_value("TRUE"));
        assert!(disabled_value("true"));
        assert!(disabled_value("True"));
        assert!(disabled_value("\"TrUe\""));
        assert!(!disabled_value("FALSE"));
        assert!(!disabled_value("False"));
        assert!(!disabled_value("other"));
        assert!(!disabled_value("\"\""));
        assert!(!disabled_value("1"));
        assert!(!disabled_value("0"));
        assert!(!disabled_value("1.5"));
        assert!(!disabled_value("~"));
    }

    #[test]
    fn test_site_flags_are_lenient() {
        let settings = parse(
            "version: 1\nsite:\n  url: http://test.com\n  algorithm: HS256\n  key: secret\n  encoding: plain\n  anonymous: 0\n  default: 1\n",
        );
        let site = &settings.sites[0];
        assert!(!site.allow_anonymous_get);
        assert!(!site.is_default);

        let settings = parse(
            "version: 1\nsite:\n  url: http://test.com\n  algorithm: HS256\n  key: secret\n  encoding: plain\n  anonymous: \"TRUE\"\n",
        );
        assert!(settings.sites[0].allow_anonymous_get);
    }

    #[test]
    fn test_disabled_defaults_to_false() {
        let settings = parse("version: 1\n");
        assert!(!settings.disabled);
        assert!(settings.sites.is_empty());
    }

    #[test]
    fn test_token_defaults() {
        let settings = parse("version: 1\ntoken:\n  value: \"   c00lpazzward  \"\n");
        let token = &settings.tokens[0];
        assert_eq!(token.value, "c00lpazzward");
        assert_eq!(token.user, DEFAULT_TOKEN_USER);
        assert!(token.roles.is_empty());
    }

    #[test]
    fn test_token_numeric_value_and_alias() {
        let settings = parse("version: 1\ntoken:\n  - token: 1337\n    user: denis\n");
        assert_eq!(settings.tokens[0].value, "1337");
        assert_eq!(settings.tokens[0].user, "denis");
    }

    #[test]
    fn test_token_roles_split() {
        let settings = parse("version: 1\ntoken:\n  value: abc\n  roles: role1,role2, role3\n");
        assert_eq!(settings.tokens[0].roles, vec!["role1", "role2", "role3"]);
    }

    #[test]
    fn test_empty_token_value_is_parsed() {
        let settings = parse("version: 1\ntoken:\n  user: nobody\n");
        assert_eq!(settings.tokens.len(), 1);
        assert!(settings.tokens[0].value.is_empty());
    }

    #[test]
    fn test_parse_roles() {
        assert!(parse_roles("").is_empty());
        assert_eq!(parse_roles("test"), vec!["test"]);
        assert_eq!(parse_roles("this,is,a,test"), vec!["this", "is", "a", "test"]);
        assert_eq!(parse_roles("a,,b,"), vec!["a", "b"]);
    }

    #[test]
    fn test_role_header_and_claim_profiles() {
        let settings = parse("version: 1\nheader: X-Islandora-Roles\nclaims: [legacy]\n");
        assert_eq!(settings.role_header.as_deref(), Some("X-Islandora-Roles"));
        assert_eq!(settings.claim_profiles, vec![ClaimProfile::Legacy]);

        let defaults = parse("version: 1\n");
        assert_eq!(defaults.role_header, None);
        assert_eq!(defaults.claim_profiles, ClaimProfile::ALL.to_vec());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(&dir.path().join("nope.yml")).unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }

    #[test]
    fn test_resolve_explicit_path_and_settings_dir() {
        let path = Path::new("/etc/syn/syn-settings.yml");
        assert_eq!(resolve_settings_path(Some(path)).unwrap(), path);
        assert_eq!(settings_dir(path), Path::new("/etc/syn"));
        assert_eq!(settings_dir(Path::new("syn-settings.yml")), Path::new("."));
    }

    #[test]
    fn test_settings_error_display() {
        assert_eq!(
            SettingsError::UnsupportedVersion(Some(2)).to_string(),
            "unsupported settings version 2 (expected 1)"
        );
        assert_eq!(
            SettingsError::UnsupportedVersion(None).to_string(),
            "settings version is missing"
        );
    }
}
