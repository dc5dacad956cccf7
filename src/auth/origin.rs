//! Effective request origin (scheme, host and port).

use std::fmt;
use url::Url;

/// Where a request was addressed, as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOrigin {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl RequestOrigin {
    /// Build from a scheme and a `Host` header value such as "a.com:8080".
    pub fn from_host(scheme: &str, host: &str) -> Option<Self> {
        let host = host.trim();
        if host.is_empty() || host.contains('/') {
            return None;
        }
        Self::parse(&format!("{}://{}", scheme.trim(), host))
    }

    /// Parse an absolute URL, keeping only its origin.
    pub fn parse(url: &str) -> Option<Self> {
        let url = Url::parse(url).ok()?;
        Self::from_url(&url)
    }

    pub fn from_url(url: &Url) -> Option<Self> {
        let host = url.host_str()?;
        Some(Self {
            scheme: url.scheme().to_string(),
            host: host.to_ascii_lowercase(),
            port: url.port_or_known_default(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, or the scheme's well-known one.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Whether `url` is this origin itself: same scheme, host and port, with
    /// no path beyond `/`. A site mounted under a path never matches.
    pub fn matches(&self, url: &Url) -> bool {
        matches!(url.path(), "" | "/")
            && url.query().is_none()
            && url.fragment().is_none()
            && url.scheme() == self.scheme
            && url
                .host_str()
                .is_some_and(|h| h.eq_ignore_ascii_case(&self.host))
            && url.port_or_known_default() == self.port
    }

    fn default_port(&self) -> Option<u16> {
        match self.scheme.as_str() {
            "http" | "ws" => Some(80),
            "https" | "wss" => Some(443),
            _ => None,
        }
    }
}

/// Renders `scheme://host[:port]`, leaving out the scheme's default port.
impl fmt::Display for RequestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        match self.port {
            Some(port) if Some(port) != self.default_port() => write!(f, ":{}", port),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_host_with_and_without_port() {
        let plain = RequestOrigin::from_host("http", "A.com").unwrap();
        assert_eq!(plain.host(), "a.com");
        assert_eq!(plain.port(), Some(80));
        assert_eq!(plain.to_string(), "http://a.com");

        let ported = RequestOrigin::from_host("https", "a.com:8443").unwrap();
        assert_eq!(ported.port(), Some(8443));
        assert_eq!(ported.to_string(), "https://a.com:8443");
    }

    #[test]
    fn test_from_host_rejects_garbage() {
        assert!(RequestOrigin::from_host("http", "").is_none());
        assert!(RequestOrigin::from_host("http", "a.com/path").is_none());
        assert!(RequestOrigin::from_host("http", "a.com:notaport").is_none());
    }

    #[test]
    fn test_matches_site_urls() {
        let origin = RequestOrigin::from_host("http", "test.com").unwrap();
        assert!(origin.matches(&Url::parse("http://test.com").unwrap()));
        assert!(origin.matches(&Url::parse("http://test.com/").unwrap()));
        assert!(origin.matches(&Url::parse("http://TEST.com:80/").unwrap()));
        assert!(!origin.matches(&Url::parse("https://test.com").unwrap()));
        assert!(!origin.matches(&Url::parse("http://test.com:8080").unwrap()));
        assert!(!origin.matches(&Url::parse("http://other.com").unwrap()));
    }

    #[test]
    fn test_site_with_path_does_not_match_origin() {
        let origin = RequestOrigin::from_host("http", "test.com").unwrap();
        assert!(!origin.matches(&Url::parse("http://test.com/site").unwrap()));
        assert!(!origin.matches(&Url::parse("http://test.com/site/").unwrap()));
        assert!(!origin.matches(&Url::parse("http://test.com/?q=1").unwrap()));
    }
}
