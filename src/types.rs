//! NewType wrappers for strong typing throughout the authenticator.
//!
//! These types keep a site's URL and an authenticated principal's name from
//! being swapped for one another (both are "just strings" on the wire).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// URL identifying a tenant site (e.g. "http://a.com").
    ///
    /// Matched verbatim against the issuer claim of incoming JWTs, and by
    /// origin against the host of unauthenticated requests.
    SiteUrl
);

newtype_string!(
    /// Name of an authenticated principal.
    ///
    /// Comes from the display-name claim of a JWT, the `user` of a static
    /// token, or is "anonymous" for unauthenticated safe-method access.
    Principal
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_newtype_borrow_lookup() {
        let mut map = HashMap::new();
        map.insert(SiteUrl::new("http://a.com"), 1);
        assert_eq!(map.get("http://a.com"), Some(&1));
    }

    #[test]
    fn test_newtype_serde_transparent() {
        let principal = Principal::new("bob");
        assert_eq!(serde_json::to_string(&principal).unwrap(), "\"bob\"");
        assert_eq!(principal.to_string(), "bob");
    }
}
