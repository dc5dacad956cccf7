//! Request authentication.
//!
//! Turns the `Authorization` header, method and origin of a request into an
//! [`AuthResult`]. Three ways in:
//!
//! - **Static token**: a pre-shared bearer value from the settings file
//! - **JWT**: signed by the key of the site named in its issuer claim
//! - **Anonymous**: GET/HEAD without a header, when the site allows it
//!
//! ## Usage
//!
//! ```ignore
//! let extractor = AuthExtractor::new(shared_registry);
//! let result = extractor.authenticate(&AuthRequest {
//!     authorization: headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
//!     method: &method,
//!     origin: origin.as_ref(),
//! });
//! ```

mod context;
mod extractor;
mod origin;

pub use context::{ANONYMOUS_ROLE, AuthMethod, AuthResult, Identity, PLATFORM_ROLE, RejectReason};
pub use extractor::{AuthExtractor, AuthRequest, authenticate, parse_bearer};
pub use origin::RequestOrigin;
