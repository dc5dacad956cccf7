// Settings and key material
pub mod config;
pub mod keys;
pub mod types;

// Request-time authentication
pub mod auth;
pub mod registry;
pub mod token;

pub mod server;

#[cfg(test)]
mod testutil;

// Re-export key types
pub use auth::{AuthExtractor, AuthRequest, AuthResult, Identity, RejectReason, RequestOrigin};
pub use config::{Settings, SettingsError, Site, StaticToken};
pub use keys::{KeyLoader, SiteAlgorithm};
pub use registry::{SharedRegistry, SiteRegistry};
pub use token::{ClaimProfile, DecodedToken, TokenError};
