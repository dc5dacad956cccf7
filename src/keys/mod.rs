//! Site key loading and algorithm binding.
//!
//! A site declares an algorithm name, a key source (inline `key` or `path`)
//! and an encoding. [`KeyLoader`] turns the source into bytes and
//! [`SiteAlgorithm`] binds those bytes to a verifier.

pub mod algorithm;
pub mod material;

pub use algorithm::{AlgorithmError, AlgorithmFamily, SiteAlgorithm, parse_algorithm};
pub use material::{KeyEncoding, KeyLoadError, KeyLoader, KeyMaterial};
