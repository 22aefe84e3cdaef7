//! Contracts for the services the compiler calls out to.
//!
//! Implementations live with the caller (the CLI ships file- and command-backed
//! ones). All calls are blocking; timeouts belong to the implementation.

use crate::error::Result;
use crate::fragments::FragmentImport;
use std::path::{Path, PathBuf};

/// Resolves an image reference to its layer content hashes.
pub trait ImageIntrospection {
    fn resolve_layers(&self, image: &str) -> Result<Vec<String>>;
}

/// A discovered fragment with the feed it was published on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFragment {
    pub text: String,
    pub feed: String,
}

pub trait FragmentDiscovery {
    fn pull_image_attached_fragments(&self, image: &str) -> Result<Vec<DiscoveredFragment>>;
    /// Fragments published on the imports' feeds but not attached to any image.
    fn pull_standalone_fragments(&self, imports: &[FragmentImport])
        -> Result<Vec<DiscoveredFragment>>;
}

pub trait FragmentRegistry {
    fn push_fragment(&self, feed: &str, signed_fragment: &Path) -> Result<()>;
}

/// Everything a signing service needs to produce a signed fragment.
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    pub fragment_path: &'a Path,
    pub key: &'a Path,
    pub cert_chain: &'a Path,
    pub feed: &'a str,
    pub issuer: &'a str,
    pub algorithm: &'a str,
}

pub trait Signer {
    /// Sign and return the path of the signed artifact.
    fn sign(&self, request: &SigningRequest<'_>) -> Result<PathBuf>;
    fn create_issuer(&self, cert_chain: &Path) -> Result<String>;
}
