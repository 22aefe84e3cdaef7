use super::FragmentImport;
use crate::config::infra_fragment;
use crate::error::{PolicyError, Result};
use crate::external::{FragmentRegistry, Signer, SigningRequest};
use crate::scanner::extract_svn;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Builds the import statement a policy needs to trust a freshly written fragment.
pub struct ImportGenerator<'a> {
    signer: &'a dyn Signer,
}

impl<'a> ImportGenerator<'a> {
    pub fn new(signer: &'a dyn Signer) -> Self {
        Self { signer }
    }

    /// `minimum_svn` defaults to the svn the fragment declares.
    pub fn generate(
        &self,
        fragment_text: &str,
        feed: &str,
        cert_chain: &Path,
        minimum_svn: Option<u64>,
    ) -> Result<FragmentImport> {
        let minimum_svn = match minimum_svn.or_else(|| extract_svn(fragment_text)) {
            Some(svn) => svn,
            None => {
                return Err(PolicyError::malformed(
                    "fragment",
                    "declares no svn and no minimum svn was given",
                ))
            }
        };
        let issuer = self.signer.create_issuer(cert_chain)?;
        Ok(FragmentImport {
            feed: feed.to_string(),
            issuer,
            minimum_svn,
            includes: infra_fragment::INCLUDES.iter().map(|s| s.to_string()).collect(),
        })
    }
}

/// Inputs for signing and optionally pushing one fragment file.
#[derive(Debug, Clone)]
pub struct PublishRequest<'a> {
    pub fragment_path: &'a Path,
    pub key: &'a Path,
    pub cert_chain: &'a Path,
    pub feed: &'a str,
    pub algorithm: &'a str,
    pub push: bool,
}

/// Signs a fragment and pushes it to the registry when asked.
pub struct FragmentPublisher<'a> {
    signer: &'a dyn Signer,
    registry: Option<&'a dyn FragmentRegistry>,
}

impl<'a> FragmentPublisher<'a> {
    pub fn new(signer: &'a dyn Signer) -> Self {
        Self {
            signer,
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: &'a dyn FragmentRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Returns the signed artifact path.
    #[instrument(skip_all, fields(feed = request.feed, push = request.push))]
    pub fn publish(&self, request: &PublishRequest<'_>) -> Result<PathBuf> {
        let issuer = self.signer.create_issuer(request.cert_chain)?;
        let signed = self.signer.sign(&SigningRequest {
            fragment_path: request.fragment_path,
            key: request.key,
            cert_chain: request.cert_chain,
            feed: request.feed,
            issuer: &issuer,
            algorithm: request.algorithm,
        })?;
        info!(path = %signed.display(), "fragment signed");

        if request.push {
            let registry = self.registry.ok_or_else(|| {
                PolicyError::UnresolvableReference(
                    "push requested but no registry is configured".to_string(),
                )
            })?;
            registry.push_fragment(request.feed, &signed)?;
            info!(feed = request.feed, "fragment pushed");
        }
        Ok(signed)
    }
}
