//! Local implementations of the core's external services: a layer map file, a
//! fragment store index, and command-line signing / registry tools.

use ccepolicy_core::external::{
    DiscoveredFragment, FragmentDiscovery, FragmentRegistry, ImageIntrospection, Signer,
    SigningRequest,
};
use ccepolicy_core::{FragmentImport, PolicyError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Image reference -> layer hashes, read from a JSON object file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct LayerMap {
    images: BTreeMap<String, Vec<String>>,
}

impl LayerMap {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl ImageIntrospection for LayerMap {
    fn resolve_layers(&self, image: &str) -> Result<Vec<String>> {
        self.images
            .get(image)
            .cloned()
            .ok_or_else(|| PolicyError::ImageResolution(format!("{image} is not in the layer map")))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StoredFragment {
    feed: String,
    path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StoreIndex {
    #[serde(default)]
    image_attached: BTreeMap<String, Vec<StoredFragment>>,
    #[serde(default)]
    standalone: BTreeMap<String, PathBuf>,
}

/// Fragments kept on disk, described by an index file. Relative paths resolve
/// against the index file's directory.
#[derive(Debug, Clone)]
pub struct LocalFragmentStore {
    root: PathBuf,
    index: StoreIndex,
}

impl LocalFragmentStore {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let index: StoreIndex = serde_json::from_str(&text)?;
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self { root, index })
    }

    fn read(&self, path: &Path) -> Result<String> {
        Ok(std::fs::read_to_string(self.root.join(path))?)
    }
}

impl FragmentDiscovery for LocalFragmentStore {
    fn pull_image_attached_fragments(&self, image: &str) -> Result<Vec<DiscoveredFragment>> {
        let Some(stored) = self.index.image_attached.get(image) else {
            return Ok(Vec::new());
        };
        stored
            .iter()
            .map(|fragment| {
                Ok(DiscoveredFragment {
                    text: self.read(&fragment.path)?,
                    feed: fragment.feed.clone(),
                })
            })
            .collect()
    }

    fn pull_standalone_fragments(
        &self,
        imports: &[FragmentImport],
    ) -> Result<Vec<DiscoveredFragment>> {
        let mut found = Vec::new();
        for import in imports {
            match self.index.standalone.get(&import.feed) {
                Some(path) => found.push(DiscoveredFragment {
                    text: self.read(path)?,
                    feed: import.feed.clone(),
                }),
                None => tracing::debug!(feed = %import.feed, "no standalone fragment stored"),
            }
        }
        Ok(found)
    }
}

fn run(mut command: Command) -> Result<String> {
    let program = command.get_program().to_string_lossy().into_owned();
    let output = command
        .output()
        .map_err(|e| {
            PolicyError::UnresolvableReference(format!("failed to run {program}: {e}"))
        })?;
    if !output.status.success() {
        return Err(PolicyError::UnresolvableReference(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Signs fragments by running an external COSE signing tool.
#[derive(Debug, Clone)]
pub struct CommandSigner {
    tool: PathBuf,
}

impl CommandSigner {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }
}

impl Signer for CommandSigner {
    fn sign(&self, request: &SigningRequest<'_>) -> Result<PathBuf> {
        let out = request.fragment_path.with_extension("rego.cose");
        let mut command = Command::new(&self.tool);
        command
            .arg("create")
            .arg("-payload")
            .arg(request.fragment_path)
            .arg("-key")
            .arg(request.key)
            .arg("-chain")
            .arg(request.cert_chain)
            .args(["-algo", request.algorithm])
            .args(["-feed", request.feed])
            .args(["-issuer", request.issuer])
            .args(["-content-type", "application/unknown+rego"])
            .arg("-salt")
            .arg("zero")
            .arg("-out")
            .arg(&out);
        run(command)?;
        Ok(out)
    }

    fn create_issuer(&self, cert_chain: &Path) -> Result<String> {
        let mut command = Command::new(&self.tool);
        command.arg("did:x509").arg("-chain").arg(cert_chain).args(["-policy", "CN"]);
        let issuer = run(command)?;
        if issuer.is_empty() {
            return Err(PolicyError::UnresolvableReference(
                "signing tool returned an empty issuer".to_string(),
            ));
        }
        Ok(issuer)
    }
}

/// Pushes signed fragments with the `oras` CLI.
#[derive(Debug, Clone)]
pub struct OrasRegistry {
    oras: PathBuf,
}

impl OrasRegistry {
    pub fn new(oras: impl Into<PathBuf>) -> Self {
        Self { oras: oras.into() }
    }
}

impl FragmentRegistry for OrasRegistry {
    fn push_fragment(&self, feed: &str, signed_fragment: &Path) -> Result<()> {
        let dir = signed_fragment.parent().unwrap_or_else(|| Path::new("."));
        let file = signed_fragment
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PolicyError::UnresolvableReference(
                    "signed fragment path has no file name".to_string(),
                )
            })?;
        let mut command = Command::new(&self.oras);
        command
            .current_dir(dir)
            .arg("push")
            .arg(feed)
            .args(["--artifact-type", "application/x-ms-ccepolicy-frag"])
            .arg(format!("{file}:application/cose-x509+rego"));
        run(command).map(|_| ())
    }
}
