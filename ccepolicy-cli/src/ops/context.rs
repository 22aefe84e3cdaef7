use crate::local::{CommandSigner, LayerMap, LocalFragmentStore, OrasRegistry};
use ccepolicy_core::{BaselineSidecars, CompileOptions, Compiler};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Settings shared by every command, resolved from the global flags.
pub struct Context {
    pub options: CompileOptions,
    layers: Option<LayerMap>,
    store: Option<LocalFragmentStore>,
    sign_tool: PathBuf,
    oras: PathBuf,
}

pub struct ContextArgs<'a> {
    pub debug_mode: bool,
    pub sidecars: Option<&'a Path>,
    pub layers: Option<&'a Path>,
    pub fragment_store: Option<&'a Path>,
    pub sign_tool: &'a Path,
    pub oras: &'a Path,
}

impl Context {
    pub fn load(args: ContextArgs<'_>) -> anyhow::Result<Self> {
        let sidecars = match args.sidecars {
            Some(path) => BaselineSidecars::from_file(path)?,
            None => BaselineSidecars::builtin(),
        };
        let layers = args.layers.map(LayerMap::from_file).transpose()?;
        let store = args
            .fragment_store
            .map(LocalFragmentStore::from_file)
            .transpose()?;
        debug!(
            sidecars = sidecars.len(),
            layers = layers.is_some(),
            fragment_store = store.is_some(),
            "context loaded"
        );
        Ok(Self {
            options: CompileOptions::default()
                .with_debug_mode(args.debug_mode)
                .with_sidecars(sidecars),
            layers,
            store,
            sign_tool: args.sign_tool.to_path_buf(),
            oras: args.oras.to_path_buf(),
        })
    }

    /// A compiler wired to whichever local collaborators were configured.
    pub fn compiler(&self, infrastructure_svn: Option<u64>) -> Compiler<'_> {
        let options = self.options.clone().with_infrastructure_svn(infrastructure_svn);
        let mut compiler = Compiler::new(options);
        if let Some(layers) = &self.layers {
            compiler = compiler.with_image_introspection(layers);
        }
        if let Some(store) = &self.store {
            compiler = compiler.with_fragment_discovery(store);
        }
        compiler
    }

    pub fn signer(&self) -> CommandSigner {
        CommandSigner::new(&self.sign_tool)
    }

    pub fn registry(&self) -> OrasRegistry {
        OrasRegistry::new(&self.oras)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args<'a>() -> ContextArgs<'a> {
        ContextArgs {
            debug_mode: true,
            sidecars: None,
            layers: None,
            fragment_store: None,
            sign_tool: Path::new("sign1util"),
            oras: Path::new("oras"),
        }
    }

    #[test]
    fn defaults_use_builtin_sidecars() {
        let ctx = Context::load(args()).unwrap();
        assert!(ctx.options.debug_mode);
        assert!(!ctx.options.sidecars.is_empty());
        assert_eq!(ctx.compiler(Some(4)).options().infrastructure_svn, Some(4));
    }

    #[test]
    fn missing_layer_map_fails_to_load() {
        let mut args = args();
        args.layers = Some(Path::new("/nonexistent/layers.json"));
        assert!(Context::load(args).is_err());
    }
}
