use super::context::Context;
use super::output::{print_json, ReportFormat};
use super::ui;
use ccepolicy_core::{
    extract_namespace, FragmentImport, FragmentPublisher, ImportGenerator, PolicyInput,
    PublishRequest,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct SigningArgs<'a> {
    pub key: &'a Path,
    pub chain: &'a Path,
    pub feed: &'a str,
    pub algorithm: &'a str,
    pub push: bool,
}

pub struct FragmentArgs<'a> {
    pub input: &'a Path,
    pub namespace: &'a str,
    pub svn: u64,
    pub omit_id: bool,
    /// Defaults to `<namespace>.rego` in the working directory.
    pub output: Option<&'a Path>,
    pub signing: Option<SigningArgs<'a>>,
}

/// Write a fragment for the input's containers, then sign and push it when asked.
pub fn generate_fragment(
    ctx: &Context,
    args: FragmentArgs<'_>,
    format: ReportFormat,
) -> anyhow::Result<PathBuf> {
    let input = PolicyInput::from_file(args.input)?;
    let document = ctx.compiler(None).compile_fragment(&input)?;
    let rego = document.to_fragment_rego(args.namespace, args.svn, args.omit_id)?;

    let path = args
        .output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("{}.rego", args.namespace)));
    std::fs::write(&path, &rego)?;
    info!(path = %path.display(), namespace = args.namespace, svn = args.svn, "fragment written");

    let signed = match &args.signing {
        Some(signing) => {
            let signer = ctx.signer();
            let registry = ctx.registry();
            let publisher = FragmentPublisher::new(&signer).with_registry(&registry);
            Some(publisher.publish(&PublishRequest {
                fragment_path: &path,
                key: signing.key,
                cert_chain: signing.chain,
                feed: signing.feed,
                algorithm: signing.algorithm,
                push: signing.push,
            })?)
        }
        None => None,
    };

    match format {
        ReportFormat::Json => print_json(
            &serde_json::json!({
                "fragment": path,
                "signed": signed,
                "containers": document.containers().len(),
            }),
            true,
        )?,
        ReportFormat::Table => {
            ui::print_header("Fragment");
            ui::print_kv("Namespace", args.namespace);
            ui::print_kv("SVN", &args.svn.to_string());
            ui::print_kv("Containers", &document.containers().len().to_string());
            ui::print_kv("File", &path.display().to_string());
            if let Some(signed) = &signed {
                ui::print_kv("Signed", &signed.display().to_string());
            }
            if args.signing.as_ref().is_some_and(|s| s.push) {
                ui::print_success("fragment pushed");
            } else if signed.is_none() {
                ui::print_hint("pass --key, --chain and --feed to sign the fragment");
            }
        }
    }
    Ok(signed.unwrap_or(path))
}

pub struct ImportArgs<'a> {
    pub fragment: &'a Path,
    pub feed: &'a str,
    pub chain: &'a Path,
    pub minimum_svn: Option<u64>,
    /// Import list file to add the statement to; created when missing.
    pub fragments_json: Option<&'a Path>,
}

/// Produce the import statement for a fragment file.
pub fn generate_import(ctx: &Context, args: ImportArgs<'_>) -> anyhow::Result<FragmentImport> {
    let text = std::fs::read_to_string(args.fragment)?;
    if extract_namespace(&text).is_none() {
        warn!(path = %args.fragment.display(), "fragment declares no package");
    }
    let signer = ctx.signer();
    let import =
        ImportGenerator::new(&signer).generate(&text, args.feed, args.chain, args.minimum_svn)?;

    match args.fragments_json {
        Some(path) => {
            let mut imports = read_import_list(path)?;
            imports.retain(|existing| existing.feed != import.feed);
            imports.push(import.clone());
            std::fs::write(path, serde_json::to_string_pretty(&imports)?)?;
            ui::print_success(&format!("import for {} saved to {}", import.feed, path.display()));
        }
        None => print_json(&import, true)?,
    }
    Ok(import)
}

/// Accepts a bare list or an object with a `fragments` list.
fn read_import_list(path: &Path) -> anyhow::Result<Vec<FragmentImport>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let items = match &value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map
            .get("fragments")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => anyhow::bail!("{} does not hold a fragment list", path.display()),
    };
    Ok(ccepolicy_core::fragments::parse_imports(&items)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::context::ContextArgs;

    fn context() -> Context {
        Context::load(ContextArgs {
            debug_mode: false,
            sidecars: None,
            layers: None,
            fragment_store: None,
            sign_tool: Path::new("/nonexistent/sign-tool"),
            oras: Path::new("oras"),
        })
        .unwrap()
    }

    #[test]
    fn writes_unsigned_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.json");
        std::fs::write(
            &input,
            r#"{"containers": [{"name": "app", "properties": {"image": "app:1"}}]}"#,
        )
        .unwrap();
        let out = dir.path().join("app.rego");
        let path = generate_fragment(
            &context(),
            FragmentArgs {
                input: &input,
                namespace: "app",
                svn: 2,
                omit_id: false,
                output: Some(&out),
                signing: None,
            },
            ReportFormat::Json,
        )
        .unwrap();
        assert_eq!(path, out);
        let text = std::fs::read_to_string(out).unwrap();
        assert!(text.starts_with("package app"));
        assert!(text.contains("svn := \"2\""));
    }

    #[test]
    fn reserved_namespace_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.json");
        std::fs::write(&input, r#"{"containers": []}"#).unwrap();
        let result = generate_fragment(
            &context(),
            FragmentArgs {
                input: &input,
                namespace: "policy",
                svn: 1,
                omit_id: false,
                output: Some(&dir.path().join("policy.rego")),
                signing: None,
            },
            ReportFormat::Json,
        );
        assert!(result.is_err());
    }

    #[test]
    fn import_list_accepts_both_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.json");
        assert!(read_import_list(&list).unwrap().is_empty());

        std::fs::write(
            &list,
            r#"{"fragments": [{"feed": "f", "issuer": "i", "minimum_svn": "1", "includes": []}]}"#,
        )
        .unwrap();
        assert_eq!(read_import_list(&list).unwrap()[0].feed, "f");

        std::fs::write(&list, r#"[{"feed": "g", "issuer": "i", "minimum_svn": 2, "includes": []}]"#)
            .unwrap();
        assert_eq!(read_import_list(&list).unwrap()[0].minimum_svn, 2);
    }
}
