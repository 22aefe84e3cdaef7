use super::context::Context;
use super::output::emit;
use super::ui;
use ccepolicy_core::{inject_policy, OutputFormat, PolicyInput};
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

pub struct GenerateArgs<'a> {
    pub input: &'a Path,
    pub format: OutputFormat,
    pub omit_id: bool,
    pub infrastructure_svn: Option<u64>,
    pub save_to_file: Option<&'a Path>,
    /// Template to write the policy into, with the container group position.
    pub inject: Option<(&'a Path, usize)>,
}

/// Compile a container group policy and print, save or inject it.
pub fn generate_policy(ctx: &Context, args: GenerateArgs<'_>) -> anyhow::Result<()> {
    if args.inject.is_some() && args.format != OutputFormat::Default {
        anyhow::bail!("raw output can not be injected into a template");
    }
    if ctx.options.debug_mode {
        warn!("debug mode is on, the policy allows shell access and stdio for every container");
    }

    let input = PolicyInput::from_file(args.input)?;
    let compilation = ctx.compiler(args.infrastructure_svn).compile(&input)?;
    let policy = compilation.document.serialize(args.format, args.omit_id)?;

    match args.inject {
        Some((path, group)) => {
            let template: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            let updated = inject_policy(&template, group, &policy)?;
            std::fs::write(path, serde_json::to_string_pretty(&updated)?)?;
            info!(template = %path.display(), group, "policy injected");
            if let Some(resolution) = &compilation.resolution {
                resolution.decisions.iter().for_each(ui::print_decision);
            }
            ui::print_success(&format!("policy written into {}", path.display()));
        }
        None => {
            emit(&policy, args.save_to_file)?;
            if let Some(path) = args.save_to_file {
                info!(path = %path.display(), "policy saved");
            }
        }
    }
    Ok(())
}
