use super::context::Context;
use super::output::{print_json, ReportFormat};
use super::{ui, Outcome};
use ccepolicy_core::{compare, compare_fragments, extract_policies, DriftReport, PolicyInput};
use serde_json::{json, Value};
use std::path::Path;
use tracing::warn;

pub struct DiffArgs<'a> {
    pub input: &'a Path,
    /// Deployment template carrying the deployed policy.
    pub existing: &'a Path,
    pub group: usize,
    pub pretty: bool,
}

/// Compare the policy deployed in a template with a fresh compile of the input.
/// Container drift is a finding; fragment differences only warn.
pub fn diff_policy(ctx: &Context, args: DiffArgs<'_>, format: ReportFormat) -> anyhow::Result<Outcome> {
    let input = PolicyInput::from_file(args.input)?;
    let compiler = ctx.compiler(None);
    let compilation = compiler.compile(&input)?;
    let expected_imports = compiler.imports_for(&input);

    let template: Value = serde_json::from_str(&std::fs::read_to_string(args.existing)?)?;
    let policies = extract_policies(&template, &expected_imports)?;
    if policies.len() > 1 {
        warn!(groups = policies.len(), group = args.group, "template has several container groups");
    }
    let existing = policies.get(args.group).ok_or_else(|| {
        anyhow::anyhow!("template has no container group at position {}", args.group)
    })?;

    let regenerated = compilation.document.containers_json(false);
    let regenerated = regenerated.as_array().cloned().unwrap_or_default();
    let report = compare(&existing.containers, &regenerated);
    let fragment_diff = compare_fragments(&existing.fragments, &expected_imports)?;
    let fragments_equal = fragment_diff.as_object().is_some_and(|m| m.is_empty());
    if !fragments_equal {
        warn!("fragment imports differ from the expected list");
    }

    match format {
        ReportFormat::Json => print_json(
            &json!({
                "is_equal": report.is_equal,
                "diff": report.diff,
                "fragments": fragment_diff,
            }),
            args.pretty,
        )?,
        ReportFormat::Table => print_report(&report, &fragment_diff, fragments_equal)?,
    }
    Ok(if report.is_equal {
        Outcome::Clean
    } else {
        Outcome::Findings
    })
}

fn print_report(report: &DriftReport, fragment_diff: &Value, fragments_equal: bool) -> anyhow::Result<()> {
    ui::print_header("Policy Drift");
    if report.is_equal {
        ui::print_success("deployed containers match the regenerated policy");
    } else if let Some(containers) = report.diff.as_object() {
        for (id, changes) in containers {
            ui::print_section(id);
            println!("{}", serde_json::to_string_pretty(changes)?);
        }
    }
    if !fragments_equal {
        ui::print_section("fragments");
        ui::print_warning("fragment imports differ, this may be intended customization");
        println!("{}", serde_json::to_string_pretty(fragment_diff)?);
    }
    Ok(())
}
