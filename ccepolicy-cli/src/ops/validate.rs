use super::context::Context;
use super::output::{print_json, ReportFormat};
use super::{ui, Outcome};
use ccepolicy_core::{validate_sidecars, PolicyInput, SidecarReport};
use std::path::Path;

/// Check every baseline sidecar in the input against its baseline policy.
pub fn validate_sidecar(
    ctx: &Context,
    input: &Path,
    pretty: bool,
    format: ReportFormat,
) -> anyhow::Result<Outcome> {
    let input = PolicyInput::from_file(input)?;
    let document = ctx.compiler(None).compile_unresolved(&input)?;
    let report = validate_sidecars(&document, &ctx.options.sidecars)?;

    match format {
        ReportFormat::Json => print_json(&report, pretty)?,
        ReportFormat::Table => print_report(&report),
    }
    Ok(if report.is_valid {
        Outcome::Clean
    } else {
        Outcome::Findings
    })
}

fn print_report(report: &SidecarReport) {
    ui::print_header("Sidecar Validation");
    if report.is_valid {
        ui::print_success("all sidecars match their baseline policy");
        return;
    }
    ui::print_violations(&report.violations);
    println!();
    ui::print_hint("sidecar environment rules must match the baseline exactly or by regex");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::context::ContextArgs;

    fn context(sidecars: &Path) -> Context {
        Context::load(ContextArgs {
            debug_mode: false,
            sidecars: Some(sidecars),
            layers: None,
            fragment_store: None,
            sign_tool: Path::new("sign1util"),
            oras: Path::new("oras"),
        })
        .unwrap()
    }

    fn run(env: &str) -> Outcome {
        let dir = tempfile::tempdir().unwrap();
        let sidecars = dir.path().join("sidecars.json");
        std::fs::write(
            &sidecars,
            r#"{"example.com/sidecar": {"env_rules": [
                {"pattern": "PATH=/usr/bin", "strategy": "string", "required": true}
            ]}}"#,
        )
        .unwrap();
        let input = dir.path().join("input.json");
        std::fs::write(
            &input,
            format!(
                r#"{{"containers": [{{"name": "side", "properties": {{
                    "image": "example.com/sidecar:2", "environmentVariables": {env}
                }}}}]}}"#
            ),
        )
        .unwrap();
        validate_sidecar(&context(&sidecars), &input, false, ReportFormat::Json).unwrap()
    }

    #[test]
    fn matching_sidecar_is_clean() {
        assert_eq!(run(r#"[{"name": "PATH", "value": "/usr/bin"}]"#), Outcome::Clean);
    }

    #[test]
    fn drifted_sidecar_has_findings() {
        assert_eq!(run(r#"[{"name": "PATH", "value": "/tmp"}]"#), Outcome::Findings);
        assert_eq!(run("[]"), Outcome::Findings);
    }
}
