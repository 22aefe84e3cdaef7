mod context;
mod drift;
mod fragment;
mod generate;
mod output;
pub mod ui;
mod validate;

pub use context::{Context, ContextArgs};
pub use drift::{diff_policy, DiffArgs};
pub use fragment::{generate_fragment, generate_import, FragmentArgs, ImportArgs, SigningArgs};
pub use generate::{generate_policy, GenerateArgs};
pub use output::ReportFormat;
pub use validate::validate_sidecar;

/// Result of a check command; findings exit with status 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    Findings,
}
