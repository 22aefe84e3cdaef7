//! Core library for compiling confidential-container security policies: container
//! policy model, policy documents, fragment resolution, and conformance checks.

mod canonical;
mod compile;
mod conformance;
mod diff;
mod error;
mod input;
mod normalize;
mod scanner;
mod sidecar;
mod template;

pub mod config;
pub mod external;
pub mod fragments;
pub mod policy;

pub use canonical::{canonicalize, decode_base64, encode_base64, render, to_compact, to_pretty};
pub use compile::{Compilation, Compiler};
pub use config::CompileOptions;
pub use conformance::{compare, compare_fragments, validate_sidecars, DriftReport, SidecarReport, Violations};
pub use diff::{readable_diff, structural_diff, Change, ChangeKind};
pub use error::{PolicyError, Result};
pub use fragments::{FragmentImport, FragmentPublisher, FragmentResolver, ImportGenerator, PublishRequest};
pub use input::{ContainerInput, PolicyInput};
pub use normalize::NormalizedMap;
pub use policy::{ContainerPolicy, ContainerRole, EnvironmentRule, OutputFormat, PolicyDocument};
pub use scanner::{extract_containers_and_fragments, extract_namespace, extract_svn};
pub use sidecar::{image_base, BaselineSidecar, BaselineSidecars};
pub use template::{extract_policies, inject_policy, ExistingPolicy};
