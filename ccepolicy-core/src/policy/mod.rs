//! 策略模型：环境变量规则、挂载、单容器记录、策略文档。

mod container;
mod document;
mod env_rules;
mod mounts;

pub use container::{ContainerKind, ContainerPolicy, ExecProcess};
pub use document::{pause_container, OutputFormat, PolicyDocument};
pub use env_rules::{merge_extra_rules, parse_env_rules, EnvStrategy, EnvironmentRule, RuleMatcher};
pub use mounts::{build_mounts, ContainerRole, Mount, MountSpec, MountType};
