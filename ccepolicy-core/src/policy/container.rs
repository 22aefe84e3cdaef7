//! 单个容器的策略记录。

use super::env_rules::{merge_extra_rules, parse_env_rules, EnvironmentRule};
use super::mounts::{build_mounts, ContainerRole, Mount, MountSpec};
use crate::config::{
    injected_customer_env_rules, CompileOptions, DEBUG_MODE_EXEC_COMMAND, VIRTUAL_NODE_ENV_RULES,
    VIRTUAL_NODE_ENV_RULES_WORKLOAD_IDENTITY,
};
use crate::error::{PolicyError, Result};
use crate::normalize::NormalizedMap;
use crate::sidecar::image_base;
use serde::Serialize;
use serde_json::{json, Value};
use std::cell::OnceCell;

const DEFAULT_WORKING_DIR: &str = "/";

/// 允许在容器内执行的进程（存活探针等）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecProcess {
    pub command: Vec<String>,
    pub signals: Vec<i64>,
    pub allow_stdio_access: bool,
}

/// 构造时根据角色选定的容器种类，替代事后改写类型。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerKind {
    /// 不注入额外规则
    Plain,
    /// 用户容器，携带待合并的注入规则
    User { extra_env_rules: Vec<EnvironmentRule> },
}

impl ContainerKind {
    fn for_role(role: &ContainerRole, is_sidecar: bool) -> Self {
        if is_sidecar {
            return ContainerKind::Plain;
        }
        let defs: Vec<_> = match role {
            ContainerRole::Plain => return ContainerKind::Plain,
            ContainerRole::User => injected_customer_env_rules().collect(),
            ContainerRole::VirtualNode {
                workload_identity, ..
            } => {
                let mut defs: Vec<_> = VIRTUAL_NODE_ENV_RULES.iter().collect();
                if *workload_identity {
                    defs.extend(VIRTUAL_NODE_ENV_RULES_WORKLOAD_IDENTITY);
                }
                defs
            }
        };
        ContainerKind::User {
            extra_env_rules: defs.into_iter().map(EnvironmentRule::from_def).collect(),
        }
    }
}

/// 一个容器镜像的完整策略记录。
///
/// `to_policy_json` 的结果会被缓存；通过 setter 修改 command / working_dir / layers
/// 时缓存失效。
#[derive(Debug, Clone)]
pub struct ContainerPolicy {
    id: String,
    image: String,
    command: Vec<String>,
    working_dir: String,
    env_rules: Vec<EnvironmentRule>,
    mounts: Vec<Mount>,
    allow_elevated: bool,
    allow_stdio_access: bool,
    exec_processes: Vec<ExecProcess>,
    signals: Vec<i64>,
    layers: Vec<String>,
    kind: ContainerKind,
    cached: OnceCell<Value>,
}

impl ContainerPolicy {
    /// 从原始容器描述构建。任何字段错误都会中止构建。
    ///
    /// 缺省的 `command` 视为空列表而不是错误；存在但不是字符串列表时仍报 `MalformedInput`。
    pub fn from_spec(raw: &Value, role: &ContainerRole, options: &CompileOptions) -> Result<Self> {
        let map = NormalizedMap::from_value(raw, "containers")?;

        let image = match map.get_any(&["containerImage", "image"]) {
            Some(Value::String(image)) if !image.is_empty() => image.clone(),
            Some(Value::String(_)) | None => {
                return Err(PolicyError::malformed(
                    "containers][containerImage",
                    "is empty or can not be found",
                ))
            }
            Some(_) => {
                return Err(PolicyError::malformed(
                    "containers][containerImage",
                    "must be a string",
                ))
            }
        };
        let is_sidecar = options.sidecars.is_sidecar(&image);

        let id = map
            .get_str("id", "containers][id")?
            .map(str::to_string)
            .unwrap_or_else(|| image.clone());

        let env_field = "containers][environmentVariables";
        let raw_env = map
            .get_array("environmentVariables", env_field)?
            .ok_or_else(|| PolicyError::malformed(env_field, "is null or can not be found"))?;
        let env_rules = parse_env_rules(raw_env, env_field)?;

        let command = map
            .get_string_list("command", "containers][command")
            .map_err(|_| PolicyError::malformed("containers][command", "must be list of Strings"))?
            .unwrap_or_default();

        let working_dir = match map.get_str("workingDir", "containers][workingDir")? {
            Some(dir) if !dir.is_empty() => {
                if !dir.starts_with('/') {
                    return Err(PolicyError::malformed(
                        "containers][workingDir",
                        format!("with value: {dir} is not absolute path"),
                    ));
                }
                dir.to_string()
            }
            _ => DEFAULT_WORKING_DIR.to_string(),
        };

        let declared_mounts = map
            .get_array("mounts", "containers][mounts")?
            .map(|items| {
                items
                    .iter()
                    .map(|m| MountSpec::from_raw(m, "containers][mounts"))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();
        let mounts = build_mounts(&declared_mounts, role, is_sidecar)?;

        let allow_elevated = map
            .get_bool("allowElevated", "containers][allowElevated")?
            .unwrap_or(true);

        let default_exec_stdio = is_sidecar || options.debug_mode;
        let mut exec_processes = match map.get_array("execProcesses", "containers][execProcesses")? {
            Some(items) => items
                .iter()
                .map(|item| parse_exec_process(item, default_exec_stdio))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let signals = map
            .get_int_list("signals", "containers][signals")?
            .unwrap_or_default();

        let allow_stdio_access = map
            .get_bool("allowStdioAccess", "containers][allowStdioAccess")?
            .unwrap_or(true);

        let kind = ContainerKind::for_role(role, is_sidecar);
        if options.debug_mode && matches!(kind, ContainerKind::User { .. }) {
            exec_processes.push(ExecProcess {
                command: DEBUG_MODE_EXEC_COMMAND.iter().map(|c| c.to_string()).collect(),
                signals: Vec::new(),
                allow_stdio_access: true,
            });
        }

        Ok(Self {
            id,
            image,
            command,
            working_dir,
            env_rules,
            mounts,
            allow_elevated,
            allow_stdio_access,
            exec_processes,
            signals,
            layers: Vec::new(),
            kind,
            cached: OnceCell::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// 镜像基名（不含 tag）。
    pub fn base(&self) -> &str {
        image_base(&self.image)
    }

    pub fn kind(&self) -> &ContainerKind {
        &self.kind
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn set_command(&mut self, command: Vec<String>) {
        self.command = command;
        self.cached.take();
    }

    pub fn working_dir(&self) -> &str {
        &self.working_dir
    }

    pub fn set_working_dir(&mut self, working_dir: impl Into<String>) {
        self.working_dir = working_dir.into();
        self.cached.take();
    }

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    pub fn set_layers(&mut self, layers: Vec<String>) {
        self.layers = layers;
        self.cached.take();
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn allow_elevated(&self) -> bool {
        self.allow_elevated
    }

    pub fn exec_processes(&self) -> &[ExecProcess] {
        &self.exec_processes
    }

    /// 声明的规则与注入规则合并后的有效规则集。
    pub fn effective_env_rules(&self) -> Vec<EnvironmentRule> {
        match &self.kind {
            ContainerKind::Plain => self.env_rules.clone(),
            ContainerKind::User { extra_env_rules } => {
                merge_extra_rules(&self.env_rules, extra_env_rules)
            }
        }
    }

    /// 策略记录；`omit_id` 为真时去掉 `id` 字段。
    pub fn to_policy_json(&self, omit_id: bool) -> Value {
        let record = self.cached.get_or_init(|| self.build_policy_json());
        if !omit_id {
            return record.clone();
        }
        let mut record = record.clone();
        if let Value::Object(object) = &mut record {
            object.remove("id");
        }
        record
    }

    fn build_policy_json(&self) -> Value {
        let mut record = json!({
            "id": self.id,
            "layers": self.layers,
            "command": self.command,
            "env_rules": self.effective_env_rules(),
            "working_dir": self.working_dir,
            "allow_elevated": self.allow_elevated,
            "exec_processes": self.exec_processes,
            "signals": self.signals,
            "allow_stdio_access": self.allow_stdio_access,
        });
        if !self.mounts.is_empty() {
            record["mounts"] = json!(self.mounts);
        }
        record
    }
}

fn parse_exec_process(raw: &Value, default_stdio: bool) -> Result<ExecProcess> {
    let field = "containers][execProcesses";
    let map = NormalizedMap::from_value(raw, field)?;
    let command = map
        .get_string_list("command", &format!("{field}][command"))?
        .ok_or_else(|| {
            PolicyError::malformed(format!("{field}][command"), "can only be a list of strings")
        })?;
    let signals = map
        .get_int_list("signals", &format!("{field}][signals"))?
        .unwrap_or_default();
    let allow_stdio_access = map
        .get_bool("allowStdioAccess", &format!("{field}][allowStdioAccess"))?
        .unwrap_or(default_stdio);
    Ok(ExecProcess {
        command,
        signals,
        allow_stdio_access,
    })
}
