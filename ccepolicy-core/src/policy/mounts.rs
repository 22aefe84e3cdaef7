//! 挂载策略：用户声明的挂载 + 按容器角色注入的默认挂载。

use crate::config::{
    MountDef, DEFAULT_MOUNTS_PRIVILEGED_VIRTUAL_NODE, DEFAULT_MOUNTS_USER,
    DEFAULT_MOUNTS_USER_VIRTUAL_NODE, DEFAULT_MOUNTS_VIRTUAL_NODE,
    DEFAULT_MOUNTS_WORKLOAD_IDENTITY_VIRTUAL_NODE, DEFAULT_MOUNT_OPTIONS, MOUNT_RW_OPTION_INDEX,
    MOUNT_SOURCE_TABLE,
};
use crate::error::{PolicyError, Result};
use crate::normalize::NormalizedMap;
use serde::Serialize;
use serde_json::Value;

/// 容器在容器组中的角色，决定默认挂载与注入的环境变量规则。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainerRole {
    /// 不注入任何默认值（pause 容器、仅按镜像编译的 sidecar）
    Plain,
    /// 普通用户容器
    #[default]
    User,
    /// 虚拟节点上的容器
    VirtualNode {
        privileged: bool,
        workload_identity: bool,
    },
}

impl ContainerRole {
    /// 该角色的默认挂载，按注入顺序排列。
    pub fn default_mounts(&self) -> Vec<MountDef> {
        match self {
            ContainerRole::Plain => Vec::new(),
            ContainerRole::User => DEFAULT_MOUNTS_USER.to_vec(),
            ContainerRole::VirtualNode {
                privileged,
                workload_identity,
            } => {
                let mut mounts = DEFAULT_MOUNTS_VIRTUAL_NODE.to_vec();
                mounts.extend_from_slice(DEFAULT_MOUNTS_USER_VIRTUAL_NODE);
                if *privileged {
                    mounts.extend_from_slice(DEFAULT_MOUNTS_PRIVILEGED_VIRTUAL_NODE);
                }
                if *workload_identity {
                    mounts.extend_from_slice(DEFAULT_MOUNTS_WORKLOAD_IDENTITY_VIRTUAL_NODE);
                }
                mounts
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    Bind,
}

/// 用户声明的挂载：`{type, path, readonly?, options?}`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub mount_type: String,
    pub path: String,
    pub readonly: bool,
    pub options: Option<Vec<String>>,
}

impl MountSpec {
    pub fn from_raw(raw: &Value, field: &str) -> Result<Self> {
        let map = NormalizedMap::from_value(raw, field)?;
        let type_field = format!("{field}[type]");
        let mount_type = map.get_str("type", &type_field)?.unwrap_or_default();
        if source_for(mount_type).is_none() {
            let supported: Vec<&str> = MOUNT_SOURCE_TABLE.iter().map(|(t, _)| *t).collect();
            return Err(PolicyError::malformed(
                type_field,
                format!("can only be following values: {}", supported.join(",")),
            ));
        }
        let path_field = format!("{field}[path]");
        let path = match map.get_str("path", &path_field)? {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => return Err(PolicyError::malformed(path_field, "is empty or can not be found")),
        };
        let readonly = map
            .get_bool("readonly", &format!("{field}[readonly]"))?
            .unwrap_or(false);
        let options = map
            .get_string_list("options", &format!("{field}[options]"))?
            .filter(|options| !options.is_empty());
        Ok(Self {
            mount_type: mount_type.to_string(),
            path,
            readonly,
            options,
        })
    }

    fn from_def(def: &MountDef) -> Self {
        let (mount_type, path, readonly) = *def;
        Self {
            mount_type: mount_type.to_string(),
            path: path.to_string(),
            readonly,
            options: None,
        }
    }
}

/// 策略中的一条挂载记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    pub source: String,
    pub destination: String,
    #[serde(rename = "type")]
    pub mount_type: MountType,
    pub options: Vec<String>,
    #[serde(skip)]
    pub readonly: bool,
}

impl Mount {
    /// 声明的 options 原样使用；否则使用默认三元组，读写位按 `readonly` 设置。
    pub fn from_spec(spec: &MountSpec) -> Result<Self> {
        let source = source_for(&spec.mount_type).ok_or_else(|| {
            PolicyError::malformed("mounts[type]", format!("unknown mount type {}", spec.mount_type))
        })?;
        let options = match &spec.options {
            Some(options) => options.clone(),
            None => {
                let mut options: Vec<String> =
                    DEFAULT_MOUNT_OPTIONS.iter().map(|o| o.to_string()).collect();
                if spec.readonly {
                    options[MOUNT_RW_OPTION_INDEX] = "ro".to_string();
                }
                options
            }
        };
        Ok(Self {
            source: source.to_string(),
            destination: spec.path.clone(),
            mount_type: MountType::Bind,
            options,
            readonly: spec.readonly,
        })
    }
}

fn source_for(mount_type: &str) -> Option<&'static str> {
    MOUNT_SOURCE_TABLE
        .iter()
        .find(|(t, _)| *t == mount_type)
        .map(|(_, source)| *source)
}

/// 生成容器的挂载列表：用户声明在前，角色默认挂载在后；基线 sidecar 不注入默认挂载。
pub fn build_mounts(
    declared: &[MountSpec],
    role: &ContainerRole,
    is_sidecar: bool,
) -> Result<Vec<Mount>> {
    let mut specs = declared.to_vec();
    if !is_sidecar {
        specs.extend(role.default_mounts().iter().map(MountSpec::from_def));
    }
    specs.iter().map(Mount::from_spec).collect()
}
