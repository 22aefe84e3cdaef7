//! 基线 sidecar 表：已知基础设施镜像及其期望的策略形态。

use crate::error::{PolicyError, Result};
use crate::policy::EnvironmentRule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const BUILTIN_SIDECARS: &str = r#"{
  "mcr.microsoft.com/aci/msi-atlas-adapter": {
    "command": ["/bin/sh", "-c", "until ./msiAtlasAdapter; do echo $? restarting; done"],
    "working_dir": "/root/",
    "env_rules": [
      {"pattern": "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin:/root", "strategy": "string", "required": false},
      {"pattern": "IDENTITY_API_VERSION=.+", "strategy": "re2"},
      {"pattern": "IDENTITY_HEADER=.+", "strategy": "re2"},
      {"pattern": "IDENTITY_SERVER_THUMBPRINT=.+", "strategy": "re2"},
      {"pattern": "HOSTNAME=.+", "strategy": "re2"},
      {"pattern": "TERM=xterm", "strategy": "string"}
    ]
  },
  "mcr.microsoft.com/aci/atlas-mount-azure-file-volume": {
    "command": ["/mount_azure_file.sh"],
    "working_dir": "/",
    "env_rules": [
      {"pattern": "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin", "strategy": "string", "required": false},
      {"pattern": "AZURE_STORAGE_ACCOUNT_NAME=.+", "strategy": "re2"},
      {"pattern": "AZURE_STORAGE_ACCOUNT_KEY=.+", "strategy": "re2"},
      {"pattern": "AZURE_FILE_SHARE_NAME=.+", "strategy": "re2"},
      {"pattern": "MOUNT_PATH=.+", "strategy": "re2"},
      {"pattern": "HOSTNAME=.+", "strategy": "re2"},
      {"pattern": "TERM=xterm", "strategy": "string"}
    ]
  }
}"#;

/// 一个基线 sidecar 的期望形态。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSidecar {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env_rules: Vec<EnvironmentRule>,
}

/// 镜像基名（`:` 之前的部分）到基线形态的映射。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaselineSidecars {
    entries: BTreeMap<String, BaselineSidecar>,
}

impl BaselineSidecars {
    /// 内置表。内置 JSON 解析失败时退化为空表。
    pub fn builtin() -> Self {
        match Self::from_json(BUILTIN_SIDECARS) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(error = %e, "built-in sidecar table is unreadable");
                Self::default()
            }
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            PolicyError::MalformedInput(format!("baseline sidecar table is invalid: {e}"))
        })
    }

    /// 从文件加载，整体替换内置表。
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let table = Self::from_json(&text)?;
        tracing::info!(path = %path.display(), count = table.entries.len(), "loaded baseline sidecars");
        Ok(table)
    }

    pub fn get(&self, image: &str) -> Option<&BaselineSidecar> {
        self.entries.get(image_base(image))
    }

    pub fn is_sidecar(&self, image: &str) -> bool {
        self.get(image).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 镜像引用的基名：第一个 `:` 之前的部分。
pub fn image_base(image: &str) -> &str {
    image.split(':').next().unwrap_or(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_table_knows_msi_adapter() {
        let table = BaselineSidecars::builtin();
        assert!(table.is_sidecar("mcr.microsoft.com/aci/msi-atlas-adapter:master_20201210.1"));
        assert!(table.is_sidecar("mcr.microsoft.com/aci/atlas-mount-azure-file-volume"));
        assert!(!table.is_sidecar("python:3.9"));
        let adapter = table.get("mcr.microsoft.com/aci/msi-atlas-adapter:latest").unwrap();
        assert_eq!(adapter.working_dir.as_deref(), Some("/root/"));
        assert!(!adapter.env_rules.is_empty());
    }

    #[test]
    fn image_base_strips_tag() {
        assert_eq!(image_base("python:3.9"), "python");
        assert_eq!(image_base("alpine"), "alpine");
    }

    #[test]
    fn file_replaces_builtin_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"example.com/sidecar": {{"env_rules": [{{"pattern": "A=1", "strategy": "string", "required": true}}]}}}}"#
        )
        .unwrap();
        let table = BaselineSidecars::from_file(file.path()).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.is_sidecar("example.com/sidecar:v2"));
        assert!(!table.is_sidecar("mcr.microsoft.com/aci/msi-atlas-adapter"));
        assert!(table.get("example.com/sidecar").unwrap().env_rules[0].required);
    }

    #[test]
    fn invalid_table_is_malformed() {
        let err = BaselineSidecars::from_json("[1]").unwrap_err();
        assert!(matches!(err, PolicyError::MalformedInput(_)));
    }
}
