//! 策略输入文件：面向用户的 JSON 格式，转换为原始容器描述。

use crate::error::{PolicyError, Result};
use crate::fragments::{parse_imports, FragmentImport};
use crate::normalize::NormalizedMap;
use crate::policy::ContainerRole;
use serde_json::{json, Map, Value};
use std::path::Path;

const VIRTUAL_NODE_SCENARIO: &str = "vn2";

/// 一个待编译的容器：原始描述 + 角色。
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInput {
    pub name: Option<String>,
    pub raw: Value,
    pub role: ContainerRole,
}

/// 解析后的输入文件。
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyInput {
    pub version: Option<String>,
    pub containers: Vec<ContainerInput>,
    /// 文件中声明的片段导入；`None` 表示使用默认导入
    pub fragments: Option<Vec<FragmentImport>>,
}

impl PolicyInput {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| PolicyError::MalformedInput(format!("input is not valid JSON: {e}")))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let root = NormalizedMap::from_value(value, "input")?;
        let version = root.get("version").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        let virtual_node = root
            .get_str("scenario", "scenario")?
            .is_some_and(|s| s.eq_ignore_ascii_case(VIRTUAL_NODE_SCENARIO));

        let items = root
            .get_array("containers", "containers")?
            .ok_or_else(|| PolicyError::malformed("containers", "is empty or can not be found"))?;
        let containers = items
            .iter()
            .map(|item| convert_container(item, virtual_node))
            .collect::<Result<Vec<_>>>()?;

        let fragments = root
            .get_array("fragments", "fragments")?
            .map(|items| parse_imports(items))
            .transpose()?;

        Ok(Self {
            version,
            containers,
            fragments,
        })
    }
}

fn convert_container(item: &Value, virtual_node: bool) -> Result<ContainerInput> {
    let container = NormalizedMap::from_value(item, "containers")?;
    let name = container
        .get_str("name", "containers][name")?
        .map(str::to_string);
    let props = container
        .get_object("properties", "containers][properties")?
        .ok_or_else(|| {
            PolicyError::malformed("containers][properties", "is empty or can not be found")
        })?;

    let mut raw = Map::new();
    if let Some(image) = props.get("image") {
        raw.insert("containerImage".into(), image.clone());
        if let Some(id) = props.get("id") {
            raw.insert("id".into(), id.clone());
        }
    }

    let env = match props.get_array("environmentVariables", "environmentVariables")? {
        Some(vars) => vars.iter().map(convert_env_var).collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    raw.insert("environmentVariables".into(), Value::Array(env));

    for key in ["command", "workingDir", "execProcesses", "signals", "allowStdioAccess"] {
        if let Some(value) = props.get(key) {
            raw.insert(key.into(), value.clone());
        }
    }

    if let Some(mounts) = props.get_array("volumeMounts", "volumeMounts")? {
        let mounts = mounts
            .iter()
            .map(convert_mount)
            .collect::<Result<Vec<_>>>()?;
        raw.insert("mounts".into(), Value::Array(mounts));
    }

    let security = props.get_object("securityContext", "securityContext")?;
    let privileged = match &security {
        Some(ctx) => ctx
            .get_bool("privileged", "securityContext][privileged")?
            .unwrap_or(false),
        None => false,
    };
    let escalation = match &security {
        Some(ctx) => ctx.get_bool(
            "allowPrivilegeEscalation",
            "securityContext][allowPrivilegeEscalation",
        )?,
        None => None,
    };
    if escalation == Some(false) && !privileged {
        raw.insert("allowElevated".into(), Value::Bool(false));
    }

    let workload_identity = props
        .get_bool("workloadIdentity", "workloadIdentity")?
        .unwrap_or(false);
    let role = if virtual_node {
        ContainerRole::VirtualNode {
            privileged,
            workload_identity,
        }
    } else {
        ContainerRole::User
    };

    Ok(ContainerInput {
        name,
        raw: Value::Object(raw),
        role,
    })
}

/// `regex: true` 表示正则规则；显式的 `strategy` 优先。
fn convert_env_var(var: &Value) -> Result<Value> {
    let map = NormalizedMap::from_value(var, "environmentVariables")?;
    let strategy = match map.get_str("strategy", "environmentVariables][strategy")? {
        Some(strategy) => strategy.to_string(),
        None => {
            let regex = map
                .get_bool("regex", "environmentVariables][regex")?
                .unwrap_or(false);
            let strategy = if regex { "re2" } else { "string" };
            strategy.to_string()
        }
    };
    let required = map
        .get_bool("required", "environmentVariables][required")?
        .unwrap_or(false);
    Ok(json!({
        "name": map.get("name"),
        "value": map.get("value"),
        "strategy": strategy,
        "required": required,
    }))
}

fn convert_mount(mount: &Value) -> Result<Value> {
    let map = NormalizedMap::from_value(mount, "volumeMounts")?;
    let mut out = Map::new();
    if let Some(mount_type) = map.get_any(&["mountType", "type"]) {
        out.insert("type".into(), mount_type.clone());
    }
    if let Some(path) = map.get_any(&["mountPath", "path"]) {
        out.insert("path".into(), path.clone());
    }
    if let Some(readonly) = map.get("readonly") {
        out.insert("readonly".into(), readonly.clone());
    }
    if let Some(options) = map.get("options") {
        out.insert("options".into(), options.clone());
    }
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const INPUT: &str = r#"{
        "version": "1.0",
        "containers": [
            {
                "name": "web",
                "properties": {
                    "image": "python:3.9",
                    "command": ["python3"],
                    "environmentVariables": [
                        {"name": "PORT", "value": "8080"},
                        {"name": "TOKEN", "value": ".+", "regex": true, "required": true}
                    ],
                    "volumeMounts": [
                        {"name": "share", "mountPath": "/mnt/share", "mountType": "azureFile", "readOnly": true}
                    ],
                    "securityContext": {"allowPrivilegeEscalation": false}
                }
            }
        ]
    }"#;

    #[test]
    fn converts_user_facing_fields() {
        let input = PolicyInput::from_str(INPUT).unwrap();
        assert_eq!(input.version.as_deref(), Some("1.0"));
        assert!(input.fragments.is_none());
        let container = &input.containers[0];
        assert_eq!(container.name.as_deref(), Some("web"));
        assert_eq!(container.role, ContainerRole::User);
        assert_eq!(container.raw["containerImage"], "python:3.9");
        assert_eq!(container.raw["allowElevated"], false);
        assert_eq!(container.raw["environmentVariables"][0]["strategy"], "string");
        assert_eq!(container.raw["environmentVariables"][1]["strategy"], "re2");
        assert_eq!(container.raw["environmentVariables"][1]["required"], true);
        assert_eq!(
            container.raw["mounts"][0],
            json!({"type": "azureFile", "path": "/mnt/share", "readonly": true})
        );
    }

    #[test]
    fn virtual_node_scenario_sets_role() {
        let input = PolicyInput::from_value(&json!({
            "scenario": "vn2",
            "containers": [{"name": "c", "properties": {
                "image": "app", "securityContext": {"privileged": true}, "workloadIdentity": true
            }}]
        }))
        .unwrap();
        assert_eq!(
            input.containers[0].role,
            ContainerRole::VirtualNode {
                privileged: true,
                workload_identity: true
            }
        );
    }

    #[test]
    fn missing_containers_or_properties_is_malformed() {
        for value in [json!({"version": "1.0"}), json!({"containers": [{"name": "c"}]})] {
            let err = PolicyInput::from_value(&value).unwrap_err();
            assert!(matches!(err, PolicyError::MalformedInput(_)));
        }
    }

    #[test]
    fn reads_fragments_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"containers": [], "fragments": [{{"feed": "f", "issuer": "i", "minimum_svn": "3", "includes": ["containers"]}}]}}"#
        )
        .unwrap();
        let input = PolicyInput::from_file(file.path()).unwrap();
        assert_eq!(input.fragments.unwrap()[0].minimum_svn, 3);
    }
}
