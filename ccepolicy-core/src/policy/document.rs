//! 策略文档：有序的容器策略 + 片段导入 + 全局开关，负责规范化输出。

use super::container::ContainerPolicy;
use super::mounts::ContainerRole;
use crate::canonical::{encode_base64, render, to_compact, to_pretty};
use crate::config::{
    pause, CompileOptions, FRAMEWORK_RULES, POLICY_API_VERSION, POLICY_FLAGS,
    POLICY_FRAMEWORK_VERSION, RESERVED_NAMESPACE,
};
use crate::error::{PolicyError, Result};
use crate::fragments::FragmentImport;
use serde_json::{json, Value};
use std::fmt::Write;

/// 输出格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// 紧凑 rego 文本的 base64，可直接写入部署模板
    #[default]
    Default,
    /// 紧凑 JSON 容器数组
    Raw,
    /// 缩进 JSON 容器数组
    PrettyPrint,
}

/// 有序的容器策略集合。容器顺序即声明顺序，影响签名与差异输出。
#[derive(Debug, Clone, Default)]
pub struct PolicyDocument {
    containers: Vec<ContainerPolicy>,
    fragments: Vec<FragmentImport>,
    pause: Option<ContainerPolicy>,
}

impl PolicyDocument {
    pub fn new(containers: Vec<ContainerPolicy>, fragments: Vec<FragmentImport>) -> Self {
        Self {
            containers,
            fragments,
            pause: None,
        }
    }

    /// 容器组策略：在声明的容器之后追加 pause 容器。
    pub fn with_pause_container(mut self) -> Result<Self> {
        self.pause = Some(pause_container()?);
        Ok(self)
    }

    pub fn containers(&self) -> &[ContainerPolicy] {
        &self.containers
    }

    pub fn containers_mut(&mut self) -> &mut [ContainerPolicy] {
        &mut self.containers
    }

    pub fn set_containers(&mut self, containers: Vec<ContainerPolicy>) {
        self.containers = containers;
    }

    pub fn fragments(&self) -> &[FragmentImport] {
        &self.fragments
    }

    pub fn set_fragments(&mut self, fragments: Vec<FragmentImport>) {
        self.fragments = fragments;
    }

    /// 所有声明容器的镜像，按声明顺序去重。
    pub fn images(&self) -> Vec<&str> {
        let mut images: Vec<&str> = Vec::new();
        for container in &self.containers {
            if !images.contains(&container.image()) {
                images.push(container.image());
            }
        }
        images
    }

    pub fn containers_json(&self, omit_id: bool) -> Value {
        let mut records: Vec<Value> = self
            .containers
            .iter()
            .map(|c| c.to_policy_json(omit_id))
            .collect();
        if let Some(pause) = &self.pause {
            records.push(pause.to_policy_json(true));
        }
        Value::Array(records)
    }

    pub fn fragments_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.fragments)?)
    }

    /// 仅容器数组的 JSON。
    pub fn to_raw(&self, omit_id: bool, pretty: bool) -> Result<String> {
        render(&self.containers_json(omit_id), pretty)
    }

    /// 完整的容器组策略（rego 文本）。
    pub fn to_policy_rego(&self, omit_id: bool) -> Result<String> {
        let mut out = String::new();
        out.push_str("package policy\n\n");
        out.push_str("import future.keywords.every\nimport future.keywords.in\n\n");
        let _ = writeln!(out, "api_version := \"{POLICY_API_VERSION}\"");
        let _ = writeln!(out, "framework_version := \"{POLICY_FRAMEWORK_VERSION}\"\n");
        let _ = writeln!(out, "fragments := {}\n", to_pretty(&self.fragments_json()?)?);
        let _ = writeln!(out, "containers := {}\n", to_compact(&self.containers_json(omit_id))?);
        for (flag, value) in POLICY_FLAGS {
            let _ = writeln!(out, "{flag} := {value}");
        }
        out.push('\n');
        for rule in FRAMEWORK_RULES {
            let _ = writeln!(out, "{rule} := data.framework.{rule}");
        }
        out.push_str("reason := {\"errors\": data.framework.errors}\n");
        Ok(out)
    }

    /// 片段文本：`package <namespace>` + svn + 片段自身的导入与容器。
    pub fn to_fragment_rego(&self, namespace: &str, svn: u64, omit_id: bool) -> Result<String> {
        if namespace.is_empty() {
            return Err(PolicyError::malformed("namespace", "is empty"));
        }
        if namespace == RESERVED_NAMESPACE {
            return Err(PolicyError::malformed(
                "namespace",
                format!("'{RESERVED_NAMESPACE}' is reserved for container group policies"),
            ));
        }
        let mut out = String::new();
        let _ = writeln!(out, "package {namespace}\n");
        let _ = writeln!(out, "svn := \"{svn}\"");
        let _ = writeln!(out, "framework_version := \"{POLICY_FRAMEWORK_VERSION}\"\n");
        let _ = writeln!(out, "fragments := {}\n", to_pretty(&self.fragments_json()?)?);
        let _ = writeln!(out, "containers := {}", to_pretty(&self.containers_json(omit_id))?);
        Ok(out)
    }

    pub fn serialize(&self, format: OutputFormat, omit_id: bool) -> Result<String> {
        match format {
            OutputFormat::Default => Ok(encode_base64(&self.to_policy_rego(omit_id)?)),
            OutputFormat::Raw => self.to_raw(omit_id, false),
            OutputFormat::PrettyPrint => self.to_raw(omit_id, true),
        }
    }
}

/// 每个容器组都带有的 pause 容器。
pub fn pause_container() -> Result<ContainerPolicy> {
    let env: Vec<Value> = pause::ENV_RULES
        .iter()
        .map(|(name, value, strategy, required)| {
            json!({"name": name, "value": value, "strategy": strategy, "required": required})
        })
        .collect();
    let raw = json!({
        "image": pause::IMAGE,
        "environmentVariables": env,
        "command": pause::COMMAND,
        "workingDir": pause::WORKING_DIR,
        "allowElevated": false,
    });
    let mut container = ContainerPolicy::from_spec(&raw, &ContainerRole::Plain, &CompileOptions::default())?;
    container.set_layers(pause::LAYERS.iter().map(|l| l.to_string()).collect());
    Ok(container)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::decode_base64;
    use crate::scanner::{extract_containers_and_fragments, extract_svn};

    fn document() -> PolicyDocument {
        let raw = json!({"id": "web", "image": "nginx:1.25", "environmentVariables": [], "command": ["nginx"]});
        let container =
            ContainerPolicy::from_spec(&raw, &ContainerRole::User, &CompileOptions::default()).unwrap();
        PolicyDocument::new(vec![container], vec![FragmentImport::infrastructure(1)])
    }

    #[test]
    fn rendering_is_byte_identical() {
        let doc = document().with_pause_container().unwrap();
        for format in [OutputFormat::Default, OutputFormat::Raw, OutputFormat::PrettyPrint] {
            assert_eq!(
                doc.serialize(format, false).unwrap(),
                doc.serialize(format, false).unwrap()
            );
        }
    }

    #[test]
    fn omit_id_controls_id_key() {
        let doc = document();
        let omitted: Value = serde_json::from_str(&doc.to_raw(true, false).unwrap()).unwrap();
        let kept: Value = serde_json::from_str(&doc.to_raw(false, false).unwrap()).unwrap();
        assert!(omitted[0].get("id").is_none());
        assert_eq!(kept[0]["id"], "web");
    }

    #[test]
    fn pause_container_follows_declared_containers() {
        let doc = document().with_pause_container().unwrap();
        let containers = doc.containers_json(false);
        let containers = containers.as_array().unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[1]["command"], json!(["/pause"]));
        assert_eq!(containers[1]["allow_elevated"], false);
        assert!(containers[1].get("id").is_none());
        assert_eq!(containers[1]["layers"][0], pause::LAYERS[0]);
    }

    #[test]
    fn policy_rego_round_trips_through_scanner() {
        let doc = document().with_pause_container().unwrap();
        let rego = decode_base64(&doc.serialize(OutputFormat::Default, false).unwrap()).unwrap();
        assert!(rego.starts_with("package policy\n"));
        assert!(rego.contains("allow_capability_dropping := true"));
        assert!(rego.contains("mount_device := data.framework.mount_device"));

        let (containers, fragments) = extract_containers_and_fragments(&rego).unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0]["id"], "web");
        assert_eq!(fragments[0]["minimum_svn"], "1");
    }

    #[test]
    fn fragment_rego_declares_namespace_and_svn() {
        let doc = document();
        let text = doc.to_fragment_rego("payments", 3, false).unwrap();
        assert!(text.starts_with("package payments\n"));
        assert_eq!(extract_svn(&text), Some(3));
        let (containers, _) = extract_containers_and_fragments(&text).unwrap();
        assert_eq!(containers.len(), 1);
    }

    #[test]
    fn reserved_namespace_is_rejected() {
        let err = document().to_fragment_rego("policy", 1, false).unwrap_err();
        assert!(matches!(err, PolicyError::MalformedInput(_)));
    }
}
