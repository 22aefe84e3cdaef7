//! 编译流水线：输入 -> 容器策略 -> 片段解析 -> 层信息 -> 策略文档。
//!
//! 全程同步、单线程；文档在渲染前由调用方独占。

use crate::config::CompileOptions;
use crate::error::{PolicyError, Result};
use crate::external::{FragmentDiscovery, ImageIntrospection};
use crate::fragments::{default_imports, FragmentImport, FragmentResolver, Resolution};
use crate::input::PolicyInput;
use crate::policy::{ContainerPolicy, PolicyDocument};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// 一次容器组编译的结果。
#[derive(Debug, Clone)]
pub struct Compilation {
    pub document: PolicyDocument,
    /// 配置了片段发现时的解析结果
    pub resolution: Option<Resolution>,
}

/// 策略编译器，外部协作者按需注入。
pub struct Compiler<'a> {
    options: CompileOptions,
    images: Option<&'a dyn ImageIntrospection>,
    discovery: Option<&'a dyn FragmentDiscovery>,
}

impl<'a> Compiler<'a> {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            images: None,
            discovery: None,
        }
    }

    pub fn with_image_introspection(mut self, images: &'a dyn ImageIntrospection) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_fragment_discovery(mut self, discovery: &'a dyn FragmentDiscovery) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// 按声明顺序构建全部容器；任何输入错误立即中止。
    pub fn build_containers(&self, input: &PolicyInput) -> Result<Vec<ContainerPolicy>> {
        input
            .containers
            .iter()
            .map(|c| ContainerPolicy::from_spec(&c.raw, &c.role, &self.options))
            .collect()
    }

    /// 文件声明的导入，缺省时使用内置导入。
    pub fn imports_for(&self, input: &PolicyInput) -> Vec<FragmentImport> {
        input
            .fragments
            .clone()
            .unwrap_or_else(|| default_imports(&self.options))
    }

    /// 为每个容器填入镜像层；镜像无法解析是致命错误。
    pub fn populate_layers(&self, containers: &mut [ContainerPolicy]) -> Result<()> {
        let Some(images) = self.images else {
            debug!("no image introspection configured, layers stay empty");
            return Ok(());
        };
        let mut resolved: HashMap<String, Vec<String>> = HashMap::new();
        for container in containers.iter_mut() {
            let image = container.image().to_string();
            let layers = match resolved.get(&image) {
                Some(layers) => layers.clone(),
                None => {
                    let layers = images.resolve_layers(&image).map_err(|e| match e {
                        PolicyError::ImageResolution(_) => e,
                        other => PolicyError::ImageResolution(format!("{image}: {other}")),
                    })?;
                    debug!(image = %image, layers = layers.len(), "resolved image layers");
                    resolved.insert(image.clone(), layers.clone());
                    layers
                }
            };
            container.set_layers(layers);
        }
        Ok(())
    }

    /// 编译容器组策略：已由片段覆盖的容器不再内联，并追加 pause 容器。
    #[instrument(skip_all, fields(containers = input.containers.len(), debug_mode = self.options.debug_mode))]
    pub fn compile(&self, input: &PolicyInput) -> Result<Compilation> {
        let containers = self.build_containers(input)?;
        let imports = self.imports_for(input);

        let (mut inline, resolution) = match self.discovery {
            Some(discovery) => {
                let resolution = FragmentResolver::new(discovery).resolve(containers, &imports);
                (resolution.inline.clone(), Some(resolution))
            }
            None => (containers, None),
        };
        self.populate_layers(&mut inline)?;

        info!(
            inline = inline.len(),
            imports = imports.len(),
            "compiled container group policy"
        );
        let document = PolicyDocument::new(inline, imports).with_pause_container()?;
        Ok(Compilation {
            document,
            resolution,
        })
    }

    /// 编译片段：不做片段解析，不追加 pause 容器；导入只包含文件中声明的部分。
    #[instrument(skip_all, fields(containers = input.containers.len()))]
    pub fn compile_fragment(&self, input: &PolicyInput) -> Result<PolicyDocument> {
        let mut containers = self.build_containers(input)?;
        self.populate_layers(&mut containers)?;
        Ok(PolicyDocument::new(
            containers,
            input.fragments.clone().unwrap_or_default(),
        ))
    }

    /// 用于一致性检查的文档：全部声明容器，不做片段解析。
    pub fn compile_unresolved(&self, input: &PolicyInput) -> Result<PolicyDocument> {
        let mut containers = self.build_containers(input)?;
        self.populate_layers(&mut containers)?;
        Ok(PolicyDocument::new(containers, self.imports_for(input)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::fakes::{FakeDiscovery, FakeImages};
    use crate::external::DiscoveredFragment;
    use serde_json::json;

    fn input() -> PolicyInput {
        PolicyInput::from_value(&json!({
            "containers": [
                {"name": "app", "properties": {"image": "app:1", "command": ["run"]}},
                {"name": "db", "properties": {"image": "db:1"}}
            ],
            "fragments": [{"feed": "F", "issuer": "i", "minimum_svn": "2", "includes": ["containers"]}]
        }))
        .unwrap()
    }

    fn images() -> FakeImages {
        let mut images = FakeImages::default();
        images.layers.insert("app:1".into(), vec!["l-app".into()]);
        images.layers.insert("db:1".into(), vec!["l-db".into()]);
        images
    }

    #[test]
    fn compile_without_discovery_keeps_everything_inline() {
        let images = images();
        let compilation = Compiler::new(CompileOptions::default())
            .with_image_introspection(&images)
            .compile(&input())
            .unwrap();
        let containers = compilation.document.containers_json(false);
        let containers = containers.as_array().unwrap();
        assert_eq!(containers.len(), 3);
        assert_eq!(containers[0]["id"], "app:1");
        assert_eq!(containers[0]["layers"], json!(["l-app"]));
        assert_eq!(containers[1]["id"], "db:1");
        assert!(compilation.resolution.is_none());
    }

    #[test]
    fn covered_containers_are_not_inlined() {
        let images = images();
        let mut discovery = FakeDiscovery::default();
        discovery.attached.insert(
            "db:1".into(),
            vec![DiscoveredFragment {
                text: "package db\nsvn := \"2\"\ncontainers := [{\"id\": \"db:1\"}]\n".into(),
                feed: "F".into(),
            }],
        );
        let compilation = Compiler::new(CompileOptions::default())
            .with_image_introspection(&images)
            .with_fragment_discovery(&discovery)
            .compile(&input())
            .unwrap();
        let ids: Vec<_> = compilation
            .document
            .containers()
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(ids, vec!["app:1"]);
        assert_eq!(compilation.document.fragments()[0].feed, "F");
    }

    #[test]
    fn unresolvable_image_is_fatal() {
        let images = FakeImages::default();
        let err = Compiler::new(CompileOptions::default())
            .with_image_introspection(&images)
            .compile(&input())
            .unwrap_err();
        assert!(matches!(err, PolicyError::ImageResolution(_)));
    }

    #[test]
    fn default_imports_apply_when_input_has_none() {
        let input = PolicyInput::from_value(&json!({"containers": []})).unwrap();
        let compiler = Compiler::new(CompileOptions::default().with_infrastructure_svn(Some(3)));
        let imports = compiler.imports_for(&input);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].minimum_svn, 3);
    }

    #[test]
    fn fragment_document_has_no_pause_container() {
        let document = Compiler::new(CompileOptions::default())
            .compile_fragment(&input())
            .unwrap();
        assert_eq!(document.containers_json(false).as_array().unwrap().len(), 2);
    }
}
