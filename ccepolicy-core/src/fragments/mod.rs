//! 策略片段（fragment）：导入声明、解析覆盖关系、生成导入、签名发布。

mod publish;
mod resolver;

pub use publish::{FragmentPublisher, ImportGenerator, PublishRequest};
pub use resolver::{FragmentDecision, FragmentResolver, Resolution};

use crate::config::{infra_fragment, CompileOptions};
use crate::error::{PolicyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr, PickFirst};

/// 片段导入声明：`feed` + `issuer` 标识片段，`svn >= minimum_svn` 时才被信任。
///
/// `minimum_svn` 可以从字符串或整数读入，输出时总是十进制字符串。
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentImport {
    pub feed: String,
    pub issuer: String,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub minimum_svn: u64,
    #[serde(default)]
    pub includes: Vec<String>,
}

impl FragmentImport {
    /// 内置的基础设施片段导入。
    pub fn infrastructure(minimum_svn: u64) -> Self {
        Self {
            feed: infra_fragment::FEED.to_string(),
            issuer: infra_fragment::ISSUER.to_string(),
            minimum_svn,
            includes: infra_fragment::INCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// 键名不区分大小写，与容器描述的读取方式一致。
    pub fn from_value(value: &Value) -> Result<Self> {
        let normalized = match value {
            Value::Object(object) => {
                let mut lowered = serde_json::Map::new();
                for (key, inner) in object {
                    lowered
                        .entry(key.to_ascii_lowercase())
                        .or_insert_with(|| inner.clone());
                }
                Value::Object(lowered)
            }
            other => other.clone(),
        };
        serde_json::from_value(normalized)
            .map_err(|e| PolicyError::malformed("fragments", e.to_string()))
    }
}

/// 默认导入列表；`infrastructure_svn` 会覆盖内置的最小版本。
pub fn default_imports(options: &CompileOptions) -> Vec<FragmentImport> {
    let svn = match options.infrastructure_svn {
        Some(svn) => {
            if svn < infra_fragment::MINIMUM_SVN {
                tracing::warn!(
                    svn,
                    default_svn = infra_fragment::MINIMUM_SVN,
                    "infrastructure fragment svn is lower than the default"
                );
            }
            svn
        }
        None => infra_fragment::MINIMUM_SVN,
    };
    vec![FragmentImport::infrastructure(svn)]
}

pub fn parse_imports(values: &[Value]) -> Result<Vec<FragmentImport>> {
    values.iter().map(FragmentImport::from_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimum_svn_reads_string_or_int_and_writes_string() {
        let from_str = FragmentImport::from_value(&json!({
            "feed": "f", "issuer": "i", "minimum_svn": "2", "includes": ["containers"]
        }))
        .unwrap();
        let from_int =
            FragmentImport::from_value(&json!({"feed": "f", "issuer": "i", "minimum_svn": 2, "includes": ["containers"]}))
                .unwrap();
        assert_eq!(from_str, from_int);
        assert_eq!(serde_json::to_value(&from_int).unwrap()["minimum_svn"], "2");
    }

    #[test]
    fn import_keys_ignore_case() {
        let import = FragmentImport::from_value(&json!({
            "Feed": "f", "ISSUER": "i", "Minimum_SVN": "2", "Includes": ["fragments"]
        }))
        .unwrap();
        assert_eq!(import.feed, "f");
        assert_eq!(import.issuer, "i");
        assert_eq!(import.minimum_svn, 2);
        assert_eq!(import.includes, vec!["fragments"]);
    }

    #[test]
    fn malformed_import_is_rejected() {
        let err = FragmentImport::from_value(&json!({"feed": "f", "minimum_svn": "x"})).unwrap_err();
        assert!(matches!(err, PolicyError::MalformedInput(_)));
    }

    #[test]
    fn infrastructure_svn_overrides_default() {
        let imports = default_imports(&CompileOptions::default());
        assert_eq!(imports[0].minimum_svn, infra_fragment::MINIMUM_SVN);
        assert_eq!(imports[0].feed, infra_fragment::FEED);

        let options = CompileOptions::default().with_infrastructure_svn(Some(4));
        assert_eq!(default_imports(&options)[0].minimum_svn, 4);
    }
}
