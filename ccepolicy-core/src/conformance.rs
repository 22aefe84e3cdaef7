//! 一致性检查：sidecar 校验、已有策略与重新生成策略的漂移比较、片段导入比较。

use crate::diff::{readable_diff, structural_diff, Change, ChangeKind, PathSegment};
use crate::error::Result;
use crate::fragments::FragmentImport;
use crate::policy::{PolicyDocument, RuleMatcher};
use crate::sidecar::BaselineSidecars;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// `container id -> field -> reasons`
pub type Violations = BTreeMap<String, BTreeMap<String, Vec<String>>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SidecarReport {
    pub is_valid: bool,
    pub violations: Violations,
}

/// 漂移报告：`diff` 以容器 id 为键，值为可读差异。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftReport {
    pub is_equal: bool,
    pub diff: Value,
}

/// 对每个基线 sidecar 镜像，检查其生成的环境变量规则能否通过基线策略。
/// 非 sidecar 容器直接跳过。
#[instrument(skip_all, fields(containers = document.containers().len()))]
pub fn validate_sidecars(
    document: &PolicyDocument,
    sidecars: &BaselineSidecars,
) -> Result<SidecarReport> {
    let mut violations = Violations::new();
    for container in document.containers() {
        let Some(baseline) = sidecars.get(container.image()) else {
            continue;
        };
        let matcher = RuleMatcher::new(&baseline.env_rules)?;
        let reasons = matcher.violations(&container.effective_env_rules());
        if !reasons.is_empty() {
            warn!(id = container.id(), count = reasons.len(), "sidecar does not match its baseline");
            violations
                .entry(container.id().to_string())
                .or_default()
                .insert("env_rules".to_string(), reasons);
        }
    }
    Ok(SidecarReport {
        is_valid: violations.is_empty(),
        violations,
    })
}

/// 按 id 匹配已有策略与重新生成的容器记录并做结构比较。没有 id 的记录（pause 容器）不参与。
///
/// 同一镜像的多个容器共用 id，同 id 的记录按出现顺序逐个配对；第 n 个（n > 0）
/// 记录的差异以 `id[n]` 为键，多出的记录按整体新增或删除报告。
#[instrument(skip_all, fields(existing = existing.len(), regenerated = regenerated.len()))]
pub fn compare(existing: &[Value], regenerated: &[Value]) -> DriftReport {
    let existing = group_by_id(existing);
    let regenerated = group_by_id(regenerated);

    let mut ids: Vec<&str> = existing.iter().map(|(id, _)| id.as_str()).collect();
    for (id, _) in &regenerated {
        if !ids.contains(&id.as_str()) {
            ids.push(id);
        }
    }

    let mut diff = Map::new();
    for id in ids {
        let old = members(&existing, id);
        let new = members(&regenerated, id);
        for n in 0..old.len().max(new.len()) {
            let changes = match (old.get(n).copied(), new.get(n).copied()) {
                (Some(old), Some(new)) => structural_diff(old, new),
                (Some(old), None) => vec![whole_container(ChangeKind::ItemRemoved, Some(old), None)],
                (None, Some(new)) => vec![whole_container(ChangeKind::ItemAdded, None, Some(new))],
                (None, None) => Vec::new(),
            };
            if !changes.is_empty() {
                let key = if n == 0 {
                    id.to_string()
                } else {
                    format!("{id}[{n}]")
                };
                diff.insert(key, readable_diff(&changes));
            }
        }
    }

    let is_equal = diff.is_empty();
    if is_equal {
        info!("existing policy matches the regenerated one");
    }
    DriftReport {
        is_equal,
        diff: Value::Object(diff),
    }
}

fn members<'a>(groups: &'a [(String, Vec<&'a Value>)], id: &str) -> &'a [&'a Value] {
    groups
        .iter()
        .find(|(other, _)| other.as_str() == id)
        .map(|(_, records)| records.as_slice())
        .unwrap_or(&[])
}

/// 按 id 分组，保持首次出现的顺序与组内的声明顺序。
fn group_by_id(records: &[Value]) -> Vec<(String, Vec<&Value>)> {
    let mut groups: Vec<(String, Vec<&Value>)> = Vec::new();
    for record in records {
        let Some(id) = record.get("id").and_then(Value::as_str) else {
            continue;
        };
        match groups.iter_mut().find(|(other, _)| other.as_str() == id) {
            Some((_, members)) => members.push(record),
            None => groups.push((id.to_string(), vec![record])),
        }
    }
    groups
}

fn whole_container(kind: ChangeKind, old: Option<&Value>, new: Option<&Value>) -> Change {
    Change {
        kind,
        path: vec![PathSegment::Key("containers".to_string())],
        old: old.cloned(),
        new: new.cloned(),
    }
}

/// 已有策略的片段导入与期望列表的差异；为空对象表示一致。
/// 片段允许被定制，调用方只应把差异当作警告。
pub fn compare_fragments(existing: &[Value], expected: &[FragmentImport]) -> Result<Value> {
    let existing: Vec<Value> = existing
        .iter()
        .map(|raw| match FragmentImport::from_value(raw) {
            Ok(import) => serde_json::to_value(import),
            Err(_) => Ok(raw.clone()),
        })
        .collect::<std::result::Result<_, _>>()?;
    let expected = serde_json::to_value(expected)?;
    let changes = structural_diff(&Value::Array(existing), &expected);
    if changes.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    Ok(readable_diff(&changes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use crate::policy::{ContainerPolicy, ContainerRole};
    use serde_json::json;

    fn sidecars() -> BaselineSidecars {
        BaselineSidecars::from_json(
            r#"{"example.com/sidecar": {"env_rules": [
                {"pattern": "PATH=/usr/bin", "strategy": "string", "required": false},
                {"pattern": "HOSTNAME=.+", "strategy": "re2"}
            ]}}"#,
        )
        .unwrap()
    }

    fn document(env: Value) -> PolicyDocument {
        let options = CompileOptions::default().with_sidecars(sidecars());
        let sidecar = ContainerPolicy::from_spec(
            &json!({"id": "side", "image": "example.com/sidecar:1", "environmentVariables": env}),
            &ContainerRole::User,
            &options,
        )
        .unwrap();
        let user = ContainerPolicy::from_spec(
            &json!({"id": "app", "image": "app:1", "environmentVariables": [
                {"name": "ANYTHING", "value": "x", "strategy": "string"}
            ]}),
            &ContainerRole::User,
            &options,
        )
        .unwrap();
        PolicyDocument::new(vec![sidecar, user], Vec::new())
    }

    #[test]
    fn matching_sidecar_is_valid() {
        let doc = document(json!([
            {"name": "PATH", "value": "/usr/bin", "strategy": "string"},
            {"name": "HOSTNAME", "value": "box", "strategy": "string"}
        ]));
        let report = validate_sidecars(&doc, &sidecars()).unwrap();
        assert!(report.is_valid);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn mismatched_sidecar_reports_under_its_id() {
        let doc = document(json!([{"name": "PATH", "value": "/other", "strategy": "string"}]));
        let report = validate_sidecars(&doc, &sidecars()).unwrap();
        assert!(!report.is_valid);
        assert_eq!(
            report.violations["side"]["env_rules"],
            vec!["environment variable with rule 'PATH=/other' does not match strings or regex in policy rules"]
        );
        assert!(!report.violations.contains_key("app"));
    }

    #[test]
    fn compare_detects_drift_by_id() {
        let existing = vec![
            json!({"id": "a", "command": ["run"]}),
            json!({"id": "gone", "command": []}),
            json!({"command": ["/pause"]}),
        ];
        let regenerated = vec![
            json!({"id": "a", "command": ["run", "--fast"]}),
            json!({"id": "new", "command": []}),
        ];
        let report = compare(&existing, &regenerated);
        assert!(!report.is_equal);
        assert_eq!(report.diff["a"]["values_added"]["command"], json!(["--fast"]));
        assert!(report.diff["gone"]["values_removed"]["containers"].is_array());
        assert!(report.diff["new"]["values_added"]["containers"].is_array());
    }

    #[test]
    fn containers_sharing_an_id_are_paired_in_order() {
        let existing = vec![
            json!({"id": "app:1", "command": ["x"]}),
            json!({"id": "app:1", "command": ["x"]}),
        ];
        let regenerated = vec![
            json!({"id": "app:1", "command": ["x"]}),
            json!({"id": "app:1", "command": ["z"]}),
        ];
        let report = compare(&existing, &regenerated);
        assert!(!report.is_equal);
        assert!(report.diff.get("app:1").is_none());
        assert!(report.diff["app:1[1]"]["values_changed"].is_object());
    }

    #[test]
    fn extra_container_with_shared_id_is_reported() {
        let one = vec![json!({"id": "app:1", "command": ["x"]})];
        let two = vec![one[0].clone(), json!({"id": "app:1", "command": ["y"]})];

        let added = compare(&one, &two);
        assert!(!added.is_equal);
        assert!(added.diff["app:1[1]"]["values_added"]["containers"].is_array());

        let removed = compare(&two, &one);
        assert!(removed.diff["app:1[1]"]["values_removed"]["containers"].is_array());
    }

    #[test]
    fn identical_policies_are_equal() {
        let records = vec![json!({"id": "a", "command": ["run"]})];
        let report = compare(&records, &records);
        assert!(report.is_equal);
        assert_eq!(report.diff, json!({}));
    }

    #[test]
    fn fragment_comparison_normalises_svn() {
        let expected = vec![FragmentImport::infrastructure(1)];
        let existing = vec![serde_json::to_value(&expected[0])
            .map(|mut v| {
                v["minimum_svn"] = json!(1);
                v
            })
            .unwrap()];
        assert_eq!(compare_fragments(&existing, &expected).unwrap(), json!({}));
        assert_ne!(compare_fragments(&[], &expected).unwrap(), json!({}));
    }
}
