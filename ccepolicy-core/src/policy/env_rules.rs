//! 环境变量规则：从原始输入构建、合并注入规则、以及把候选规则与已有策略做匹配。

use crate::config::EnvRuleDef;
use crate::error::{PolicyError, Result};
use crate::normalize::NormalizedMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// 规则的匹配方式：精确字符串或 RE2 正则。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvStrategy {
    String,
    Re2,
}

impl EnvStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvStrategy::String => "string",
            EnvStrategy::Re2 => "re2",
        }
    }
}

impl FromStr for EnvStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "string" => Ok(EnvStrategy::String),
            "re2" => Ok(EnvStrategy::Re2),
            other => Err(format!("unknown strategy: {other} (expected string or re2)")),
        }
    }
}

impl fmt::Display for EnvStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条环境变量规则，`pattern` 固定为 `"{name}={value}"`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRule {
    pub pattern: String,
    pub strategy: EnvStrategy,
    #[serde(default)]
    pub required: bool,
}

impl EnvironmentRule {
    pub fn new(name: &str, value: &str, strategy: EnvStrategy, required: bool) -> Self {
        Self {
            pattern: format!("{name}={value}"),
            strategy,
            required,
        }
    }

    /// 变量名：`pattern` 中第一个 `=` 之前的部分。
    pub fn name(&self) -> &str {
        self.pattern
            .split_once('=')
            .map(|(name, _)| name)
            .unwrap_or(&self.pattern)
    }

    pub fn from_def(def: &EnvRuleDef) -> Self {
        let (name, value, strategy, required) = *def;
        let strategy = if strategy == "re2" {
            EnvStrategy::Re2
        } else {
            EnvStrategy::String
        };
        Self::new(name, value, strategy, required)
    }

    /// 从原始 `{name, value, strategy, required}` 构建；前三个字段缺一不可。
    pub fn from_raw(raw: &Value, field: &str) -> Result<Self> {
        let map = NormalizedMap::from_value(raw, field)?;
        let name = map.get("name");
        let value = map.get("value");
        let strategy = map.get_str("strategy", field)?;
        let (Some(name), Some(value), Some(strategy)) = (name, value, strategy) else {
            return Err(PolicyError::malformed(field, "is incorrect"));
        };
        let strategy = EnvStrategy::from_str(strategy)
            .map_err(|e| PolicyError::malformed(format!("{field}[strategy]"), e))?;
        let required = map
            .get_bool("required", &format!("{field}[required]"))?
            .unwrap_or(false);
        Ok(Self::new(
            &scalar_text(name),
            &scalar_text(value),
            strategy,
            required,
        ))
    }
}

/// 名称与值允许是任意标量，按其文本形式拼接。
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 解析整组规则。
pub fn parse_env_rules(raw: &[Value], field: &str) -> Result<Vec<EnvironmentRule>> {
    raw.iter()
        .map(|rule| EnvironmentRule::from_raw(rule, field))
        .collect()
}

/// 合并注入规则：只有当已有规则中没有同名变量时才追加（先写者优先）。
pub fn merge_extra_rules(
    rules: &[EnvironmentRule],
    extra: &[EnvironmentRule],
) -> Vec<EnvironmentRule> {
    let mut out = rules.to_vec();
    let mut names: HashSet<String> = rules.iter().map(|r| r.name().to_string()).collect();
    for rule in extra {
        if names.insert(rule.name().to_string()) {
            out.push(rule.clone());
        }
    }
    out
}

/// 已编译的策略规则集合，用于判断候选规则能否通过该策略。
///
/// 字符串候选：精确命中字符串规则，或被任一正则规则搜索命中即可。
/// 正则候选：必须与某条正则规则逐字相同，不做正则之间的模糊比较。
#[derive(Debug)]
pub struct RuleMatcher {
    strings: HashSet<String>,
    regex_patterns: HashSet<String>,
    regexes: Vec<Regex>,
    required: Vec<EnvironmentRule>,
}

impl RuleMatcher {
    pub fn new(policy_rules: &[EnvironmentRule]) -> Result<Self> {
        let mut strings = HashSet::new();
        let mut regex_patterns = HashSet::new();
        let mut regexes = Vec::new();
        for rule in policy_rules {
            match rule.strategy {
                EnvStrategy::String => {
                    strings.insert(rule.pattern.clone());
                }
                EnvStrategy::Re2 => {
                    if regex_patterns.insert(rule.pattern.clone()) {
                        regexes.push(Regex::new(&rule.pattern)?);
                    }
                }
            }
        }
        let required = policy_rules.iter().filter(|r| r.required).cloned().collect();
        Ok(Self {
            strings,
            regex_patterns,
            regexes,
            required,
        })
    }

    pub fn matches(&self, candidate: &EnvironmentRule) -> bool {
        match candidate.strategy {
            EnvStrategy::String => {
                self.strings.contains(&candidate.pattern)
                    || self.regexes.iter().any(|re| re.is_match(&candidate.pattern))
            }
            EnvStrategy::Re2 => self.regex_patterns.contains(&candidate.pattern),
        }
    }

    /// 候选规则集中不被策略允许的规则，以及策略要求却缺失的规则，逐条给出原因。
    pub fn violations(&self, candidates: &[EnvironmentRule]) -> Vec<String> {
        let mut reasons = Vec::new();
        for candidate in candidates {
            if self.matches(candidate) {
                continue;
            }
            let reason = match candidate.strategy {
                EnvStrategy::String => format!(
                    "environment variable with rule '{}' does not match strings or regex in policy rules",
                    candidate.pattern
                ),
                EnvStrategy::Re2 => format!(
                    "environment variable with rule '{}' is not in the policy",
                    candidate.pattern
                ),
            };
            reasons.push(reason);
        }
        for rule in &self.required {
            if !required_rule_present(rule, candidates) {
                reasons.push(format!(
                    "required environment variable with rule '{}' is missing",
                    rule.pattern
                ));
            }
        }
        reasons
    }
}

fn required_rule_present(rule: &EnvironmentRule, candidates: &[EnvironmentRule]) -> bool {
    if candidates.iter().any(|c| c.pattern == rule.pattern) {
        return true;
    }
    match rule.strategy {
        EnvStrategy::String => false,
        EnvStrategy::Re2 => Regex::new(&rule.pattern)
            .map(|re| {
                candidates
                    .iter()
                    .any(|c| c.strategy == EnvStrategy::String && re.is_match(&c.pattern))
            })
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn string_rule(name: &str, value: &str) -> EnvironmentRule {
        EnvironmentRule::new(name, value, EnvStrategy::String, false)
    }

    fn regex_rule(name: &str, value: &str) -> EnvironmentRule {
        EnvironmentRule::new(name, value, EnvStrategy::Re2, false)
    }

    #[test]
    fn from_raw_builds_pattern_and_defaults_required() {
        let rule = EnvironmentRule::from_raw(
            &json!({"Name": "PATH", "value": "/usr/bin", "STRATEGY": "string"}),
            "env",
        )
        .unwrap();
        assert_eq!(rule.pattern, "PATH=/usr/bin");
        assert_eq!(rule.strategy, EnvStrategy::String);
        assert!(!rule.required);
        assert_eq!(rule.name(), "PATH");
    }

    #[test]
    fn from_raw_requires_name_value_and_strategy() {
        for raw in [
            json!({"value": "x", "strategy": "string"}),
            json!({"name": "A", "strategy": "string"}),
            json!({"name": "A", "value": "x"}),
        ] {
            let err = EnvironmentRule::from_raw(&raw, "env").unwrap_err();
            assert!(matches!(err, PolicyError::MalformedInput(_)));
        }
    }

    #[test]
    fn from_raw_rejects_unknown_strategy() {
        let err = EnvironmentRule::from_raw(
            &json!({"name": "A", "value": "x", "strategy": "glob"}),
            "env",
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::MalformedInput(_)));
    }

    #[test]
    fn merge_keeps_first_writer() {
        let rules = vec![string_rule("TERM", "vt100")];
        let extra = vec![
            string_rule("TERM", "xterm"),
            regex_rule("HOSTNAME", ".+"),
            regex_rule("HOSTNAME", ".*"),
        ];
        let merged = merge_extra_rules(&rules, &extra);
        let patterns: Vec<_> = merged.iter().map(|r| r.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["TERM=vt100", "HOSTNAME=.+"]);
    }

    #[test]
    fn string_candidate_matches_exact_or_regex() {
        let matcher = RuleMatcher::new(&[
            string_rule("PATH", "/usr/bin"),
            regex_rule("HOSTNAME", ".+"),
        ])
        .unwrap();
        assert!(matcher.matches(&string_rule("PATH", "/usr/bin")));
        assert!(matcher.matches(&string_rule("HOSTNAME", "box-1")));
        assert!(!matcher.matches(&string_rule("PATH", "/other")));
    }

    #[test]
    fn regex_candidate_requires_verbatim_pattern() {
        let matcher = RuleMatcher::new(&[regex_rule("FOO", ".*")]).unwrap();
        assert!(matcher.matches(&regex_rule("FOO", ".*")));
        assert!(!matcher.matches(&regex_rule("FOO", ".+")));
    }

    #[test]
    fn matching_is_idempotent() {
        let matcher = RuleMatcher::new(&[regex_rule("HOSTNAME", ".+")]).unwrap();
        let candidate = string_rule("HOSTNAME", "a");
        assert!(matcher.matches(&candidate));
        assert!(matcher.matches(&candidate));
    }

    #[test]
    fn violations_report_unmatched_and_missing_required() {
        let mut path = string_rule("PATH", "/usr/bin");
        path.required = true;
        let matcher = RuleMatcher::new(&[path]).unwrap();

        let reasons = matcher.violations(&[string_rule("PATH", "/other")]);
        assert_eq!(reasons.len(), 2);
        assert_eq!(
            reasons[0],
            "environment variable with rule 'PATH=/other' does not match strings or regex in policy rules"
        );
        assert!(reasons[1].contains("'PATH=/usr/bin' is missing"));

        assert!(matcher.violations(&[string_rule("PATH", "/usr/bin")]).is_empty());
    }
}
