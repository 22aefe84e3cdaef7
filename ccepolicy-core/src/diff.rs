//! Structural diff over JSON values, reported in policy terms.
//!
//! Lists are compared by position. The readable form groups changes by category and
//! by the first field name on the change path, and labels the two sides
//! `policy_value` (existing) and `tested_value` (regenerated).

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    ValuesChanged,
    TypeChanged,
    ItemAdded,
    ItemRemoved,
    KeyAdded,
    KeyRemoved,
}

impl ChangeKind {
    /// Category name in the readable diff.
    pub fn category(&self) -> &'static str {
        match self {
            ChangeKind::ValuesChanged => "values_changed",
            ChangeKind::TypeChanged => "type_changes",
            ChangeKind::ItemAdded => "values_added",
            ChangeKind::ItemRemoved => "values_removed",
            ChangeKind::KeyAdded => "dictionary_item_added",
            ChangeKind::KeyRemoved => "dictionary_item_removed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    pub path: Vec<PathSegment>,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

impl Change {
    /// First field name on the path, `root` when the change is at the top.
    pub fn group(&self) -> &str {
        self.path
            .iter()
            .find_map(|segment| match segment {
                PathSegment::Key(key) => Some(key.as_str()),
                PathSegment::Index(_) => None,
            })
            .unwrap_or("root")
    }

    fn entry(&self) -> Value {
        match self.kind {
            ChangeKind::ValuesChanged | ChangeKind::TypeChanged => {
                json!({"old_value": self.old, "new_value": self.new})
            }
            ChangeKind::ItemAdded | ChangeKind::KeyAdded => self.new.clone().unwrap_or(Value::Null),
            ChangeKind::ItemRemoved | ChangeKind::KeyRemoved => {
                self.old.clone().unwrap_or(Value::Null)
            }
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("root")?;
        for segment in &self.path {
            match segment {
                PathSegment::Key(key) => write!(f, "['{key}']")?,
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        write!(f, " {}", self.kind.category())
    }
}

/// All differences between `old` and `new`.
pub fn structural_diff(old: &Value, new: &Value) -> Vec<Change> {
    let mut changes = Vec::new();
    let mut path = Vec::new();
    diff_into(old, new, &mut path, &mut changes);
    changes
}

fn diff_into(old: &Value, new: &Value, path: &mut Vec<PathSegment>, out: &mut Vec<Change>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, old_value) in a {
                path.push(PathSegment::Key(key.clone()));
                match b.get(key) {
                    Some(new_value) => diff_into(old_value, new_value, path, out),
                    None => out.push(change(ChangeKind::KeyRemoved, path, Some(old_value), None)),
                }
                path.pop();
            }
            for (key, new_value) in b {
                if !a.contains_key(key) {
                    path.push(PathSegment::Key(key.clone()));
                    out.push(change(ChangeKind::KeyAdded, path, None, Some(new_value)));
                    path.pop();
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for idx in 0..a.len().max(b.len()) {
                path.push(PathSegment::Index(idx));
                match (a.get(idx), b.get(idx)) {
                    (Some(x), Some(y)) => diff_into(x, y, path, out),
                    (Some(x), None) => out.push(change(ChangeKind::ItemRemoved, path, Some(x), None)),
                    (None, Some(y)) => out.push(change(ChangeKind::ItemAdded, path, None, Some(y))),
                    (None, None) => {}
                }
                path.pop();
            }
        }
        (a, b) if a == b => {}
        (a, b) if same_type(a, b) => {
            out.push(change(ChangeKind::ValuesChanged, path, Some(a), Some(b)))
        }
        (a, b) => out.push(change(ChangeKind::TypeChanged, path, Some(a), Some(b))),
    }
}

fn same_type(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn change(kind: ChangeKind, path: &[PathSegment], old: Option<&Value>, new: Option<&Value>) -> Change {
    Change {
        kind,
        path: path.to_vec(),
        old: old.cloned(),
        new: new.cloned(),
    }
}

/// `{category: {group: [entries]}}`, with value labels renamed to policy terms.
pub fn readable_diff(changes: &[Change]) -> Value {
    let mut grouped: BTreeMap<&str, BTreeMap<&str, Vec<Value>>> = BTreeMap::new();
    for change in changes {
        grouped
            .entry(change.kind.category())
            .or_default()
            .entry(change.group())
            .or_default()
            .push(change.entry());
    }
    let mut value = serde_json::to_value(grouped).unwrap_or(Value::Null);
    rename_value_labels(&mut value);
    value
}

/// Recursively rename `old_value`/`new_value` to `policy_value`/`tested_value`.
pub fn rename_value_labels(value: &mut Value) {
    match value {
        Value::Object(object) => {
            let renamed: Map<String, Value> = std::mem::take(object)
                .into_iter()
                .map(|(key, mut inner)| {
                    rename_value_labels(&mut inner);
                    let key = match key.as_str() {
                        "old_value" => "policy_value".to_string(),
                        "new_value" => "tested_value".to_string(),
                        _ => key,
                    };
                    (key, inner)
                })
                .collect();
            *object = renamed;
        }
        Value::Array(items) => items.iter_mut().for_each(rename_value_labels),
        _ => {}
    }
}
