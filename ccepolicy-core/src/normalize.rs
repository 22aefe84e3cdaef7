//! 输入规范化：读入时一次性把 JSON 对象的键转成小写，之后所有字段都按小写键查找，
//! 不再在每次访问时做大小写无关的扫描。

use crate::error::{PolicyError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 键已小写化的 JSON 对象视图。
///
/// 只规范化当前层级；嵌套对象在通过 [`NormalizedMap::get_object`] 取出时再规范化。
/// 同一个键的不同大小写写法同时出现时保留先出现的那个。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedMap {
    entries: BTreeMap<String, Value>,
}

impl NormalizedMap {
    pub fn from_object(object: &Map<String, Value>) -> Self {
        let mut entries = BTreeMap::new();
        for (key, value) in object {
            entries
                .entry(key.to_ascii_lowercase())
                .or_insert_with(|| value.clone());
        }
        Self { entries }
    }

    /// 要求 `value` 是 JSON 对象，否则报 `MalformedInput`。
    pub fn from_value(value: &Value, field: &str) -> Result<Self> {
        match value {
            Value::Object(object) => Ok(Self::from_object(object)),
            _ => Err(PolicyError::malformed(field, "must be an object")),
        }
    }

    /// 按键取值；`null` 与缺失同等对待。
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .filter(|v| !v.is_null())
    }

    /// 依次尝试多个别名，返回第一个存在的值。
    pub fn get_any(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_str(&self, key: &str, field: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(PolicyError::malformed(field, "must be a string")),
        }
    }

    pub fn get_bool(&self, key: &str, field: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(PolicyError::malformed(field, "can only be a boolean value")),
        }
    }

    pub fn get_array(&self, key: &str, field: &str) -> Result<Option<&Vec<Value>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(_) => Err(PolicyError::malformed(field, "must be a list")),
        }
    }

    pub fn get_string_list(&self, key: &str, field: &str) -> Result<Option<Vec<String>>> {
        let Some(items) = self.get_array(key, field)? else {
            return Ok(None);
        };
        items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                _ => Err(PolicyError::malformed(field, "can only be a list of strings")),
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    pub fn get_int_list(&self, key: &str, field: &str) -> Result<Option<Vec<i64>>> {
        let Some(items) = self.get_array(key, field)? else {
            return Ok(None);
        };
        items
            .iter()
            .map(|item| {
                item.as_i64()
                    .ok_or_else(|| PolicyError::malformed(field, "can only be a list of integers"))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    pub fn get_object(&self, key: &str, field: &str) -> Result<Option<NormalizedMap>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => Self::from_value(value, field).map(Some),
        }
    }
}
