//! Deployment template integration: read and write the base64 policy embedded in
//! container-group resources.

use crate::canonical::decode_base64;
use crate::error::{PolicyError, Result};
use crate::fragments::FragmentImport;
use crate::normalize::NormalizedMap;
use crate::scanner::extract_containers_and_fragments;
use serde_json::{Map, Value};
use tracing::warn;

pub const CONTAINER_GROUP_TYPE: &str = "Microsoft.ContainerInstance/containerGroups";
const CONFIDENTIAL_PROPERTIES: &str = "confidentialComputeProperties";
const CCE_POLICY: &str = "ccePolicy";

/// Policy content found in one container group.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingPolicy {
    pub containers: Vec<Value>,
    pub fragments: Vec<Value>,
}

/// Indices into `resources` of every container-group resource.
pub fn container_group_indices(template: &Value) -> Result<Vec<usize>> {
    let root = NormalizedMap::from_value(template, "template")?;
    let resources = root
        .get_array("resources", "template][resources")?
        .ok_or_else(|| PolicyError::malformed("template][resources", "can not be found"))?;
    let indices: Vec<usize> = resources
        .iter()
        .enumerate()
        .filter(|(_, resource)| {
            resource
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.eq_ignore_ascii_case(CONTAINER_GROUP_TYPE))
        })
        .map(|(idx, _)| idx)
        .collect();
    if indices.is_empty() {
        return Err(PolicyError::malformed(
            "template][resources",
            format!("contains no {CONTAINER_GROUP_TYPE} resource"),
        ));
    }
    Ok(indices)
}

/// Read the policy of one container group. A blank policy means the allow-all
/// policy and yields no containers with the default imports.
pub fn extract_existing_policy(group: &Value, defaults: &[FragmentImport]) -> Result<ExistingPolicy> {
    let group = NormalizedMap::from_value(group, "resources")?;
    let encoded = group
        .get_object("properties", "resources][properties")?
        .map(|props| props.get_object(CONFIDENTIAL_PROPERTIES, "properties][confidentialComputeProperties"))
        .transpose()?
        .flatten()
        .and_then(|confidential| confidential.get(CCE_POLICY).cloned());

    let encoded = match encoded {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        _ => {
            return Ok(ExistingPolicy {
                containers: Vec::new(),
                fragments: serde_json::to_value(defaults)?
                    .as_array()
                    .cloned()
                    .unwrap_or_default(),
            })
        }
    };

    let policy = decode_base64(&encoded)?;
    if serde_json::from_str::<Value>(&policy).is_ok() {
        return Err(PolicyError::MalformedInput(
            "existing policy in the template is JSON, expected rego text".to_string(),
        ));
    }
    match extract_containers_and_fragments(&policy) {
        Ok((containers, fragments)) => Ok(ExistingPolicy {
            containers,
            fragments,
        }),
        Err(e) => {
            warn!(error = %e, "existing policy could not be scanned, treating it as empty");
            Ok(ExistingPolicy {
                containers: Vec::new(),
                fragments: Vec::new(),
            })
        }
    }
}

/// Policies of every container group, in resource order.
pub fn extract_policies(template: &Value, defaults: &[FragmentImport]) -> Result<Vec<ExistingPolicy>> {
    let resources = template
        .get("resources")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    container_group_indices(template)?
        .into_iter()
        .map(|idx| extract_existing_policy(&resources[idx], defaults))
        .collect()
}

/// Write `policy` (already base64) into the `nth` container group and return the
/// updated template. Overwrite decisions belong to the caller.
pub fn inject_policy(template: &Value, nth: usize, policy: &str) -> Result<Value> {
    let indices = container_group_indices(template)?;
    let idx = *indices.get(nth).ok_or_else(|| {
        PolicyError::malformed(
            "template][resources",
            format!("has no container group at position {nth}"),
        )
    })?;

    let mut updated = template.clone();
    let resource = updated
        .get_mut("resources")
        .and_then(Value::as_array_mut)
        .and_then(|resources| resources.get_mut(idx))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| PolicyError::malformed("template][resources", "is not a list of objects"))?;
    let properties = child_object(resource, "properties")?;
    let confidential = child_object(properties, CONFIDENTIAL_PROPERTIES)?;
    confidential.insert(CCE_POLICY.to_string(), Value::String(policy.to_string()));
    Ok(updated)
}

/// Existing child object under `key` (case-insensitive), created when missing.
fn child_object<'a>(parent: &'a mut Map<String, Value>, key: &str) -> Result<&'a mut Map<String, Value>> {
    let existing = parent
        .keys()
        .find(|k| k.eq_ignore_ascii_case(key))
        .cloned()
        .unwrap_or_else(|| key.to_string());
    parent
        .entry(existing)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| PolicyError::malformed(key, "must be an object"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::encode_base64;
    use serde_json::json;

    fn template(policy: Option<&str>) -> Value {
        let mut group = json!({
            "type": "Microsoft.ContainerInstance/containerGroups",
            "name": "group",
            "properties": {"containers": []}
        });
        if let Some(policy) = policy {
            group["properties"]["confidentialComputeProperties"] = json!({"ccePolicy": policy});
        }
        json!({"resources": [{"type": "Microsoft.Storage/storageAccounts"}, group]})
    }

    #[test]
    fn blank_policy_yields_default_fragments() {
        let defaults = vec![FragmentImport::infrastructure(1)];
        let policies = extract_policies(&template(Some("")), &defaults).unwrap();
        assert_eq!(policies.len(), 1);
        assert!(policies[0].containers.is_empty());
        assert_eq!(policies[0].fragments[0]["minimum_svn"], "1");

        let policies = extract_policies(&template(None), &defaults).unwrap();
        assert_eq!(policies[0].fragments.len(), 1);
    }

    #[test]
    fn rego_policy_is_decoded_and_scanned() {
        let rego = "package policy\n\nfragments := []\n\ncontainers := [{\"id\":\"a\"}]\n";
        let policies = extract_policies(&template(Some(&encode_base64(rego))), &[]).unwrap();
        assert_eq!(policies[0].containers[0]["id"], "a");
        assert!(policies[0].fragments.is_empty());
    }

    #[test]
    fn json_policy_is_rejected() {
        let err = extract_policies(&template(Some(&encode_base64("{\"a\": 1}"))), &[]).unwrap_err();
        assert!(matches!(err, PolicyError::MalformedInput(_)));
    }

    #[test]
    fn inject_writes_fixed_path() {
        let updated = inject_policy(&template(None), 0, "cGFja2FnZQ==").unwrap();
        assert_eq!(
            updated["resources"][1]["properties"]["confidentialComputeProperties"]["ccePolicy"],
            "cGFja2FnZQ=="
        );
        assert!(inject_policy(&template(None), 1, "x").is_err());
    }

    #[test]
    fn template_without_container_groups_is_malformed() {
        let err = container_group_indices(&json!({"resources": []})).unwrap_err();
        assert!(matches!(err, PolicyError::MalformedInput(_)));
    }
}
