use super::error::K8sError;
use kube::core::{DynamicObject, GroupVersion, GroupVersionKind, TypeMeta};
use std::str::FromStr;

/// Returns true when the error is the API server answering `404 Not Found`.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

pub fn get_type_meta(obj: &DynamicObject) -> Result<TypeMeta, K8sError> {
    obj.types
        .clone()
        .ok_or_else(|| K8sError::MissingField("apiVersion/kind".to_string()))
}

pub fn get_name(obj: &DynamicObject) -> Result<String, K8sError> {
    obj.metadata
        .name
        .clone()
        .ok_or_else(|| K8sError::MissingField("metadata.name".to_string()))
}

pub fn gvk_from_type_meta(tm: &TypeMeta) -> Result<GroupVersionKind, K8sError> {
    GroupVersion::from_str(tm.api_version.as_str())
        .map(|gv| gv.with_kind(tm.kind.as_str()))
        .map_err(|_| K8sError::MissingKind(tm.api_version.clone(), tm.kind.clone()))
}

/// Looks up the `status` of the condition with the provided type in `status.conditions`.
pub fn condition_status(obj: &DynamicObject, condition_type: &str) -> Option<String> {
    obj.data["status"]["conditions"]
        .as_array()?
        .iter()
        .find(|c| c["type"].as_str() == Some(condition_type))
        .and_then(|c| c["status"].as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    fn hosted_cluster(conditions: serde_json::Value) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "hypershift.openshift.io/v1beta1".to_string(),
                kind: "HostedCluster".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some("hc".to_string()),
                ..Default::default()
            },
            data: serde_json::json!({ "status": { "conditions": conditions } }),
        }
    }

    #[test]
    fn test_gvk_from_type_meta() {
        let gvk = gvk_from_type_meta(&TypeMeta {
            api_version: "velero.io/v1".to_string(),
            kind: "Backup".to_string(),
        })
        .unwrap();
        assert_eq!(gvk, GroupVersionKind::gvk("velero.io", "v1", "Backup"));

        let core = gvk_from_type_meta(&TypeMeta {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
        })
        .unwrap();
        assert_eq!(core, GroupVersionKind::gvk("", "v1", "ConfigMap"));
    }

    #[test]
    fn test_condition_status() {
        let obj = hosted_cluster(serde_json::json!([
            {"type": "Degraded", "status": "False"},
            {"type": "Available", "status": "True"},
        ]));
        assert_eq!(condition_status(&obj, "Available").as_deref(), Some("True"));
        assert_eq!(condition_status(&obj, "Progressing"), None);

        let empty = hosted_cluster(serde_json::Value::Null);
        assert_eq!(condition_status(&empty, "Available"), None);
    }

    #[test]
    fn test_missing_fields() {
        let obj = DynamicObject {
            types: None,
            metadata: ObjectMeta::default(),
            data: serde_json::Value::Null,
        };
        assert!(matches!(get_type_meta(&obj), Err(K8sError::MissingField(_))));
        assert!(matches!(get_name(&obj), Err(K8sError::MissingField(_))));
    }
}
