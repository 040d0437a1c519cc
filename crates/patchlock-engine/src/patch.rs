//! Locked patch definitions.
//!
//! A [`LockedPatch`] is the unit of configuration for one engine instance:
//! the source references whose values feed the template, the target the
//! rendered patch is applied to, the patch type and the template itself.
//!
//! ```yaml
//! sourceObjectRefs:
//!   - apiVersion: v1
//!     kind: ConfigMap
//!     namespace: prod
//!     name: settings
//!     fieldPath: data.replicas
//! targetObjectRef:
//!   apiVersion: apps/v1
//!   kind: Deployment
//!   namespace: prod
//!   name: web
//! patchType: application/strategic-merge-patch+json
//! patchTemplate: |
//!   spec:
//!     replicas: {{ index . 0 }}
//! ```

use patchlock_core::ObjectReference;
use patchlock_store::PatchType;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedPatch {
    /// Objects whose extracted values are passed to the template, in order.
    #[serde(default)]
    pub source_object_refs: Vec<ObjectReference>,
    /// Object the patch is applied to.
    pub target_object_ref: ObjectReference,
    /// Defaults to strategic merge.
    #[serde(default)]
    pub patch_type: PatchType,
    pub patch_template: String,
}

impl LockedPatch {
    pub fn new(
        target_object_ref: ObjectReference,
        patch_type: PatchType,
        patch_template: impl Into<String>,
    ) -> Self {
        Self {
            source_object_refs: Vec::new(),
            target_object_ref,
            patch_type,
            patch_template: patch_template.into(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: ObjectReference) -> Self {
        self.source_object_refs.push(source);
        self
    }

    /// Parses a definition from YAML or JSON.
    pub fn from_yaml(text: &str) -> Result<Self, EngineError> {
        let patch: Self = serde_yaml::from_str(text)
            .map_err(|e| EngineError::InvalidDefinition(e.to_string()))?;
        patch.validate()?;
        Ok(patch)
    }

    /// Identity of the engine instance: the target reference's string form.
    pub fn key(&self) -> String {
        self.target_object_ref.to_string()
    }

    /// Target first, then sources in order.
    pub fn references(&self) -> impl Iterator<Item = &ObjectReference> {
        std::iter::once(&self.target_object_ref).chain(self.source_object_refs.iter())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for reference in self.references() {
            reference
                .validate()
                .map_err(|source| EngineError::InvalidReference {
                    reference: reference.clone(),
                    source,
                })?;
        }
        if self.patch_template.trim().is_empty() {
            return Err(EngineError::InvalidDefinition(
                "patchTemplate must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = r#"
sourceObjectRefs:
  - apiVersion: v1
    kind: ConfigMap
    namespace: prod
    name: settings
    fieldPath: data.replicas
targetObjectRef:
  apiVersion: apps/v1
  kind: Deployment
  namespace: prod
  name: web
patchTemplate: |
  spec:
    replicas: {{ index . 0 }}
"#;

    #[test]
    fn test_from_yaml() {
        let patch = LockedPatch::from_yaml(DEFINITION).unwrap();
        assert_eq!(patch.patch_type, PatchType::StrategicMergePatch);
        assert_eq!(patch.source_object_refs.len(), 1);
        assert_eq!(patch.source_object_refs[0].field_path, "data.replicas");
        assert_eq!(patch.key(), "apps/v1, Kind=Deployment, prod/web");
    }

    #[test]
    fn test_patch_type_wire_names() {
        let json = serde_json::json!({
            "targetObjectRef": {"apiVersion": "v1", "kind": "Service", "name": "s"},
            "patchType": "application/json-patch+json",
            "patchTemplate": "[]"
        });
        let patch: LockedPatch = serde_json::from_value(json).unwrap();
        assert_eq!(patch.patch_type, PatchType::JsonPatch);
        assert!(patch.source_object_refs.is_empty());
    }

    #[test]
    fn test_empty_patch_type_is_strategic_merge() {
        let yaml = "targetObjectRef:\n  apiVersion: v1\n  kind: Service\n  name: s\npatchType: \"\"\npatchTemplate: \"{}\"\n";
        let patch = LockedPatch::from_yaml(yaml).unwrap();
        assert_eq!(patch.patch_type, PatchType::StrategicMergePatch);
    }

    #[test]
    fn test_validate_rejects_bad_reference() {
        let patch = LockedPatch::new(
            ObjectReference::new("apps/v1", "Deployment", "prod", ""),
            PatchType::MergePatch,
            "{}",
        );
        assert!(matches!(
            patch.validate().unwrap_err(),
            EngineError::InvalidReference { .. }
        ));
    }

    #[test]
    fn test_validate_rejects_empty_template() {
        let patch = LockedPatch::new(
            ObjectReference::new("apps/v1", "Deployment", "prod", "web"),
            PatchType::MergePatch,
            "  ",
        );
        assert!(matches!(
            patch.validate().unwrap_err(),
            EngineError::InvalidDefinition(_)
        ));
    }

    #[test]
    fn test_references_order() {
        let patch = LockedPatch::new(
            ObjectReference::new("apps/v1", "Deployment", "prod", "web"),
            PatchType::MergePatch,
            "{}",
        )
        .with_source(ObjectReference::new("v1", "ConfigMap", "prod", "a"));
        let names: Vec<&str> = patch.references().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["web", "a"]);
    }
}
