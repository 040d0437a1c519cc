//! Object identity types.
//!
//! An [`ObjectReference`] names one object in the store by api version, kind,
//! namespace and name, and optionally selects a sub-value through a field path.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Reference to a single object in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// Api version of the referent, e.g. `v1` or `apps/v1`.
    #[serde(default)]
    pub api_version: String,
    /// Kind of the referent, e.g. `ConfigMap`.
    #[serde(default)]
    pub kind: String,
    /// Namespace of the referent. Empty for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Name of the referent.
    #[serde(default)]
    pub name: String,
    /// Field path selecting a sub-value of the referent. Empty selects the whole object.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field_path: String,
}

impl ObjectReference {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            field_path: String::new(),
        }
    }

    /// Sets the field path.
    #[must_use]
    pub fn with_field_path(mut self, field_path: impl Into<String>) -> Self {
        self.field_path = field_path.into();
        self
    }

    /// Derives the group/version/kind of the referent.
    pub fn group_version_kind(&self) -> Result<GroupVersionKind> {
        GroupVersionKind::from_api_version_and_kind(&self.api_version, &self.kind)
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }

    /// Checks that the reference names exactly one object.
    pub fn validate(&self) -> Result<()> {
        if self.kind.is_empty() {
            return Err(CoreError::invalid_reference(format!(
                "kind is required for {self}"
            )));
        }
        if self.name.is_empty() {
            return Err(CoreError::invalid_reference(format!(
                "name is required for {self}"
            )));
        }
        self.group_version_kind().map(|_| ())
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, Kind={}, {}",
            self.api_version,
            self.kind,
            self.namespaced_name()
        )
    }
}

/// Api group and version, e.g. `apps/v1`. The core group is the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }

    /// Parses `version` or `group/version`.
    pub fn parse(api_version: &str) -> Result<Self> {
        match api_version.split_once('/') {
            None => Ok(Self::new("", api_version)),
            Some((group, version)) if !version.contains('/') => Ok(Self::new(group, version)),
            Some(_) => Err(CoreError::invalid_api_version(api_version)),
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

/// Type identity of a store object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    pub fn from_api_version_and_kind(api_version: &str, kind: &str) -> Result<Self> {
        let gv = GroupVersion::parse(api_version)?;
        Ok(Self {
            group: gv.group,
            version: gv.version,
            kind: kind.to_string(),
        })
    }

    pub fn group_version(&self) -> GroupVersion {
        GroupVersion::new(&self.group, &self.version)
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.group_version(), self.kind)
    }
}

/// Namespace and name pair. Reconcile requests are keyed by it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_version_parse() {
        assert_eq!(GroupVersion::parse("v1").unwrap(), GroupVersion::new("", "v1"));
        assert_eq!(
            GroupVersion::parse("apps/v1").unwrap(),
            GroupVersion::new("apps", "v1")
        );
        assert!(GroupVersion::parse("a/b/c").is_err());
    }

    #[test]
    fn test_group_version_display() {
        assert_eq!(GroupVersion::new("", "v1").to_string(), "v1");
        assert_eq!(GroupVersion::new("apps", "v1").to_string(), "apps/v1");
    }

    #[test]
    fn test_gvk_from_reference() {
        let r = ObjectReference::new("apps/v1", "Deployment", "default", "web");
        let gvk = r.group_version_kind().unwrap();
        assert_eq!(gvk, GroupVersionKind::new("apps", "v1", "Deployment"));
        assert_eq!(gvk.to_string(), "apps/v1, Kind=Deployment");
    }

    #[test]
    fn test_reference_display() {
        let r = ObjectReference::new("v1", "ConfigMap", "default", "settings");
        assert_eq!(r.to_string(), "v1, Kind=ConfigMap, default/settings");

        let r = ObjectReference::new("v1", "Namespace", "", "team-a");
        assert_eq!(r.to_string(), "v1, Kind=Namespace, team-a");
    }

    #[test]
    fn test_reference_validate() {
        assert!(ObjectReference::new("v1", "ConfigMap", "ns", "cm").validate().is_ok());
        assert!(ObjectReference::new("v1", "", "ns", "cm").validate().is_err());
        assert!(ObjectReference::new("v1", "ConfigMap", "ns", "").validate().is_err());
        assert!(ObjectReference::new("x/y/z", "ConfigMap", "ns", "cm").validate().is_err());
    }

    #[test]
    fn test_reference_serde_camel_case() {
        let json = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "namespace": "default",
            "name": "settings",
            "fieldPath": "data.replicas"
        });
        let r: ObjectReference = serde_json::from_value(json).unwrap();
        assert_eq!(r.api_version, "v1");
        assert_eq!(r.field_path, "data.replicas");

        let back = serde_json::to_value(ObjectReference::new("v1", "Namespace", "", "a")).unwrap();
        assert!(back.get("namespace").is_none());
        assert!(back.get("fieldPath").is_none());
    }
}
