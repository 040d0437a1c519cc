//! Store types: resource descriptors and patch types.

use patchlock_core::{GroupVersion, GroupVersionKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Resource descriptor returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResource {
    /// Plural resource name, e.g. `deployments`. Subresources contain a `/`.
    pub name: String,
    /// Whether objects of this resource live in a namespace.
    pub namespaced: bool,
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ApiResource {
    pub fn new(
        gvk: &GroupVersionKind,
        name: impl Into<String>,
        namespaced: bool,
    ) -> Self {
        Self {
            name: name.into(),
            namespaced,
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::new(&self.group, &self.version, &self.kind)
    }

    pub fn group_version(&self) -> GroupVersion {
        GroupVersion::new(&self.group, &self.version)
    }

    /// Returns true if this descriptor is a subresource such as `deployments/status`.
    pub fn is_subresource(&self) -> bool {
        self.name.contains('/')
    }

    /// Scopes a namespace to this resource: `None` for cluster-scoped resources.
    pub fn scope<'a>(&self, namespace: &'a str) -> Option<&'a str> {
        self.namespaced.then_some(namespace)
    }
}

/// Patch wire conventions accepted by the store's patch endpoint.
///
/// Deserializes through [`FromStr`], so an empty string is a strategic merge patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum PatchType {
    /// RFC 6902 JSON patch
    #[serde(rename = "application/json-patch+json")]
    JsonPatch,
    /// RFC 7386 JSON merge patch
    #[serde(rename = "application/merge-patch+json")]
    MergePatch,
    /// Strategic merge patch
    #[default]
    #[serde(rename = "application/strategic-merge-patch+json")]
    StrategicMergePatch,
    /// Server-side apply
    #[serde(rename = "application/apply-patch+yaml")]
    ApplyPatch,
}

impl PatchType {
    /// Returns the content type sent to the patch endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchType::JsonPatch => "application/json-patch+json",
            PatchType::MergePatch => "application/merge-patch+json",
            PatchType::StrategicMergePatch => "application/strategic-merge-patch+json",
            PatchType::ApplyPatch => "application/apply-patch+yaml",
        }
    }
}

impl fmt::Display for PatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PatchType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "application/json-patch+json" => Ok(PatchType::JsonPatch),
            "application/merge-patch+json" => Ok(PatchType::MergePatch),
            "" | "application/strategic-merge-patch+json" => Ok(PatchType::StrategicMergePatch),
            "application/apply-patch+yaml" => Ok(PatchType::ApplyPatch),
            other => Err(StoreError::invalid_patch(format!(
                "unsupported patch type: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for PatchType {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
