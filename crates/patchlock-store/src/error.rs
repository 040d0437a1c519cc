//! Store error types.

use std::fmt;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The requested object does not exist.
    #[error("{resource} \"{name}\" not found")]
    NotFound {
        /// Plural resource name, e.g. `configmaps`.
        resource: String,
        /// Namespace of the missing object, empty for cluster-scoped resources.
        namespace: String,
        /// Name of the missing object.
        name: String,
    },

    /// Discovery has no resource for the requested kind.
    #[error("no resource found for kind {kind} in group version {group_version}")]
    KindNotFound {
        group_version: String,
        kind: String,
    },

    /// Discovery does not serve the requested group version.
    #[error("the server could not find the requested group version {group_version}")]
    GroupVersionNotFound { group_version: String },

    /// The patch body is malformed or cannot be applied to the object.
    #[error("invalid patch: {message}")]
    InvalidPatch { message: String },

    /// Optimistic concurrency failure.
    #[error("conflict on {resource} \"{name}\": {message}")]
    Conflict {
        resource: String,
        name: String,
        message: String,
    },

    /// An object with the same identity already exists.
    #[error("{resource} \"{name}\" already exists")]
    AlreadyExists { resource: String, name: String },

    /// The caller is not allowed to perform the operation.
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    /// Failed to establish a watch.
    #[error("watch error: {message}")]
    WatchError { message: String },

    /// An internal store error occurred.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl StoreError {
    #[must_use]
    pub fn not_found(
        resource: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            resource: resource.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn kind_not_found(group_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::KindNotFound {
            group_version: group_version.into(),
            kind: kind.into(),
        }
    }

    #[must_use]
    pub fn group_version_not_found(group_version: impl Into<String>) -> Self {
        Self::GroupVersionNotFound {
            group_version: group_version.into(),
        }
    }

    #[must_use]
    pub fn invalid_patch(message: impl Into<String>) -> Self {
        Self::InvalidPatch {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn conflict(
        resource: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            resource: resource.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn already_exists(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn watch_error(message: impl Into<String>) -> Self {
        Self::WatchError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for discovery misses (unknown kind or group version).
    #[must_use]
    pub fn is_discovery_miss(&self) -> bool {
        matches!(
            self,
            Self::KindNotFound { .. } | Self::GroupVersionNotFound { .. }
        )
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::AlreadyExists { .. })
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::KindNotFound { .. } | Self::GroupVersionNotFound { .. } => {
                ErrorCategory::Discovery
            }
            Self::Conflict { .. } | Self::AlreadyExists { .. } => ErrorCategory::Conflict,
            Self::InvalidPatch { .. } | Self::Forbidden { .. } => ErrorCategory::Validation,
            Self::WatchError { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of store errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Discovery,
    Conflict,
    Validation,
    Infrastructure,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Discovery => write!(f, "discovery"),
            Self::Conflict => write!(f, "conflict"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
