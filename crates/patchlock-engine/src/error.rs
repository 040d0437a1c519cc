//! Engine error types.
//!
//! Construction failures ([`EngineError`]) are fatal to an engine instance.
//! Everything that can go wrong inside a reconcile cycle is a
//! [`ReconcileError`], which records the failure and is handed back to the
//! work queue for a rate-limited retry.

use std::fmt;

use patchlock_core::{CoreError, ObjectReference};
use patchlock_store::StoreError;

/// Errors from evaluating a field path against an object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    /// The expression is not one of the accepted path syntaxes.
    #[error("invalid field path {path:?}: {message}")]
    Parse { path: String, message: String },

    /// The path selected nothing.
    #[error("field path {path} returned empty result")]
    NotFound { path: String },
}

impl ExtractError {
    pub fn parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }
}

/// Errors from the template engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("template: {name}:{line}: {message}")]
    Parse {
        name: String,
        line: usize,
        message: String,
    },

    #[error("template: {name}:{line}: executing \"{name}\" at <{action}>: {message}")]
    Execute {
        name: String,
        line: usize,
        action: String,
        message: String,
    },

    /// The rendered text is not a structured document.
    #[error("error converting YAML to JSON: {0}")]
    Conversion(String),
}

/// Errors from resolving an object reference against the store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    InvalidReference(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }

    pub fn is_discovery_miss(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_discovery_miss())
    }
}

/// Reconcile pipeline stage where a cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileStage {
    Resolving,
    Extracting,
    Rendering,
    Applying,
}

impl ReconcileStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::Extracting => "extracting",
            Self::Rendering => "rendering",
            Self::Applying => "applying",
        }
    }
}

impl fmt::Display for ReconcileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed reconcile cycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReconcileError {
    #[error("unable to retrieve {reference}: {source}")]
    Resolve {
        reference: ObjectReference,
        source: ResolveError,
    },

    #[error("unable to retrieve field {field_path:?} from {reference}: {source}")]
    Extract {
        reference: ObjectReference,
        field_path: String,
        source: ExtractError,
    },

    #[error("unable to render patch template: {0}")]
    Render(#[source] TemplateError),

    #[error("unable to convert rendered patch: {0}")]
    Convert(#[source] TemplateError),

    #[error("unable to apply patch to {reference}: {source}")]
    Apply {
        reference: ObjectReference,
        source: StoreError,
    },
}

impl ReconcileError {
    pub fn stage(&self) -> ReconcileStage {
        match self {
            Self::Resolve { .. } => ReconcileStage::Resolving,
            Self::Extract { .. } => ReconcileStage::Extracting,
            Self::Render(_) | Self::Convert(_) => ReconcileStage::Rendering,
            Self::Apply { .. } => ReconcileStage::Applying,
        }
    }

    /// The object reference involved, if the failure concerns one.
    pub fn reference(&self) -> Option<&ObjectReference> {
        match self {
            Self::Resolve { reference, .. }
            | Self::Extract { reference, .. }
            | Self::Apply { reference, .. } => Some(reference),
            Self::Render(_) | Self::Convert(_) => None,
        }
    }
}

/// Errors that prevent an engine instance from starting.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid reference {reference}: {source}")]
    InvalidReference {
        reference: ObjectReference,
        source: CoreError,
    },

    #[error("invalid locked patch: {0}")]
    InvalidDefinition(String),

    #[error("unable to watch {reference}: {source}")]
    Watch {
        reference: ObjectReference,
        source: StoreError,
    },
}

/// Errors from delivering a status change notification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("status notification channel closed")]
    Closed,

    #[error("status notification channel full")]
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> ObjectReference {
        ObjectReference::new("v1", "ConfigMap", "default", "settings")
    }

    #[test]
    fn test_stage_mapping() {
        let err = ReconcileError::Resolve {
            reference: reference(),
            source: StoreError::not_found("configmaps", "default", "settings").into(),
        };
        assert_eq!(err.stage(), ReconcileStage::Resolving);
        assert!(err.to_string().contains("configmaps \"settings\" not found"));

        let err = ReconcileError::Convert(TemplateError::Conversion("bad".into()));
        assert_eq!(err.stage(), ReconcileStage::Rendering);
        assert!(err.reference().is_none());
    }

    #[test]
    fn test_resolve_error_predicates() {
        let err: ResolveError = StoreError::kind_not_found("v1", "Widget").into();
        assert!(err.is_discovery_miss());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_template_error_display() {
        let err = TemplateError::Execute {
            name: "patch".into(),
            line: 2,
            action: "index . 5".into(),
            message: "error calling index: index out of range: 5".into(),
        };
        assert_eq!(
            err.to_string(),
            "template: patch:2: executing \"patch\" at <index . 5>: error calling index: index out of range: 5"
        );
    }
}
