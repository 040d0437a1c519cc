use thiserror::Error;

/// Errors raised while validating object identities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid object reference: {0}")]
    InvalidReference(String),

    #[error("Invalid api version: {0}")]
    InvalidApiVersion(String),
}

impl CoreError {
    pub fn invalid_reference(message: impl Into<String>) -> Self {
        Self::InvalidReference(message.into())
    }

    pub fn invalid_api_version(api_version: impl Into<String>) -> Self {
        Self::InvalidApiVersion(api_version.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::invalid_reference("name is required");
        assert_eq!(err.to_string(), "Invalid object reference: name is required");

        let err = CoreError::invalid_api_version("a/b/c");
        assert_eq!(err.to_string(), "Invalid api version: a/b/c");
    }
}
