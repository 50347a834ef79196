//! Settings error types.

use thiserror::Error;

/// Why settings could not be loaded or were rejected.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON or does not fit the schema.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A scalar setting is out of range.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
    /// The static directory is inconsistent.
    #[error("invalid directory entry for model {model}: {reason}")]
    Directory {
        /// Offending model UUID.
        model: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_file_keeps_the_cause() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = SettingsError::from(io_err);
        assert!(matches!(err, SettingsError::Io(_)));
        assert!(err.to_string().ends_with("denied"));
    }

    #[test]
    fn schema_mismatch_is_a_json_error() {
        let json_err =
            serde_json::from_str::<crate::WardenSettings>(r#"{"server": {"port": "high"}}"#)
                .unwrap_err();
        let err = SettingsError::from(json_err);
        assert!(err.to_string().starts_with("failed to parse settings JSON"));
    }

    #[test]
    fn directory_error_names_the_model() {
        let err = SettingsError::Directory {
            model: "22222222-2222-2222-2222-222222222222".into(),
            reason: "listed twice".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid directory entry for model 22222222-2222-2222-2222-222222222222: listed twice"
        );
    }
}
