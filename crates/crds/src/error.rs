//! CRD helper errors

use thiserror::Error;

/// Errors raised when a custom resource is missing data the provider relies on
#[derive(Debug, Error)]
pub enum CrdError {
    /// A required label is absent
    #[error("{kind} {name} is missing label {label}")]
    MissingLabel {
        kind: &'static str,
        name: String,
        label: &'static str,
    },

    /// A required field is absent or empty
    #[error("{kind} {name}: {field} is not set")]
    MissingField {
        kind: &'static str,
        name: String,
        field: &'static str,
    },
}
