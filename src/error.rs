//! Errors raised while resolving configuration and routing requests.

use std::{io, path::PathBuf};

use crate::resource::OperationKind;

/// The error type for every fallible operation in this crate.
///
/// Watch decoding never returns this type; malformed watch lines are
/// surfaced in-band as [`WatchEvent::Error`](crate::watch::WatchEvent::Error).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The kube config file could not be read.
    #[error("failed to read kube config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The kube config document is structurally invalid.
    #[error("invalid kube config: {0}")]
    ConfigParse(String),

    /// No context was requested and the document has no current context.
    #[error("no context name was given and the kube config does not set current-context")]
    MissingContext,

    #[error("kube config has no context named '{0}'")]
    UnknownContext(String),

    #[error("context '{context}' references unknown cluster '{cluster}'")]
    UnknownCluster { context: String, cluster: String },

    #[error("context '{context}' references unknown user '{user}'")]
    UnknownUser { context: String, user: String },

    /// Certificate or token material is missing or unreadable.
    #[error("cannot resolve {subject}: {reason}")]
    CredentialResolution { subject: String, reason: String },

    /// In-cluster service account material is not available.
    #[error("pod service account identity is unavailable: {0}")]
    AmbientIdentityUnavailable(String),

    /// The resource declares no template for the operation with the supplied parameters.
    #[error("resource kind '{kind}' does not support {operation:?} with the supplied path parameters")]
    UnsupportedOperation {
        kind: String,
        operation: OperationKind,
    },

    /// A path parameter would not stay a single URL path segment.
    #[error("path parameter '{param}' cannot be '{value}'")]
    InvalidPathParam { param: String, value: String },

    #[error("invalid default namespace '{0}'")]
    InvalidNamespace(String),

    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

impl Error {
    pub(crate) fn credential(subject: impl Into<String>, reason: impl ToString) -> Self {
        Self::CredentialResolution {
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the caller should fall back to another configuration source.
    pub fn is_ambient_unavailable(&self) -> bool {
        matches!(self, Self::AmbientIdentityUnavailable(_))
    }
}

/// Result alias defaulting to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_errors_name_the_missing_reference() {
        let err = Error::UnknownCluster {
            context: "dev".into(),
            cluster: "c9".into(),
        };
        assert_eq!(
            err.to_string(),
            "context 'dev' references unknown cluster 'c9'"
        );

        let err = Error::UnknownContext("staging".into());
        assert!(err.to_string().contains("'staging'"));
    }

    #[test]
    fn only_ambient_errors_are_recoverable() {
        assert!(Error::AmbientIdentityUnavailable("no token".into()).is_ambient_unavailable());
        assert!(!Error::MissingContext.is_ambient_unavailable());
    }
}
