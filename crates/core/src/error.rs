use crate::constants::{CANCELLED_MESSAGE, INTERNAL_ERROR_MESSAGE};
use crate::notary::NotarizationError;
use lakeset_acl::AclError;
use lakeset_hashing::HashError;
use lakeset_store::StoreError;
use lakeset_types::{AccessId, DatasetId};
use std::path::PathBuf;

/// How the creation pipeline reacts to an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Expected failure; its message is safe to show to users.
    Recognized,
    /// A stop was requested.
    Cancelled,
    /// Anything else; logged in full, reported with a generic message.
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("dataset {0} not found")]
    DatasetNotFound(DatasetId),
    #[error("dataset {0} has been invalidated")]
    DatasetInvalidated(DatasetId),
    #[error("access {0} not found")]
    AccessNotFound(AccessId),
    #[error("access {0} is already closed")]
    AccessClosed(AccessId),
    #[error("path '{path}' is not inside {root}", root = root.display())]
    PathTraversal { path: String, root: PathBuf },
    #[error(
        "study {study} belongs to subproject '{found}', not to the dataset project '{expected}'"
    )]
    SubprojectMismatch {
        study: String,
        expected: String,
        found: String,
    },
    #[error("authentication with the notarization service failed: {0}")]
    Authentication(String),
    #[error("notarization failed: {0}")]
    Notarization(NotarizationError),
    #[error("failed to change permissions: {0}")]
    Acl(#[from] AclError),
    #[error("Canceled by user.")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("hashing failed: {0}")]
    Hash(#[from] HashError),
    #[error("I/O error on {path}: {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode or decode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<NotarizationError> for DatasetError {
    fn from(error: NotarizationError) -> Self {
        match error {
            NotarizationError::Login(message) => Self::Authentication(message),
            other => Self::Notarization(other),
        }
    }
}

impl DatasetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Store(_) | Self::Hash(_) | Self::Io { .. } | Self::Json(_) => {
                ErrorKind::Internal
            }
            _ => ErrorKind::Recognized,
        }
    }

    /// Message recorded on the creation checkpoint.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Recognized => self.to_string(),
            ErrorKind::Cancelled => CANCELLED_MESSAGE.to_owned(),
            ErrorKind::Internal => INTERNAL_ERROR_MESSAGE.to_owned(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

pub type DatasetResult<T> = std::result::Result<T, DatasetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_hide_their_detail() {
        let error = DatasetError::Io {
            path: "/secret/location".into(),
            source: std::io::Error::other("disk on fire"),
        };
        assert_eq!(error.kind(), ErrorKind::Internal);
        assert_eq!(error.user_message(), INTERNAL_ERROR_MESSAGE);
    }

    #[test]
    fn recognized_errors_keep_their_message() {
        let error = DatasetError::SubprojectMismatch {
            study: "st-1".into(),
            expected: "alpha".into(),
            found: "beta".into(),
        };
        assert_eq!(error.kind(), ErrorKind::Recognized);
        assert!(error.user_message().contains("'beta'"));
    }

    #[test]
    fn login_failures_are_authentication_errors() {
        let error: DatasetError = NotarizationError::Login("bad password".into()).into();
        assert!(matches!(error, DatasetError::Authentication(_)));
        assert_eq!(error.kind(), ErrorKind::Recognized);
    }

    #[test]
    fn cancellation_uses_the_fixed_message() {
        assert_eq!(DatasetError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(DatasetError::Cancelled.user_message(), "Canceled by user.");
    }
}
