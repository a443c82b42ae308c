//! Error types for the courier-storage crate.
//!
//! Storage failures come in three shapes: rejections a peer should see
//! ([`DeliveryError::Rejected`]), backend failures that end the transaction
//! ([`StoreError`]), and setup problems ([`ConfigError`]).

use std::{io, path::PathBuf};

use courier_common::SmtpError;
use thiserror::Error;

/// Failures reported by a [`MailStore`](crate::MailStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No such account: {0}")]
    NoSuchAccount(String),

    #[error("No such mailbox {mailbox} for account {account}")]
    NoSuchMailbox { account: String, mailbox: String },

    #[error("Message of {size} bytes exceeds the limit of {limit} bytes")]
    MessageTooLarge { size: u64, limit: u32 },

    /// The backend delivery handle was used out of order.
    #[error("Invalid delivery state: {0}")]
    InvalidState(&'static str),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// The account or its mailbox does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchAccount(_) | Self::NoSuchMailbox { .. })
    }
}

/// Errors from a [`DeliveryTransaction`](crate::DeliveryTransaction).
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// This recipient is refused; the rest of the transaction is unaffected.
    #[error(transparent)]
    Rejected(#[from] SmtpError),

    /// The transaction cannot continue and must be aborted.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Delivery transaction misuse: {0}")]
    InvalidState(&'static str),

    #[error("Invalid account name: {0}")]
    InvalidAccount(String),

    #[error("Storage setup failed: {0}")]
    Setup(String),
}

impl DeliveryError {
    #[must_use]
    pub const fn rejection(&self) -> Option<&SmtpError> {
        match self {
            Self::Rejected(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl From<ConfigError> for DeliveryError {
    fn from(err: ConfigError) -> Self {
        Self::Setup(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Storage driver must be set")]
    MissingDriver,

    #[error("Unknown storage driver: {0}")]
    UnknownDriver(String),

    #[error("auth_domains must be set if auth_per_domain is used")]
    MissingAuthDomains,

    #[error("Unable to create blob store at {path}: {source}")]
    BlobStore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid storage configuration: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use courier_common::{EnhancedCode, Status};

    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(StoreError::NoSuchAccount(String::from("bob")).is_not_found());
        assert!(
            StoreError::NoSuchMailbox {
                account: String::from("bob"),
                mailbox: String::from("INBOX"),
            }
            .is_not_found()
        );
        assert!(!StoreError::Backend(String::from("disk full")).is_not_found());
        assert!(!StoreError::MessageTooLarge { size: 10, limit: 5 }.is_not_found());
    }

    #[test]
    fn test_rejection() {
        let err = DeliveryError::from(SmtpError::no_such_user());
        let rejection = err.rejection().expect("rejection");
        assert_eq!(rejection.status, Status::Error);
        assert_eq!(rejection.enhanced, EnhancedCode::NO_SUCH_MAILBOX);

        let err = DeliveryError::from(StoreError::Backend(String::from("gone")));
        assert!(!err.is_rejection());
        assert_eq!(err.to_string(), "Storage backend error: gone");
    }
}
