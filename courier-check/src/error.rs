//! Error types for the courier-check crate.

use courier_common::SmtpError;
use thiserror::Error;

/// Error returned by a check stage, or by a check's per-message initializer.
///
/// The group surfaces these verbatim; it does not wrap or reclassify them.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The check rejected the message (or recipient) with a reply code.
    #[error(transparent)]
    Rejected(#[from] SmtpError),

    /// The check observed cancellation of its scope and stopped.
    #[error("Check cancelled")]
    Cancelled,

    /// The check could not complete.
    #[error("Check failed: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CheckError {
    /// The reply to send to the peer, if this is a protocol-shaped rejection.
    #[must_use]
    pub const fn rejection(&self) -> Option<&SmtpError> {
        match self {
            Self::Rejected(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type CheckResult = Result<(), CheckError>;

/// Errors from building checks out of configuration.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown check: {0}")]
    UnknownCheck(String),

    #[error("Check already registered: {0}")]
    Duplicate(String),

    #[error("Invalid arguments for check {check}: {reason}")]
    InvalidArguments { check: String, reason: String },
}

#[cfg(test)]
mod tests {
    use courier_common::{EnhancedCode, Status};

    use super::*;

    #[test]
    fn test_rejection_passthrough() {
        let err = CheckError::from(SmtpError::new(
            Status::Error,
            EnhancedCode::SECURITY_POLICY,
            "Sender blocked",
        ));

        assert_eq!(err.to_string(), "550 5.7.1 Sender blocked");
        assert_eq!(
            err.rejection().map(|r| r.enhanced),
            Some(EnhancedCode::new(5, 7, 1))
        );
        assert!(!err.is_cancelled());
        assert!(CheckError::Cancelled.rejection().is_none());
    }
}
