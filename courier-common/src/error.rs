//! Protocol-shaped rejection type shared by checks, storage and reports.

use thiserror::Error;

use crate::status::{EnhancedCode, Status};

/// A rejection carrying an SMTP reply code and an enhanced status code.
///
/// Rejections are terminal for the single recipient (or stage) that produced
/// them; they never abort other recipients in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status} {enhanced} {message}")]
pub struct SmtpError {
    pub status: Status,
    pub enhanced: EnhancedCode,
    pub message: String,
}

impl SmtpError {
    #[must_use]
    pub fn new(status: Status, enhanced: EnhancedCode, message: impl Into<String>) -> Self {
        Self {
            status,
            enhanced,
            message: message.into(),
        }
    }

    /// 501 5.1.3, the recipient address could not be split.
    #[must_use]
    pub fn invalid_recipient(reason: impl std::fmt::Display) -> Self {
        Self::new(
            Status::ParameterSyntaxError,
            EnhancedCode::INVALID_MAILBOX_SYNTAX,
            format!("Invalid recipient address: {reason}"),
        )
    }

    /// 550 5.1.1, the account or its mailbox does not exist.
    #[must_use]
    pub fn no_such_user() -> Self {
        Self::new(
            Status::Error,
            EnhancedCode::NO_SUCH_MAILBOX,
            "User doesn't exist",
        )
    }

    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.status.is_permanent()
    }
}
