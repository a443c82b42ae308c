use std::io;

use thiserror::Error;

/// Errors from building a delivery status notification.
///
/// Any error means the output written so far must be discarded.
#[derive(Debug, Error)]
pub enum DsnError {
    #[error("Reporting-MTA is mandatory")]
    MissingReportingMta,

    #[error("Final-Recipient is mandatory")]
    MissingFinalRecipient,

    #[error("Status is mandatory (recipient {recipient})")]
    MissingStatus { recipient: String },

    #[error("Unable to write report: {0}")]
    Io(#[from] io::Error),
}

impl DsnError {
    /// The inputs were incomplete, as opposed to the output failing.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}
