use courier_check::{CheckError, RegistryError};
use courier_common::SmtpError;
use courier_dsn::DsnError;
use courier_storage::{DeliveryError, ResolveError};
use thiserror::Error;

/// Errors from driving a message through the delivery pipeline.
///
/// Per-recipient rejections are not errors; they are reported in the
/// [`DeliveryReport`](crate::DeliveryReport). Anything here means no
/// recipient received the message.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A connection, sender or body check refused the whole message.
    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Resolver(#[from] ResolveError),

    #[error(transparent)]
    Dsn(#[from] DsnError),

    #[error("Malformed message: {0}")]
    Parse(#[from] mailparse::MailParseError),

    #[error("No recipients given")]
    NoRecipients,
}

impl PipelineError {
    /// The reply to send back, if the message was refused with one.
    #[must_use]
    pub const fn rejection(&self) -> Option<&SmtpError> {
        match self {
            Self::Check(err) => err.rejection(),
            Self::Delivery(err) => err.rejection(),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Check(CheckError::Cancelled))
    }
}
