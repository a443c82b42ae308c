//! Report inputs and their `message/delivery-status` field blocks.

use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use chrono::{DateTime, FixedOffset};
use courier_common::{EnhancedCode, Header, SmtpError};
use serde::Deserialize;

use crate::DsnError;

/// Date format used in report fields, e.g. `Mon, 2 Jan 2006 15:04:05 -0700`.
pub const DATE_FORMAT: &str = "%a, %-d %b %Y %H:%M:%S %z";

pub type Diagnostic = Box<dyn Error + Send + Sync>;

/// Identity of the MTA issuing the report, and what it knows about the
/// original message.
#[derive(Debug, Clone, Default)]
pub struct ReportingMtaInfo {
    pub reporting_mta: String,
    pub received_from_mta: Option<String>,
    /// Original sender, emitted as `X-Maddy-Sender`
    pub sender: Option<String>,
    /// Original message id, emitted as `X-Maddy-MsgID`
    pub message_id: Option<String>,
    pub arrival_date: Option<DateTime<FixedOffset>>,
    pub last_attempt_date: Option<DateTime<FixedOffset>>,
}

impl ReportingMtaInfo {
    pub(crate) fn validate(&self) -> Result<(), DsnError> {
        if self.reporting_mta.is_empty() {
            return Err(DsnError::MissingReportingMta);
        }
        Ok(())
    }

    /// The per-message field block.
    ///
    /// # Errors
    /// If Reporting-MTA is empty, or the writer fails
    pub fn write_to<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<(), DsnError> {
        self.validate()?;

        let mut fields = Header::new();
        fields.add("Reporting-MTA", format!("dns; {}", self.reporting_mta));

        if let Some(mta) = self.received_from_mta.as_deref().filter(|s| !s.is_empty()) {
            fields.add("Received-From-MTA", format!("dns; {mta}"));
        }
        if let Some(sender) = self.sender.as_deref().filter(|s| !s.is_empty()) {
            fields.add("X-Maddy-Sender", format!("rfc822; {sender}"));
        }
        if let Some(id) = self.message_id.as_deref().filter(|s| !s.is_empty()) {
            fields.add("X-Maddy-MsgID", id);
        }
        if let Some(date) = self.arrival_date {
            fields.add("Arrival-Date", date.format(DATE_FORMAT).to_string());
        }
        if let Some(date) = self.last_attempt_date {
            fields.add("Last-Attempt-Date", date.format(DATE_FORMAT).to_string());
        }

        fields.write_to(w)?;
        Ok(())
    }
}

/// What happened to a recipient (RFC 3464 section 2.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Action {
    Failed,
    Delayed,
    Delivered,
    Relayed,
    Expanded,
}

impl Action {
    /// Whether the sender needs to hear about this outcome.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Delayed)
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Failed => "failed",
            Self::Delayed => "delayed",
            Self::Delivered => "delivered",
            Self::Relayed => "relayed",
            Self::Expanded => "expanded",
        })
    }
}

/// Outcome for one recipient.
#[derive(Debug)]
pub struct RecipientInfo {
    pub final_recipient: String,
    pub remote_mta: Option<String>,
    pub action: Action,
    pub status: EnhancedCode,
    /// The error reported back to the sender
    pub diagnostic_code: Diagnostic,
}

impl RecipientInfo {
    #[must_use]
    pub fn new(
        final_recipient: impl Into<String>,
        action: Action,
        status: EnhancedCode,
        diagnostic_code: impl Into<Diagnostic>,
    ) -> Self {
        Self {
            final_recipient: final_recipient.into(),
            remote_mta: None,
            action,
            status,
            diagnostic_code: diagnostic_code.into(),
        }
    }

    /// A failed recipient, with status and diagnostic taken from the reply.
    #[must_use]
    pub fn rejected(final_recipient: impl Into<String>, reply: SmtpError) -> Self {
        let action = if reply.is_permanent() {
            Action::Failed
        } else {
            Action::Delayed
        };
        Self::new(final_recipient, action, reply.enhanced, reply)
    }

    #[must_use]
    pub fn with_remote_mta(mut self, remote_mta: impl Into<String>) -> Self {
        self.remote_mta = Some(remote_mta.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), DsnError> {
        if self.final_recipient.is_empty() {
            return Err(DsnError::MissingFinalRecipient);
        }
        if !self.status.is_set() {
            return Err(DsnError::MissingStatus {
                recipient: self.final_recipient.clone(),
            });
        }
        Ok(())
    }

    /// `Diagnostic-Code` value: the SMTP reply when there is one, otherwise
    /// the error text.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        match self.diagnostic_code.downcast_ref::<SmtpError>() {
            Some(reply) => format!(
                "smtp; {} {} {}",
                u16::from(reply.status),
                reply.enhanced,
                reply.message
            ),
            None => format!("X-Maddy; {}", self.diagnostic_code),
        }
    }

    /// The per-recipient field block.
    ///
    /// # Errors
    /// If a mandatory field is missing, or the writer fails
    pub fn write_to<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<(), DsnError> {
        self.validate()?;

        let mut fields = Header::new();
        fields.add("Final-Recipient", format!("rfc822; {}", self.final_recipient));
        fields.add("Action", self.action.to_string());
        fields.add("Status", self.status.to_string());
        fields.add("Diagnostic-Code", self.diagnostic());
        if let Some(mta) = self.remote_mta.as_deref().filter(|s| !s.is_empty()) {
            fields.add("Remote-MTA", format!("dns; {mta}"));
        }

        fields.write_to(w)?;
        Ok(())
    }
}

/// Addressing of the report itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub message_id: String,
    pub from: String,
    pub to: String,
}
