use core::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// SMTP reply codes the delivery core produces or inspects.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug, Serialize, Deserialize)]
pub enum Status {
    ServiceReady,
    GoodBye,
    Ok,
    StartMailInput,
    Unavailable,
    MailboxBusy,
    ActionUnavailable,
    InsufficientStorage,
    SyntaxError,
    ParameterSyntaxError,
    InvalidCommandSequence,
    Error,
    ExceededStorage,
    MailboxNameNotAllowed,
    TransactionFailed,
    Unknown(u16),
}

impl Status {
    /// Checks if the status is a permanent rejection
    pub fn is_permanent(self) -> bool {
        u16::from(self) >= 500
    }

    /// Checks if the status is a temporary rejection
    pub fn is_temporary(self) -> bool {
        (400..500).contains(&u16::from(self))
    }
}

impl From<u16> for Status {
    fn from(value: u16) -> Self {
        match value {
            220 => Self::ServiceReady,
            221 => Self::GoodBye,
            250 => Self::Ok,
            354 => Self::StartMailInput,
            421 => Self::Unavailable,
            450 => Self::MailboxBusy,
            451 => Self::ActionUnavailable,
            452 => Self::InsufficientStorage,
            500 => Self::SyntaxError,
            501 => Self::ParameterSyntaxError,
            503 => Self::InvalidCommandSequence,
            550 => Self::Error,
            552 => Self::ExceededStorage,
            553 => Self::MailboxNameNotAllowed,
            554 => Self::TransactionFailed,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u16 {
    fn from(value: Status) -> Self {
        match value {
            Status::ServiceReady => 220,
            Status::GoodBye => 221,
            Status::Ok => 250,
            Status::StartMailInput => 354,
            Status::Unavailable => 421,
            Status::MailboxBusy => 450,
            Status::ActionUnavailable => 451,
            Status::InsufficientStorage => 452,
            Status::SyntaxError => 500,
            Status::ParameterSyntaxError => 501,
            Status::InvalidCommandSequence => 503,
            Status::Error => 550,
            Status::ExceededStorage => 552,
            Status::MailboxNameNotAllowed => 553,
            Status::TransactionFailed => 554,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u16::from(*self))
    }
}

/// RFC 3463 enhanced status code, `class.subject.detail`.
///
/// A zero class means "not set"; the delivery status report refuses to
/// emit such a code.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct EnhancedCode {
    pub class: u8,
    pub subject: u16,
    pub detail: u16,
}

impl EnhancedCode {
    pub const INVALID_MAILBOX_SYNTAX: Self = Self::new(5, 1, 3);
    pub const NO_SUCH_MAILBOX: Self = Self::new(5, 1, 1);
    pub const MAILBOX_FULL: Self = Self::new(5, 2, 2);
    pub const MESSAGE_TOO_BIG: Self = Self::new(5, 3, 4);
    pub const SECURITY_POLICY: Self = Self::new(5, 7, 1);
    pub const TEMPORARY_SYSTEM: Self = Self::new(4, 3, 0);

    #[must_use]
    pub const fn new(class: u8, subject: u16, detail: u16) -> Self {
        Self {
            class,
            subject,
            detail,
        }
    }

    #[must_use]
    pub const fn is_set(self) -> bool {
        self.class != 0
    }
}

impl Display for EnhancedCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid enhanced status code: {0}")]
pub struct ParseEnhancedCodeError(String);

impl FromStr for EnhancedCode {
    type Err = ParseEnhancedCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseEnhancedCodeError(s.to_string());

        let mut parts = s.splitn(3, '.');
        let (Some(class), Some(subject), Some(detail)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let class = class.parse::<u8>().map_err(|_| invalid())?;
        if !matches!(class, 2 | 4 | 5) {
            return Err(invalid());
        }

        Ok(Self {
            class,
            subject: subject.parse().map_err(|_| invalid())?,
            detail: detail.parse().map_err(|_| invalid())?,
        })
    }
}
