//! Delivery status notifications (RFC 3464) for messages that could not be
//! delivered to some or all of their recipients.
//!
//! # Report structure
//! ```text
//! multipart/report; report-type=delivery-status
//! ├── text/plain                 notice for the sender
//! ├── message/delivery-status    per-message and per-recipient fields
//! └── message/rfc822-headers     header of the undelivered message
//! ```

pub mod config;
pub mod error;
pub mod generate;
pub mod multipart;
pub mod report;

pub use config::{DsnConfig, should_generate_dsn};
pub use error::DsnError;
pub use generate::{generate_dsn, generate_dsn_at};
pub use multipart::MultipartWriter;
pub use report::{Action, Diagnostic, Envelope, RecipientInfo, ReportingMtaInfo};
