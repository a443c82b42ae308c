//! Shared types for the courier delivery core.
//!
//! Everything here is consumed by more than one of the check, storage and
//! report crates: per-message metadata, the header model handed to checks and
//! storage, the reply codes used for protocol-shaped rejections, and the
//! logging macros.

pub mod address;
pub mod body;
pub mod error;
pub mod header;
pub mod logging;
pub mod metadata;
pub mod status;

pub use body::MessageBody;
pub use error::SmtpError;
pub use header::{Header, SharedHeader};
pub use metadata::{MsgMetadata, Quarantine};
pub use status::{EnhancedCode, Status};
pub use tracing;
