//! Local mail delivery core.
//!
//! A [`Courier`] takes a message that has already been received, runs it
//! past the configured checks, delivers it into local mailboxes, and builds a
//! delivery status notification for the sender when some recipients could
//! not be reached.

pub mod config;
pub mod error;
pub mod pipeline;

pub use config::{CourierConfig, find_config_file};
pub use error::PipelineError;
pub use pipeline::{Bounce, Courier, DeliveryReport, InboundMessage, Rejection};
