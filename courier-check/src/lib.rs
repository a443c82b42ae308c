//! Pluggable acceptance checks, and the group that runs them together.

pub mod builtin;
pub mod check;
pub mod error;
pub mod group;
pub mod registry;

pub use check::{Check, CheckState, Stage};
pub use error::{CheckError, CheckResult, RegistryError};
pub use group::{CheckGroup, CheckGroupState};
pub use registry::{CheckConfig, CheckRegistry};
