use std::{
    fmt::{self, Debug, Display},
    sync::Arc,
};

use async_trait::async_trait;
use courier_common::{MessageBody, MsgMetadata, SharedHeader};
use tokio_util::sync::CancellationToken;

use crate::{CheckError, CheckResult};

/// The protocol stage a check is being asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connection,
    Sender,
    Rcpt,
    Body,
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connection => "connection",
            Self::Sender => "sender",
            Self::Rcpt => "rcpt",
            Self::Body => "body",
        })
    }
}

/// A pluggable acceptance check.
///
/// A check is configured once and then asked for a fresh [`CheckState`] for
/// every message.
#[async_trait]
pub trait Check: Send + Sync + Debug {
    /// Name the check was registered under
    fn name(&self) -> &str;

    /// Create the per-message state.
    ///
    /// # Errors
    /// If the check cannot process this message at all; no stage may be
    /// called afterwards.
    async fn new_message(&self, meta: &Arc<MsgMetadata>)
    -> Result<Box<dyn CheckState>, CheckError>;
}

/// Per-message state of a single check.
///
/// Stages run concurrently with the same stage of sibling checks, so they
/// take `&self`. Each receives the cancellation scope for that stage call and
/// should return promptly once it is cancelled. `close` is called exactly
/// once, after the last stage, whatever the outcome.
#[async_trait]
pub trait CheckState: Send + Sync {
    async fn check_connection(&self, _cancel: &CancellationToken) -> CheckResult {
        Ok(())
    }

    async fn check_sender(&self, _cancel: &CancellationToken, _from: &str) -> CheckResult {
        Ok(())
    }

    async fn check_rcpt(&self, _cancel: &CancellationToken, _to: &str) -> CheckResult {
        Ok(())
    }

    /// `header` is shared with every other body-stage check of this message:
    /// take `read()` to inspect it and `write()` to change it.
    async fn check_body(
        &self,
        _cancel: &CancellationToken,
        _header: &SharedHeader,
        _body: &MessageBody,
    ) -> CheckResult {
        Ok(())
    }

    async fn close(&mut self) -> CheckResult {
        Ok(())
    }
}
