use std::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
};

/// Per-message facts, created once when a message arrives.
///
/// Shared behind an `Arc` with every check and with the delivery
/// transaction. Only the quarantine flag changes after creation.
#[derive(Debug, Default)]
pub struct MsgMetadata {
    /// Identifier used in trace headers and logs
    pub id: String,
    /// Protocol the message arrived over, e.g. `ESMTP`
    pub src_proto: String,
    /// Hostname the peer announced
    pub src_hostname: String,
    /// Network address of the peer, if it was an IP connection
    pub src_addr: Option<SocketAddr>,
    /// Our own hostname, used in `Received` and DSNs
    pub our_hostname: String,
    /// Omit the `from ...` part of `Received` (privacy mode)
    pub dont_trace_sender: bool,
    pub quarantine: Quarantine,
    /// Declared body length in bytes
    pub body_length: u64,
}

/// Set by checks to route the message into the junk mailbox.
///
/// Checks run concurrently, so this is the one piece of metadata that can be
/// written through a shared reference.
#[derive(Debug, Default)]
pub struct Quarantine(AtomicBool);

impl Quarantine {
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
