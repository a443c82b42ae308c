use std::fmt::{self, Debug, Display};

use async_trait::async_trait;
use courier_common::{Header, MessageBody};
use serde::Deserialize;

use crate::StoreError;

mod memory;

pub use memory::MemoryStore;
pub use test::{StoreCall, TestStore};

/// Name of the mailbox every account is created with.
pub const INBOX: &str = "INBOX";

/// RFC 6154 special-use mailbox attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum SpecialUse {
    Junk,
    Trash,
    Sent,
    Drafts,
    Archive,
}

impl Display for SpecialUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Junk => "\\Junk",
            Self::Trash => "\\Trash",
            Self::Sent => "\\Sent",
            Self::Drafts => "\\Drafts",
            Self::Archive => "\\Archive",
        })
    }
}

/// A message as it lands in a mailbox: the recipient's own fields followed by
/// the shared message header.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub sender: String,
    pub header: Header,
    pub body: MessageBody,
    pub declared_len: u64,
}

/// A mailbox backend able to run delivery transactions.
#[async_trait]
pub trait MailStore: Send + Sync + Debug {
    async fn account_exists(&self, account: &str) -> Result<bool, StoreError>;

    async fn mailbox_exists(&self, account: &str, mailbox: &str) -> Result<bool, StoreError>;

    /// Create `account` with an empty INBOX. Existing accounts are left alone.
    async fn create_account(&self, account: &str) -> Result<(), StoreError>;

    /// Open a delivery for a message from `sender`.
    ///
    /// Nothing is visible in any mailbox until [`StoreDelivery::commit`].
    async fn start_delivery(&self, sender: &str) -> Result<Box<dyn StoreDelivery>, StoreError>;

    /// Largest message this backend accepts, if limited.
    fn append_limit(&self) -> Option<u32>;
}

/// One open delivery in a [`MailStore`].
#[async_trait]
pub trait StoreDelivery: Send {
    /// Add a recipient account. `header` is prepended to the message for
    /// this recipient only.
    ///
    /// # Errors
    /// [`StoreError::NoSuchAccount`] / [`StoreError::NoSuchMailbox`] when the
    /// account cannot receive mail, anything else on backend failure
    async fn add_rcpt(&mut self, account: &str, header: Header) -> Result<(), StoreError>;

    /// Deliver into the mailbox marked `special_use` instead of INBOX, falling
    /// back to `fallback_name` (created if missing).
    async fn special_mailbox(
        &mut self,
        special_use: SpecialUse,
        fallback_name: &str,
    ) -> Result<(), StoreError>;

    async fn body_parsed(
        &mut self,
        header: Header,
        declared_len: u64,
        body: &MessageBody,
    ) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn abort(&mut self) -> Result<(), StoreError>;
}
