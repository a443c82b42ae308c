use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use courier_common::{Header, MessageBody, internal};
use parking_lot::RwLock;

use super::{INBOX, MailStore, SpecialUse, StoreDelivery, StoredMessage};
use crate::StoreError;

#[derive(Debug, Default)]
struct Mailbox {
    special_use: Option<SpecialUse>,
    messages: Vec<StoredMessage>,
}

type Accounts = AHashMap<String, AHashMap<String, Mailbox>>;

/// In-memory mailbox store.
///
/// Accounts map to named mailboxes. Deliveries are staged privately and
/// applied under a single write lock on commit, so readers never see a
/// partially delivered message.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    accounts: Arc<RwLock<Accounts>>,
    append_limit: Option<u32>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_append_limit(append_limit: Option<u32>) -> Self {
        Self {
            accounts: Arc::default(),
            append_limit,
        }
    }

    /// Create a mailbox, optionally marked with a special-use attribute.
    ///
    /// # Errors
    /// If the account does not exist
    pub fn create_mailbox(
        &self,
        account: &str,
        name: &str,
        special_use: Option<SpecialUse>,
    ) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write();
        let mailboxes = accounts
            .get_mut(account)
            .ok_or_else(|| StoreError::NoSuchAccount(account.to_string()))?;

        mailboxes.entry(name.to_string()).or_default().special_use = special_use;
        Ok(())
    }

    /// Remove a mailbox and everything in it.
    pub fn delete_mailbox(&self, account: &str, name: &str) {
        if let Some(mailboxes) = self.accounts.write().get_mut(account) {
            mailboxes.remove(name);
        }
    }

    /// Snapshot of a mailbox's contents.
    ///
    /// # Errors
    /// If the account or mailbox does not exist
    pub fn messages(&self, account: &str, mailbox: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let accounts = self.accounts.read();
        let mailboxes = accounts
            .get(account)
            .ok_or_else(|| StoreError::NoSuchAccount(account.to_string()))?;

        mailboxes
            .get(mailbox)
            .map(|mailbox| mailbox.messages.clone())
            .ok_or_else(|| StoreError::NoSuchMailbox {
                account: account.to_string(),
                mailbox: mailbox.to_string(),
            })
    }

    /// Names of every mailbox of `account`, sorted.
    #[must_use]
    pub fn mailboxes(&self, account: &str) -> Vec<String> {
        let mut names = self
            .accounts
            .read()
            .get(account)
            .map(|mailboxes| mailboxes.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    fn check_recipient(&self, account: &str) -> Result<(), StoreError> {
        let accounts = self.accounts.read();
        let mailboxes = accounts
            .get(account)
            .ok_or_else(|| StoreError::NoSuchAccount(account.to_string()))?;

        if mailboxes.contains_key(INBOX) {
            Ok(())
        } else {
            Err(StoreError::NoSuchMailbox {
                account: account.to_string(),
                mailbox: INBOX.to_string(),
            })
        }
    }

    fn apply(&self, staged: Staged) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write();

        // Everything is resolved before anything is written.
        for (account, _) in &staged.rcpts {
            let mailboxes = accounts
                .get(account)
                .ok_or_else(|| StoreError::NoSuchAccount(account.clone()))?;

            if staged.target.is_none() && !mailboxes.contains_key(INBOX) {
                return Err(StoreError::NoSuchMailbox {
                    account: account.clone(),
                    mailbox: INBOX.to_string(),
                });
            }
        }

        for (account, rcpt_header) in staged.rcpts {
            let Some(mailboxes) = accounts.get_mut(&account) else {
                continue;
            };

            let name = match &staged.target {
                Some((special_use, fallback)) => resolve_special(mailboxes, *special_use, fallback),
                None => INBOX.to_string(),
            };

            let mut header = rcpt_header;
            header.append(&staged.header);

            internal!(account = %account, mailbox = %name, "Appending message");
            mailboxes
                .entry(name)
                .or_default()
                .messages
                .push(StoredMessage {
                    sender: staged.sender.clone(),
                    header,
                    body: staged.body.clone(),
                    declared_len: staged.declared_len,
                });
        }

        Ok(())
    }
}

/// Find the mailbox marked `special_use`, else `fallback`, creating the
/// latter if needed.
fn resolve_special(
    mailboxes: &mut AHashMap<String, Mailbox>,
    special_use: SpecialUse,
    fallback: &str,
) -> String {
    if let Some((name, _)) = mailboxes
        .iter()
        .find(|(_, mailbox)| mailbox.special_use == Some(special_use))
    {
        return name.clone();
    }

    mailboxes.entry(fallback.to_string()).or_insert_with(|| Mailbox {
        special_use: Some(special_use),
        messages: Vec::new(),
    });
    fallback.to_string()
}

#[async_trait]
impl MailStore for MemoryStore {
    async fn account_exists(&self, account: &str) -> Result<bool, StoreError> {
        Ok(self.accounts.read().contains_key(account))
    }

    async fn mailbox_exists(&self, account: &str, mailbox: &str) -> Result<bool, StoreError> {
        Ok(self
            .accounts
            .read()
            .get(account)
            .is_some_and(|mailboxes| mailboxes.contains_key(mailbox)))
    }

    async fn create_account(&self, account: &str) -> Result<(), StoreError> {
        self.accounts
            .write()
            .entry(account.to_string())
            .or_insert_with(|| AHashMap::from_iter([(INBOX.to_string(), Mailbox::default())]));
        Ok(())
    }

    async fn start_delivery(&self, sender: &str) -> Result<Box<dyn StoreDelivery>, StoreError> {
        Ok(Box::new(MemoryDelivery {
            store: self.clone(),
            sender: sender.to_string(),
            rcpts: Vec::new(),
            target: None,
            body: None,
            finished: false,
        }))
    }

    fn append_limit(&self) -> Option<u32> {
        self.append_limit
    }
}

struct Staged {
    sender: String,
    rcpts: Vec<(String, Header)>,
    target: Option<(SpecialUse, String)>,
    header: Header,
    body: MessageBody,
    declared_len: u64,
}

struct MemoryDelivery {
    store: MemoryStore,
    sender: String,
    rcpts: Vec<(String, Header)>,
    target: Option<(SpecialUse, String)>,
    body: Option<(Header, MessageBody, u64)>,
    finished: bool,
}

impl MemoryDelivery {
    const fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            Err(StoreError::InvalidState("delivery already finished"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StoreDelivery for MemoryDelivery {
    async fn add_rcpt(&mut self, account: &str, header: Header) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.store.check_recipient(account)?;
        self.rcpts.push((account.to_string(), header));
        Ok(())
    }

    async fn special_mailbox(
        &mut self,
        special_use: SpecialUse,
        fallback_name: &str,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.target = Some((special_use, fallback_name.to_string()));
        Ok(())
    }

    async fn body_parsed(
        &mut self,
        header: Header,
        declared_len: u64,
        body: &MessageBody,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.body.is_some() {
            return Err(StoreError::InvalidState("body already stored"));
        }

        let size = body.len() as u64;
        if let Some(limit) = self.store.append_limit
            && size > u64::from(limit)
        {
            return Err(StoreError::MessageTooLarge { size, limit });
        }

        self.body = Some((header, body.clone(), declared_len));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let (header, body, declared_len) = self
            .body
            .take()
            .ok_or(StoreError::InvalidState("commit without a body"))?;
        self.finished = true;

        self.store.apply(Staged {
            sender: std::mem::take(&mut self.sender),
            rcpts: std::mem::take(&mut self.rcpts),
            target: self.target.take(),
            header,
            body,
            declared_len,
        })
    }

    async fn abort(&mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.rcpts.clear();
        self.body = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn header(fields: &[(&str, &str)]) -> Header {
        fields.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.create_account("bob").await.unwrap();
        store.create_account("carol").await.unwrap();

        let mut delivery = store.start_delivery("alice@example.com").await.unwrap();
        delivery
            .add_rcpt("bob", header(&[("Delivered-To", "bob@example.org")]))
            .await
            .unwrap();
        delivery
            .add_rcpt("carol", header(&[("Delivered-To", "carol@example.org")]))
            .await
            .unwrap();
        delivery
            .body_parsed(header(&[("Subject", "Hi")]), 4, &MessageBody::from("Hi\r\n"))
            .await
            .unwrap();

        assert!(store.messages("bob", INBOX).unwrap().is_empty());

        delivery.commit().await.unwrap();

        let bob = store.messages("bob", INBOX).unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(
            bob[0].header.iter().collect::<Vec<_>>(),
            vec![("Delivered-To", "bob@example.org"), ("Subject", "Hi")]
        );
        assert_eq!(bob[0].sender, "alice@example.com");
        assert_eq!(store.messages("carol", INBOX).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_recipients() {
        let store = MemoryStore::new();
        store.create_account("bob").await.unwrap();
        store.delete_mailbox("bob", INBOX);

        let mut delivery = store.start_delivery("alice@example.com").await.unwrap();

        let err = delivery.add_rcpt("nobody", Header::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchAccount(_)));

        let err = delivery.add_rcpt("bob", Header::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchMailbox { .. }));
        assert!(err.is_not_found());

        delivery.abort().await.unwrap();
    }

    #[tokio::test]
    async fn test_append_limit() {
        let store = MemoryStore::with_append_limit(Some(8));
        store.create_account("bob").await.unwrap();

        let mut delivery = store.start_delivery("alice@example.com").await.unwrap();
        delivery.add_rcpt("bob", Header::new()).await.unwrap();

        let err = delivery
            .body_parsed(Header::new(), 9, &MessageBody::from("123456789"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::MessageTooLarge { size: 9, limit: 8 }
        ));

        delivery.abort().await.unwrap();
        assert!(store.messages("bob", INBOX).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_special_mailbox_routing() {
        let store = MemoryStore::new();
        store.create_account("bob").await.unwrap();
        store.create_account("carol").await.unwrap();
        store
            .create_mailbox("carol", "Spam", Some(SpecialUse::Junk))
            .unwrap();

        let mut delivery = store.start_delivery("alice@example.com").await.unwrap();
        delivery.add_rcpt("bob", Header::new()).await.unwrap();
        delivery.add_rcpt("carol", Header::new()).await.unwrap();
        delivery
            .special_mailbox(SpecialUse::Junk, "Junk")
            .await
            .unwrap();
        delivery
            .body_parsed(Header::new(), 2, &MessageBody::from("x\n"))
            .await
            .unwrap();
        delivery.commit().await.unwrap();

        // bob has no junk mailbox, so the fallback name is created
        assert_eq!(store.mailboxes("bob"), vec!["INBOX", "Junk"]);
        assert_eq!(store.messages("bob", "Junk").unwrap().len(), 1);
        assert!(store.messages("bob", INBOX).unwrap().is_empty());

        // carol's mailbox marked as junk wins over the fallback name
        assert_eq!(store.mailboxes("carol"), vec!["INBOX", "Spam"]);
        assert_eq!(store.messages("carol", "Spam").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_finished_delivery_is_closed() {
        let store = MemoryStore::new();
        store.create_account("bob").await.unwrap();

        let mut delivery = store.start_delivery("").await.unwrap();
        assert!(matches!(
            delivery.commit().await,
            Err(StoreError::InvalidState(_))
        ));

        delivery.abort().await.unwrap();
        assert!(matches!(
            delivery.add_rcpt("bob", Header::new()).await,
            Err(StoreError::InvalidState(_))
        ));
    }
}
