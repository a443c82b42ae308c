use std::{path::Path, sync::Arc};

use ahash::AHashSet;
use chrono::Local;
use courier_common::{
    Header, MessageBody, MsgMetadata, SmtpError,
    address::{sanitize, split_address},
    internal,
};
use tracing::warn;

use crate::{
    DeliveryError, MailStore, MemoryStore, SpecialUse, StorageConfig, StoreDelivery, received,
    resolver::Resolver,
};

/// Progress is logged at DEBUG when the storage `debug` toggle is on, TRACE
/// otherwise.
macro_rules! progress {
    ($debug:expr, $($msg:tt)*) => {
        if $debug {
            internal!(level = DEBUG, $($msg)*)
        } else {
            internal!($($msg)*)
        }
    };
}

/// Local mailbox storage: a backend plus the policy for mapping addresses and
/// logins onto its accounts.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    config: Arc<StorageConfig>,
    store: Arc<dyn MailStore>,
    resolver: Arc<dyn Resolver>,
}

impl LocalStorage {
    #[must_use]
    pub fn new(
        config: StorageConfig,
        store: Arc<dyn MailStore>,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            resolver,
        }
    }

    /// Validate `config`, prepare the blob store under `state_dir` and open
    /// the configured driver.
    ///
    /// # Errors
    /// If the configuration is invalid, the blob store cannot be created or
    /// the driver is unknown
    pub fn from_config(
        config: StorageConfig,
        state_dir: &Path,
        resolver: Arc<dyn Resolver>,
    ) -> Result<Self, DeliveryError> {
        config.validate()?;
        let blob_store = config.prepare_blob_store(state_dir)?;

        let store: Arc<dyn MailStore> = match config.driver.as_str() {
            "memory" => Arc::new(MemoryStore::with_append_limit(config.append_limit)),
            other => return Err(crate::ConfigError::UnknownDriver(other.to_string()).into()),
        };

        internal!(
            level = INFO,
            driver = %config.driver,
            blob_store = ?blob_store,
            tuning = ?config.tuning,
            "Storage opened"
        );

        Ok(Self::new(config, store, resolver))
    }

    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<dyn MailStore> {
        &self.store
    }

    /// IMAP extensions this storage supports.
    #[must_use]
    pub const fn imap_extensions() -> &'static [&'static str] {
        &["APPENDLIMIT", "MOVE", "CHILDREN"]
    }

    /// Account a login name refers to, or `None` if the login is not
    /// allowed under the per-domain auth policy.
    #[must_use]
    pub fn auth_account(&self, username: &str) -> Option<String> {
        let per_domain = self.config.auth_per_domain;
        let (account, domain) = match username.split_once('@') {
            Some((_, domain)) if per_domain => (username, domain),
            None if per_domain => return None,
            Some((local, domain)) => (local, domain),
            None => (username, ""),
        };

        let domains = &self.config.auth_domains;
        if !domain.is_empty()
            && !domains.is_empty()
            && !domains.iter().any(|allowed| allowed.eq_ignore_ascii_case(domain))
        {
            return None;
        }

        Some(account.to_lowercase())
    }

    /// Storage account for a login name.
    ///
    /// # Errors
    /// With per-domain storage, if the name has no domain
    pub fn account_for_login(&self, username: &str) -> Result<String, DeliveryError> {
        if self.config.storage_per_domain {
            if !username.contains('@') {
                return Err(DeliveryError::InvalidAccount(format!(
                    "{username}: username@domain required"
                )));
            }
            return Ok(username.to_lowercase());
        }

        let local = username.split('@').next().unwrap_or(username);
        Ok(local.to_lowercase())
    }

    /// Look up the account for a login, creating it if needed.
    ///
    /// # Errors
    /// If the name is not a valid account, or the backend fails
    pub async fn get_or_create_account(&self, username: &str) -> Result<String, DeliveryError> {
        let account = self.account_for_login(username)?;
        self.store.create_account(&account).await?;
        Ok(account)
    }

    /// Open a delivery transaction for one message from `mail_from`.
    ///
    /// # Errors
    /// If the backend cannot open a delivery
    #[tracing::instrument(level = "trace", skip(self, meta), fields(message_id = %meta.id))]
    pub async fn start(
        &self,
        meta: Arc<MsgMetadata>,
        mail_from: &str,
    ) -> Result<DeliveryTransaction, DeliveryError> {
        let delivery = self.store.start_delivery(mail_from).await?;
        progress!(self.config.debug, message_id = %meta.id, mail_from, "Delivery started");

        Ok(DeliveryTransaction {
            storage: self.clone(),
            meta,
            mail_from: mail_from.to_string(),
            delivery,
            accepted: AHashSet::new(),
            body: BodyState::Pending,
            finished: false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyState {
    Pending,
    Attempted,
    Written,
}

/// One message on its way into local mailboxes.
///
/// Recipients are added one at a time, the body is written once, and then
/// the transaction is ended by exactly one of [`commit`](Self::commit) or
/// [`abort`](Self::abort). Both consume the transaction.
pub struct DeliveryTransaction {
    storage: LocalStorage,
    meta: Arc<MsgMetadata>,
    mail_from: String,
    delivery: Box<dyn StoreDelivery>,
    accepted: AHashSet<String>,
    body: BodyState,
    finished: bool,
}

impl DeliveryTransaction {
    /// Accept a recipient.
    ///
    /// Adding an account that is already part of the transaction (compared
    /// case-insensitively) does nothing.
    ///
    /// # Errors
    /// - [`DeliveryError::Rejected`] with 501 5.1.3 for an address that
    ///   cannot be split, or 550 5.1.1 when the account does not exist; the
    ///   transaction stays usable
    /// - [`DeliveryError::Store`] for any other backend failure
    /// - [`DeliveryError::InvalidState`] once the body has been written
    #[tracing::instrument(level = "trace", skip(self), fields(message_id = %self.meta.id))]
    pub async fn add_rcpt(&mut self, rcpt_to: &str) -> Result<(), DeliveryError> {
        if self.body != BodyState::Pending {
            return Err(DeliveryError::InvalidState("recipient added after the body"));
        }

        let account = if self.storage.config.storage_per_domain {
            rcpt_to
        } else {
            let (local, _) = split_address(rcpt_to).map_err(SmtpError::invalid_recipient)?;
            local
        };
        let account = account.to_lowercase();

        if self.accepted.contains(&account) {
            progress!(self.storage.config.debug, rcpt_to, "Duplicate recipient ignored");
            return Ok(());
        }

        let received = received::generate(
            self.storage.resolver.as_ref(),
            &self.meta,
            &self.mail_from,
            rcpt_to,
            Local::now().fixed_offset(),
        )
        .await;

        let mut header = Header::new();
        header.prepend("Delivered-To", sanitize(rcpt_to));
        header.prepend("Received", received);

        match self.delivery.add_rcpt(&account, header).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                progress!(self.storage.config.debug, rcpt_to, error = %err, "Unknown recipient");
                return Err(SmtpError::no_such_user().into());
            }
            Err(err) => return Err(err.into()),
        }

        progress!(self.storage.config.debug, rcpt_to, account = %account, "Recipient accepted");
        self.accepted.insert(account);
        Ok(())
    }

    /// Write the message. The caller's header is left untouched; the stored
    /// copy gains a `Return-Path`.
    ///
    /// # Errors
    /// [`DeliveryError::InvalidState`] on a second call, otherwise any
    /// backend failure, after which the transaction must be aborted
    #[tracing::instrument(level = "trace", skip_all, fields(message_id = %self.meta.id))]
    pub async fn body(&mut self, header: &Header, body: &MessageBody) -> Result<(), DeliveryError> {
        if self.body != BodyState::Pending {
            return Err(DeliveryError::InvalidState("body written twice"));
        }
        self.body = BodyState::Attempted;

        if self.meta.quarantine.is_set() {
            let junk = &self.storage.config.junk_mailbox;
            internal!(level = INFO, message_id = %self.meta.id, mailbox = %junk, "Message quarantined");
            self.delivery.special_mailbox(SpecialUse::Junk, junk).await?;
        }

        let mut header = header.clone();
        header.prepend("Return-Path", format!("<{}>", sanitize(&self.mail_from)));

        self.delivery
            .body_parsed(header, self.meta.body_length, body)
            .await?;

        self.body = BodyState::Written;
        progress!(self.storage.config.debug, message_id = %self.meta.id, "Body stored");
        Ok(())
    }

    /// Make the message visible in every accepted recipient's mailbox.
    ///
    /// # Errors
    /// [`DeliveryError::InvalidState`] if no body was written (the delivery
    /// is rolled back), otherwise the backend commit failure
    #[tracing::instrument(level = "trace", skip_all, fields(message_id = %self.meta.id))]
    pub async fn commit(mut self) -> Result<(), DeliveryError> {
        self.finished = true;

        if self.body != BodyState::Written {
            if let Err(err) = self.delivery.abort().await {
                warn!(message_id = %self.meta.id, error = %err, "Failed to abort delivery");
            }
            return Err(DeliveryError::InvalidState("commit without a body"));
        }

        if let Err(err) = self.delivery.commit().await {
            if let Err(abort_err) = self.delivery.abort().await {
                warn!(message_id = %self.meta.id, error = %abort_err, "Failed to abort delivery");
            }
            return Err(err.into());
        }

        internal!(
            level = INFO,
            message_id = %self.meta.id,
            recipients = self.accepted.len(),
            "Delivery committed"
        );
        Ok(())
    }

    /// Roll the delivery back. Valid at any point after start.
    ///
    /// # Errors
    /// If the backend fails to roll back
    #[tracing::instrument(level = "trace", skip_all, fields(message_id = %self.meta.id))]
    pub async fn abort(mut self) -> Result<(), DeliveryError> {
        self.finished = true;
        self.delivery.abort().await?;
        progress!(self.storage.config.debug, message_id = %self.meta.id, "Delivery aborted");
        Ok(())
    }

    /// Accounts accepted so far, lower-cased.
    pub fn accepted(&self) -> impl Iterator<Item = &str> {
        self.accepted.iter().map(String::as_str)
    }

    #[must_use]
    pub fn mail_from(&self) -> &str {
        &self.mail_from
    }
}

impl Drop for DeliveryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                message_id = %self.meta.id,
                "Delivery transaction dropped without commit or abort"
            );
        }
    }
}
