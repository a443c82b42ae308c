//! Transactional delivery of accepted messages into local mailboxes.
//!
//! [`LocalStorage`] maps recipient addresses onto accounts of a [`MailStore`]
//! backend, and [`DeliveryTransaction`] drives one message through it,
//! turning backend outcomes into SMTP rejections.

pub mod config;
pub mod delivery;
pub mod error;
pub mod received;
pub mod resolver;
pub mod store;

pub use config::{StorageConfig, Tuning};
pub use delivery::{DeliveryTransaction, LocalStorage};
pub use error::{ConfigError, DeliveryError, StoreError};
pub use resolver::{HickoryResolver, ResolveError, Resolver, StaticResolver};
pub use store::{
    INBOX, MailStore, MemoryStore, SpecialUse, StoreCall, StoreDelivery, StoredMessage, TestStore,
};
