//! Checks shipped with courier.

use std::sync::Arc;

use ahash::AHashSet;
use async_trait::async_trait;
use courier_common::{
    EnhancedCode, MessageBody, MsgMetadata, SharedHeader, SmtpError, Status, incoming,
};
use tokio_util::sync::CancellationToken;

use crate::{Check, CheckConfig, CheckError, CheckRegistry, CheckResult, CheckState, RegistryError};

/// Reject mail from any of a fixed list of senders.
#[derive(Debug)]
pub struct SenderBlocklist {
    blocked: Arc<AHashSet<String>>,
}

impl SenderBlocklist {
    pub const NAME: &'static str = "sender_blocklist";

    /// # Errors
    /// If no senders are given
    pub fn from_config(config: &CheckConfig) -> Result<Self, RegistryError> {
        if config.args.is_empty() {
            return Err(RegistryError::InvalidArguments {
                check: config.name.clone(),
                reason: String::from("at least one sender is required"),
            });
        }

        Ok(Self {
            blocked: Arc::new(config.args.iter().map(|s| s.to_lowercase()).collect()),
        })
    }
}

#[async_trait]
impl Check for SenderBlocklist {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn new_message(
        &self,
        meta: &Arc<MsgMetadata>,
    ) -> Result<Box<dyn CheckState>, CheckError> {
        Ok(Box::new(BlocklistState {
            meta: Arc::clone(meta),
            blocked: Arc::clone(&self.blocked),
        }))
    }
}

struct BlocklistState {
    meta: Arc<MsgMetadata>,
    blocked: Arc<AHashSet<String>>,
}

#[async_trait]
impl CheckState for BlocklistState {
    async fn check_sender(&self, _cancel: &CancellationToken, from: &str) -> CheckResult {
        if self.blocked.contains(&from.to_lowercase()) {
            incoming!(level = INFO, message_id = %self.meta.id, from, "Sender is blocklisted");
            return Err(SmtpError::new(
                Status::Error,
                EnhancedCode::SECURITY_POLICY,
                "Sender address rejected",
            )
            .into());
        }

        Ok(())
    }
}

/// Quarantine any message carrying a given header field.
#[derive(Debug)]
pub struct QuarantineIfHeader {
    field: Arc<str>,
}

impl QuarantineIfHeader {
    pub const NAME: &'static str = "quarantine_if_header";

    /// # Errors
    /// Unless exactly one header field name is given
    pub fn from_config(config: &CheckConfig) -> Result<Self, RegistryError> {
        match config.args.as_slice() {
            [field] if !field.is_empty() => Ok(Self {
                field: Arc::from(field.as_str()),
            }),
            _ => Err(RegistryError::InvalidArguments {
                check: config.name.clone(),
                reason: String::from("expected exactly one header field name"),
            }),
        }
    }
}

#[async_trait]
impl Check for QuarantineIfHeader {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn new_message(
        &self,
        meta: &Arc<MsgMetadata>,
    ) -> Result<Box<dyn CheckState>, CheckError> {
        Ok(Box::new(QuarantineState {
            meta: Arc::clone(meta),
            field: Arc::clone(&self.field),
        }))
    }
}

struct QuarantineState {
    meta: Arc<MsgMetadata>,
    field: Arc<str>,
}

#[async_trait]
impl CheckState for QuarantineState {
    async fn check_body(
        &self,
        cancel: &CancellationToken,
        header: &SharedHeader,
        _body: &MessageBody,
    ) -> CheckResult {
        let present = tokio::select! {
            () = cancel.cancelled() => return Err(CheckError::Cancelled),
            header = header.read() => header.has(&self.field),
        };

        if present {
            incoming!(
                level = INFO,
                message_id = %self.meta.id,
                field = %self.field,
                "Quarantining message"
            );
            self.meta.quarantine.set();
        }

        Ok(())
    }
}

/// Register every built-in check.
///
/// # Errors
/// If any of the built-in names is already taken
pub fn register_builtin(registry: &mut CheckRegistry) -> Result<(), RegistryError> {
    registry.register(SenderBlocklist::NAME, |config| {
        Ok(Arc::new(SenderBlocklist::from_config(config)?) as Arc<dyn Check>)
    })?;
    registry.register(QuarantineIfHeader::NAME, |config| {
        Ok(Arc::new(QuarantineIfHeader::from_config(config)?) as Arc<dyn Check>)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use courier_common::Header;

    use super::*;

    fn registry() -> CheckRegistry {
        let mut registry = CheckRegistry::new();
        register_builtin(&mut registry).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_sender_blocklist() {
        let check = registry()
            .build(&CheckConfig::new("sender_blocklist").with_args(["Spam@Example.net"]))
            .unwrap();
        let meta = Arc::new(MsgMetadata::default());
        let mut state = check.new_message(&meta).await.unwrap();
        let cancel = CancellationToken::new();

        assert!(state.check_sender(&cancel, "alice@example.com").await.is_ok());

        let err = state
            .check_sender(&cancel, "spam@example.NET")
            .await
            .unwrap_err();
        let rejection = err.rejection().expect("smtp rejection");
        assert_eq!(rejection.status, Status::Error);
        assert_eq!(rejection.enhanced, EnhancedCode::SECURITY_POLICY);

        state.close().await.unwrap();
    }

    #[test]
    fn test_invalid_arguments() {
        let registry = registry();

        let err = registry
            .build(&CheckConfig::new("sender_blocklist"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArguments { .. }));

        let err = registry
            .build(&CheckConfig::new("quarantine_if_header").with_args(["A", "B"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_quarantine_if_header() {
        let check = registry()
            .build(&CheckConfig::new("quarantine_if_header").with_args(["X-Spam-Flag"]))
            .unwrap();
        let cancel = CancellationToken::new();
        let body = MessageBody::from("hello\r\n");

        let clean = Arc::new(MsgMetadata::default());
        let state = check.new_message(&clean).await.unwrap();
        let header = SharedHeader::from(Header::from_iter([("Subject", "hi")]));
        state.check_body(&cancel, &header, &body).await.unwrap();
        assert!(!clean.quarantine.is_set());

        let flagged = Arc::new(MsgMetadata::default());
        let state = check.new_message(&flagged).await.unwrap();
        let header = SharedHeader::from(Header::from_iter([("x-spam-flag", "YES")]));
        state.check_body(&cancel, &header, &body).await.unwrap();
        assert!(flagged.quarantine.is_set());
    }
}
