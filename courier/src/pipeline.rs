//! The path of one message through checks, storage and, when something
//! failed, back to its sender as a delivery status notification.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, FixedOffset, Local};
use courier_check::{
    CheckError, CheckGroup, CheckGroupState, CheckRegistry, CheckState, builtin::register_builtin,
};
use courier_common::{
    EnhancedCode, Header, MessageBody, MsgMetadata, SharedHeader, SmtpError, Status, incoming,
    internal, outgoing,
};
use courier_dsn::{
    DsnConfig, Envelope, RecipientInfo, ReportingMtaInfo, generate_dsn, should_generate_dsn,
};
use courier_storage::{DeliveryError, DeliveryTransaction, HickoryResolver, LocalStorage};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{CourierConfig, PipelineError};

/// A message as handed over by whatever accepted it.
#[derive(Debug)]
pub struct InboundMessage {
    pub meta: MsgMetadata,
    pub mail_from: String,
    pub rcpt_to: Vec<String>,
    pub header: Header,
    pub body: MessageBody,
}

impl InboundMessage {
    /// Split a raw RFC 5322 message into header and body.
    ///
    /// The body length in `meta` is set from the raw message.
    ///
    /// # Errors
    /// If the header section cannot be parsed
    pub fn from_raw(
        mut meta: MsgMetadata,
        mail_from: impl Into<String>,
        rcpt_to: Vec<String>,
        raw: &[u8],
    ) -> Result<Self, PipelineError> {
        let (header, offset) = Header::parse(raw)?;
        let body = MessageBody::from(&raw[offset..]);
        meta.body_length = body.len() as u64;

        Ok(Self {
            meta,
            mail_from: mail_from.into(),
            rcpt_to,
            header,
            body,
        })
    }
}

/// A recipient that did not get the message, and the reply explaining why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub recipient: String,
    pub reply: SmtpError,
}

/// A generated delivery status notification, ready to be queued for the
/// original sender.
#[derive(Debug, Clone)]
pub struct Bounce {
    pub header: Header,
    pub body: Vec<u8>,
}

impl Bounce {
    /// Header and body as one message.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header.to_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

/// Outcome of [`Courier::deliver`].
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Recipients the message was committed for, as given
    pub accepted: Vec<String>,
    pub rejected: Vec<Rejection>,
    pub bounce: Option<Bounce>,
}

/// The delivery core: a check group in front of local storage.
#[derive(Debug, Clone)]
pub struct Courier {
    hostname: String,
    checks: CheckGroup,
    storage: LocalStorage,
    dsn: DsnConfig,
}

impl Courier {
    #[must_use]
    pub fn new(
        hostname: impl Into<String>,
        checks: CheckGroup,
        storage: LocalStorage,
        dsn: DsnConfig,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            checks,
            storage,
            dsn,
        }
    }

    /// Build everything `config` describes, with the built-in checks
    /// available to it.
    ///
    /// # Errors
    /// If a check cannot be built, the resolver cannot be created or the
    /// storage cannot be opened
    pub fn from_config(config: CourierConfig) -> Result<Self, PipelineError> {
        let mut registry = CheckRegistry::new();
        register_builtin(&mut registry)?;
        let checks = CheckGroup::from_config(&registry, &config.checks)?;

        let resolver = HickoryResolver::new(Duration::from_secs(config.dns_timeout_secs))?;
        let storage = LocalStorage::from_config(config.storage, &config.state_dir, Arc::new(resolver))?;

        internal!(
            level = INFO,
            hostname = %config.hostname,
            checks = checks.len(),
            "Courier configured"
        );

        Ok(Self::new(config.hostname, checks, storage, config.dsn))
    }

    #[must_use]
    pub const fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    /// Run `message` through every check stage and into storage.
    ///
    /// Recipients refused by a check or by storage are reported individually
    /// and do not stop delivery to the rest. If any were refused and the
    /// sender can be notified, a report is generated for them.
    ///
    /// The check state is always closed, whatever the outcome.
    ///
    /// # Errors
    /// If the message as a whole was refused, cancelled, or storage failed;
    /// in every case nothing was committed
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(message_id = %message.meta.id, mail_from = %message.mail_from)
    )]
    pub async fn deliver(
        &self,
        message: InboundMessage,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport, PipelineError> {
        if message.rcpt_to.is_empty() {
            return Err(PipelineError::NoRecipients);
        }

        let arrival = Local::now().fixed_offset();
        let InboundMessage {
            mut meta,
            mail_from,
            rcpt_to,
            header,
            body,
        } = message;
        if meta.our_hostname.is_empty() {
            meta.our_hostname.clone_from(&self.hostname);
        }
        let meta = Arc::new(meta);

        incoming!(
            level = INFO,
            message_id = %meta.id,
            mail_from = %mail_from,
            recipients = rcpt_to.len(),
            "Delivering message"
        );

        let mut state = self.checks.start(&meta).await?;
        let result = self
            .run(&state, &meta, &mail_from, &rcpt_to, &header, &body, cancel)
            .await;

        if let Err(err) = state.close().await {
            warn!(message_id = %meta.id, error = %err, "Failed to close checks");
        }

        let mut report = result?;
        if !report.rejected.is_empty() {
            report.bounce = self.bounce(&meta, &mail_from, &header, &report.rejected, arrival);
        }

        internal!(
            level = INFO,
            message_id = %meta.id,
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            bounce = report.bounce.is_some(),
            "Message delivered"
        );

        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        state: &CheckGroupState,
        meta: &Arc<MsgMetadata>,
        mail_from: &str,
        rcpt_to: &[String],
        header: &Header,
        body: &MessageBody,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport, PipelineError> {
        state.check_connection(cancel).await?;
        state.check_sender(cancel, mail_from).await?;

        let mut txn = self.storage.start(Arc::clone(meta), mail_from).await?;
        let mut report = DeliveryReport::default();

        for rcpt in rcpt_to {
            let known = txn.accepted().count();
            let outcome = match state.check_rcpt(cancel, rcpt).await {
                Ok(()) => txn.add_rcpt(rcpt).await,
                Err(CheckError::Cancelled) => {
                    return Err(abort(txn, CheckError::Cancelled.into()).await);
                }
                Err(err) => Err(DeliveryError::Rejected(recipient_check_reply(err))),
            };

            match outcome {
                // Same account as an earlier recipient
                Ok(()) if txn.accepted().count() == known => {}
                Ok(()) => report.accepted.push(rcpt.clone()),
                Err(DeliveryError::Rejected(reply)) => {
                    incoming!(
                        level = INFO,
                        message_id = %meta.id,
                        rcpt = %rcpt,
                        reply = %reply,
                        "Recipient rejected"
                    );
                    report.rejected.push(Rejection {
                        recipient: rcpt.clone(),
                        reply,
                    });
                }
                Err(err) => return Err(abort(txn, err.into()).await),
            }
        }

        if report.accepted.is_empty() {
            txn.abort().await?;
            return Ok(report);
        }

        let shared = SharedHeader::from(header.clone());
        if let Err(err) = state.check_body(cancel, &shared, body).await {
            return Err(abort(txn, err.into()).await);
        }
        let header = shared.snapshot().await;

        if let Err(err) = txn.body(&header, body).await {
            return Err(abort(txn, err.into()).await);
        }
        txn.commit().await?;

        Ok(report)
    }

    fn bounce(
        &self,
        meta: &MsgMetadata,
        mail_from: &str,
        header: &Header,
        rejected: &[Rejection],
        arrival: DateTime<FixedOffset>,
    ) -> Option<Bounce> {
        let rcpts = rejected
            .iter()
            .map(|r| RecipientInfo::rejected(r.recipient.as_str(), r.reply.clone()))
            .collect::<Vec<_>>();

        if !should_generate_dsn(&self.dsn, mail_from, &rcpts) {
            internal!(message_id = %meta.id, "No delivery status notification needed");
            return None;
        }

        let envelope = Envelope {
            message_id: format!("<{}@{}>", ulid::Ulid::new(), self.dsn.reporting_mta),
            from: self.dsn.postmaster.clone(),
            to: mail_from.to_string(),
        };
        let mta_info = ReportingMtaInfo {
            reporting_mta: self.dsn.reporting_mta.clone(),
            received_from_mta: Some(meta.src_hostname.clone()).filter(|s| !s.is_empty()),
            sender: Some(mail_from.to_string()),
            message_id: Some(meta.id.clone()),
            arrival_date: Some(arrival),
            last_attempt_date: Some(Local::now().fixed_offset()),
        };

        let mut body = Vec::new();
        match generate_dsn(&envelope, &mta_info, &rcpts, header, &mut body) {
            Ok(header) => {
                outgoing!(
                    level = INFO,
                    message_id = %meta.id,
                    dsn_id = %envelope.message_id,
                    to = %envelope.to,
                    "Bounce generated"
                );
                Some(Bounce { header, body })
            }
            Err(err) => {
                warn!(message_id = %meta.id, error = %err, "Failed to generate bounce");
                None
            }
        }
    }
}

/// The reply for a recipient check that failed without one of its own.
fn recipient_check_reply(err: CheckError) -> SmtpError {
    match err {
        CheckError::Rejected(reply) => reply,
        other => {
            warn!(error = %other, "Recipient check failed");
            SmtpError::new(
                Status::ActionUnavailable,
                EnhancedCode::TEMPORARY_SYSTEM,
                "Temporary failure in recipient check",
            )
        }
    }
}

async fn abort(txn: DeliveryTransaction, err: PipelineError) -> PipelineError {
    if let Err(abort_err) = txn.abort().await {
        warn!(error = %abort_err, "Failed to abort delivery");
    }
    err
}
