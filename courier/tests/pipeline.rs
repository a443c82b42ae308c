#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use courier::{Courier, CourierConfig, InboundMessage, PipelineError, Rejection};
use courier_check::{
    Check, CheckConfig, CheckError, CheckGroup, CheckRegistry, CheckResult, CheckState,
    RegistryError, builtin::register_builtin,
};
use courier_common::{EnhancedCode, MessageBody, MsgMetadata, SharedHeader, SmtpError, Status};
use courier_dsn::DsnConfig;
use courier_storage::{
    DeliveryError, INBOX, LocalStorage, MailStore, StaticResolver, StorageConfig, StoreCall,
    StoreError, TestStore,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const PEER: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

/// Refuses one recipient, stamps the header, and counts closes.
#[derive(Debug, Default)]
struct Gatekeeper {
    closed: Arc<AtomicUsize>,
}

struct GatekeeperState {
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl Check for Gatekeeper {
    fn name(&self) -> &str {
        "gatekeeper"
    }

    async fn new_message(
        &self,
        _meta: &Arc<MsgMetadata>,
    ) -> Result<Box<dyn CheckState>, CheckError> {
        Ok(Box::new(GatekeeperState {
            closed: Arc::clone(&self.closed),
        }))
    }
}

#[async_trait]
impl CheckState for GatekeeperState {
    async fn check_rcpt(&self, cancel: &CancellationToken, to: &str) -> CheckResult {
        match to {
            "carol@example.org" => Err(SmtpError::new(
                Status::Error,
                EnhancedCode::SECURITY_POLICY,
                "Recipient not allowed",
            )
            .into()),
            "dave@example.org" => Err(CheckError::Internal(String::from("policy server down"))),
            "wait@example.org" => {
                cancel.cancelled().await;
                Err(CheckError::Cancelled)
            }
            _ => Ok(()),
        }
    }

    async fn check_body(
        &self,
        _cancel: &CancellationToken,
        header: &SharedHeader,
        _body: &MessageBody,
    ) -> CheckResult {
        header.write().await.add("X-Gatekeeper", "passed");
        Ok(())
    }

    async fn close(&mut self) -> CheckResult {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    courier: Courier,
    store: TestStore,
    closed: Arc<AtomicUsize>,
}

async fn harness(configs: &[CheckConfig]) -> Harness {
    let store = TestStore::new();
    for account in ["bob", "carol", "dave", "wait"] {
        store.create_account(account).await.unwrap();
    }

    let mut registry = CheckRegistry::new();
    register_builtin(&mut registry).unwrap();
    let mut checks = configs
        .iter()
        .map(|config| registry.build(config).unwrap())
        .collect::<Vec<Arc<dyn Check>>>();

    let gatekeeper = Gatekeeper::default();
    let closed = Arc::clone(&gatekeeper.closed);
    checks.push(Arc::new(gatekeeper));

    let resolver = StaticResolver::new().with(PEER, "mail.example.net.");
    let storage = LocalStorage::new(
        StorageConfig::default(),
        Arc::new(store.clone()),
        Arc::new(resolver),
    );
    let dsn = DsnConfig {
        enabled: true,
        reporting_mta: String::from("mx.example.com"),
        postmaster: String::from("postmaster@example.com"),
    };

    Harness {
        courier: Courier::new("mx.example.com", CheckGroup::new(checks), storage, dsn),
        store,
        closed,
    }
}

fn message(mail_from: &str, rcpt_to: &[&str]) -> InboundMessage {
    let meta = MsgMetadata {
        id: String::from("abc123"),
        src_proto: String::from("ESMTP"),
        src_hostname: String::from("mail.example.net"),
        src_addr: Some(SocketAddr::new(PEER, 40_000)),
        ..MsgMetadata::default()
    };

    InboundMessage::from_raw(
        meta,
        mail_from,
        rcpt_to.iter().map(ToString::to_string).collect(),
        b"From: alice@example.com\r\n\
          To: bob@example.org\r\n\
          Subject: Lunch\r\n\
          \r\n\
          See you at noon.\r\n",
    )
    .unwrap()
}

#[tokio::test]
async fn test_all_recipients_delivered() {
    let h = harness(&[]).await;

    let report = h
        .courier
        .deliver(message("alice@example.com", &["bob@example.org"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.accepted, vec![String::from("bob@example.org")]);
    assert!(report.rejected.is_empty());
    assert!(report.bounce.is_none());
    assert_eq!(h.closed.load(Ordering::SeqCst), 1);

    let stored = h.store.inner().messages("bob", INBOX).unwrap();
    assert_eq!(stored.len(), 1);
    let header = &stored[0].header;
    assert_eq!(header.get("Subject"), Some("Lunch"));
    assert_eq!(header.get("X-Gatekeeper"), Some("passed"));
    assert_eq!(header.get("Return-Path"), Some("<alice@example.com>"));
    assert!(
        header
            .get("Received")
            .unwrap()
            .starts_with("from mail.example.net (mail.example.net [203.0.113.7]) by mx.example.com ")
    );
    assert_eq!(stored[0].body.as_bytes(), b"See you at noon.\r\n");
}

#[tokio::test]
async fn test_partial_delivery_bounces() {
    let h = harness(&[]).await;

    let report = h
        .courier
        .deliver(
            message(
                "alice@example.com",
                &["bob@example.org", "nobody@example.org", "carol@example.org"],
            ),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.accepted, vec![String::from("bob@example.org")]);
    assert_eq!(
        report.rejected,
        vec![
            Rejection {
                recipient: String::from("nobody@example.org"),
                reply: SmtpError::no_such_user(),
            },
            Rejection {
                recipient: String::from("carol@example.org"),
                reply: SmtpError::new(
                    Status::Error,
                    EnhancedCode::SECURITY_POLICY,
                    "Recipient not allowed"
                ),
            },
        ]
    );

    // A recipient refused by a check never reaches storage
    assert!(!h.store.calls().contains(&StoreCall::AddRcpt {
        account: String::from("carol")
    }));
    assert_eq!(h.store.calls().last(), Some(&StoreCall::Commit));

    let bounce = report.bounce.expect("bounce for refused recipients");
    assert_eq!(bounce.header.get("To"), Some("alice@example.com"));
    assert_eq!(bounce.header.get("From"), Some("postmaster@example.com"));
    assert!(
        bounce
            .header
            .get("Message-Id")
            .unwrap()
            .ends_with("@mx.example.com>")
    );

    let raw = bounce.to_bytes();
    let parsed = mailparse::parse_mail(&raw).unwrap();
    assert_eq!(parsed.ctype.mimetype, "multipart/report");
    assert_eq!(parsed.subparts.len(), 3);

    let status = parsed.subparts[1].get_body().unwrap();
    let lines = status.lines().collect::<Vec<_>>();
    for expected in [
        "Reporting-MTA: dns; mx.example.com",
        "Received-From-MTA: dns; mail.example.net",
        "X-Maddy-Sender: rfc822; alice@example.com",
        "X-Maddy-MsgID: abc123",
        "Final-Recipient: rfc822; nobody@example.org",
        "Diagnostic-Code: smtp; 550 5.1.1 User doesn't exist",
        "Final-Recipient: rfc822; carol@example.org",
        "Diagnostic-Code: smtp; 550 5.7.1 Recipient not allowed",
    ] {
        assert!(lines.contains(&expected), "missing line {expected:?}");
    }

    let original = parsed.subparts[2].get_body().unwrap();
    assert!(original.contains("Subject: Lunch"));
}

#[tokio::test]
async fn test_null_sender_is_not_bounced() {
    let h = harness(&[]).await;

    let report = h
        .courier
        .deliver(
            message("", &["bob@example.org", "nobody@example.org"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.rejected.len(), 1);
    assert!(report.bounce.is_none());
}

#[tokio::test]
async fn test_failed_recipient_check_is_temporary() {
    let h = harness(&[]).await;

    let report = h
        .courier
        .deliver(
            message("alice@example.com", &["dave@example.org"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.accepted.is_empty());
    let reply = &report.rejected[0].reply;
    assert_eq!(u16::from(reply.status), 451);
    assert_eq!(reply.enhanced, EnhancedCode::TEMPORARY_SYSTEM);

    // Nothing was accepted, so nothing is written
    assert_eq!(h.store.calls().last(), Some(&StoreCall::Abort));
    assert!(
        !h.store
            .calls()
            .iter()
            .any(|call| matches!(call, StoreCall::BodyParsed { .. }))
    );

    let bounce = report.bounce.expect("delayed recipients are reported");
    assert!(
        String::from_utf8(bounce.body)
            .unwrap()
            .contains("Action: delayed\r\n")
    );
}

#[tokio::test]
async fn test_blocklisted_sender_refuses_message() {
    let h = harness(&[CheckConfig::new("sender_blocklist").with_args(["alice@example.com"])]).await;

    let err = h
        .courier
        .deliver(message("alice@example.com", &["bob@example.org"]), &CancellationToken::new())
        .await
        .unwrap_err();

    let reply = err.rejection().expect("sender rejection");
    assert_eq!(reply.enhanced, EnhancedCode::SECURITY_POLICY);
    assert!(h.store.calls().is_empty());
    assert_eq!(h.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_quarantine_routes_to_junk() {
    let h = harness(&[CheckConfig::new("quarantine_if_header").with_args(["Subject"])]).await;

    h.courier
        .deliver(message("alice@example.com", &["bob@example.org"]), &CancellationToken::new())
        .await
        .unwrap();

    assert!(h.store.inner().messages("bob", INBOX).unwrap().is_empty());
    assert_eq!(h.store.inner().messages("bob", "Junk").unwrap().len(), 1);
}

#[tokio::test]
async fn test_storage_failure_aborts() {
    let h = harness(&[]).await;
    h.store.fail_commits(true);

    let err = h
        .courier
        .deliver(message("alice@example.com", &["bob@example.org"]), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Delivery(DeliveryError::Store(StoreError::Backend(_)))
    ));
    assert!(err.rejection().is_none());
    assert_eq!(h.store.calls().last(), Some(&StoreCall::Abort));
    assert!(h.store.inner().messages("bob", INBOX).unwrap().is_empty());
    assert_eq!(h.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recipient_listed_twice_is_reported_once() {
    let h = harness(&[]).await;

    let report = h
        .courier
        .deliver(
            message("alice@example.com", &["bob@example.org", "BOB@example.org"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.accepted, vec![String::from("bob@example.org")]);
    assert!(report.rejected.is_empty());
    assert_eq!(h.store.inner().messages("bob", INBOX).unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancelled_delivery() {
    let h = harness(&[]).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .courier
        .deliver(
            message("alice@example.com", &["bob@example.org", "wait@example.org"]),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(h.store.calls().last(), Some(&StoreCall::Abort));
    assert!(h.store.inner().messages("bob", INBOX).unwrap().is_empty());
    assert_eq!(h.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_recipients() {
    let h = harness(&[]).await;

    let err = h
        .courier
        .deliver(message("alice@example.com", &[]), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoRecipients));
    assert_eq!(h.closed.load(Ordering::SeqCst), 0);
}

#[test]
fn test_from_raw() {
    let message = message("alice@example.com", &["bob@example.org"]);

    assert_eq!(message.header.len(), 3);
    assert_eq!(message.header.get("to"), Some("bob@example.org"));
    assert_eq!(message.body.as_bytes(), b"See you at noon.\r\n");
    assert_eq!(message.meta.body_length, 18);
}

#[test]
fn test_unknown_check_in_config() {
    let config =
        CourierConfig::from_ron(r#"(hostname: "mx.example.com", checks: [(name: "greylist")])"#)
            .unwrap();

    assert!(matches!(
        Courier::from_config(config),
        Err(PipelineError::Registry(RegistryError::UnknownCheck(name))) if name == "greylist"
    ));
}
