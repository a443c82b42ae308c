//! `Received` trace field synthesis (RFC 5321 section 4.4).

use chrono::{DateTime, FixedOffset};
use courier_common::{MsgMetadata, address::sanitize};

use crate::resolver::{Resolver, lookup_name};

/// RFC 1123 date with a numeric zone, e.g. `Mon, 02 Jan 2006 15:04:05 -0700`.
pub const RFC1123Z: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Build the value of the `Received` field for one recipient.
///
/// ```text
/// from <src-host> (<rdns> [<ip>]) by <our-host> (envelope-sender <from>)
///     with <proto> id <msg-id> for <rcpt>; <date>
/// ```
///
/// The parenthesised peer segment is only present for IP peers, and drops the
/// name when the reverse lookup fails. The whole `from` clause is left out
/// when the sender asked not to be traced.
pub async fn generate(
    resolver: &dyn Resolver,
    meta: &MsgMetadata,
    mail_from: &str,
    rcpt_to: &str,
    now: DateTime<FixedOffset>,
) -> String {
    let mut received = String::new();

    if !meta.dont_trace_sender {
        received.push_str("from ");
        received.push_str(&sanitize(&meta.src_hostname));

        if let Some(addr) = meta.src_addr {
            let ip = addr.ip();
            match lookup_name(resolver, ip).await {
                Some(name) => received.push_str(&format!(" ({} [{ip}])", sanitize(&name))),
                None => received.push_str(&format!(" ([{ip}])")),
            }
        }

        received.push(' ');
    }

    received.push_str(&format!(
        "by {} (envelope-sender <{}>) with {} id {} for {}; {}",
        sanitize(&meta.our_hostname),
        sanitize(mail_from),
        sanitize(&meta.src_proto),
        sanitize(&meta.id),
        sanitize(rcpt_to),
        now.format(RFC1123Z),
    ));

    received
}
