use std::io::Write;

use chrono::{DateTime, FixedOffset, Local};
use courier_common::{Header, outgoing};

use crate::{DsnError, Envelope, MultipartWriter, RecipientInfo, ReportingMtaInfo, report::DATE_FORMAT};

pub const SUBJECT: &str = "Undelivered Mail Returned to Sender";

/// Build a delivery status notification (RFC 3464, RFC 3462).
///
/// The multipart body is written to `out` and the report's own header is
/// returned. The body has three parts: a notice for humans, the
/// `message/delivery-status` report, and `failed_header` verbatim.
///
/// All inputs are validated before anything is written.
///
/// # Errors
/// [`DsnError`] if a mandatory field is missing or `out` fails; in either
/// case whatever reached `out` must be discarded
pub fn generate_dsn<W: Write + ?Sized>(
    envelope: &Envelope,
    mta_info: &ReportingMtaInfo,
    rcpts: &[RecipientInfo],
    failed_header: &Header,
    out: &mut W,
) -> Result<Header, DsnError> {
    generate_dsn_at(
        Local::now().fixed_offset(),
        envelope,
        mta_info,
        rcpts,
        failed_header,
        out,
    )
}

/// [`generate_dsn`] with an explicit `Date`.
///
/// # Errors
/// As for [`generate_dsn`]
pub fn generate_dsn_at<W: Write + ?Sized>(
    now: DateTime<FixedOffset>,
    envelope: &Envelope,
    mta_info: &ReportingMtaInfo,
    rcpts: &[RecipientInfo],
    failed_header: &Header,
    out: &mut W,
) -> Result<Header, DsnError> {
    mta_info.validate()?;
    rcpts.iter().try_for_each(RecipientInfo::validate)?;

    let mut writer = MultipartWriter::new(out);

    let mut header = Header::new();
    header.add("Date", now.format(DATE_FORMAT).to_string());
    header.add("Message-Id", envelope.message_id.as_str());
    header.add("Content-Transfer-Encoding", "8bit");
    header.add(
        "Content-Type",
        format!(
            "multipart/report; report-type=delivery-status; boundary={}",
            writer.boundary()
        ),
    );
    header.add("MIME-Version", "1.0");
    header.add("Auto-Submitted", "auto-replied");
    header.add("To", envelope.to.as_str());
    header.add("From", envelope.from.as_str());
    header.add("Subject", SUBJECT);

    write_notice(&mut writer, mta_info, rcpts)?;
    write_status(&mut writer, mta_info, rcpts)?;

    let part = writer.create_part(&Header::from_iter([
        ("Content-Description", "Undelivered message header"),
        ("Content-Type", "message/rfc822-headers"),
        ("Content-Transfer-Encoding", "8bit"),
    ]))?;
    failed_header.write_to(part)?;
    writer.close()?;

    outgoing!(
        level = INFO,
        message_id = %envelope.message_id,
        to = %envelope.to,
        recipients = rcpts.len(),
        "Generated delivery status notification"
    );

    Ok(header)
}

fn write_notice<W: Write>(
    writer: &mut MultipartWriter<W>,
    mta_info: &ReportingMtaInfo,
    rcpts: &[RecipientInfo],
) -> Result<(), DsnError> {
    let part = writer.create_part(&Header::from_iter([
        ("Content-Transfer-Encoding", "8bit"),
        ("Content-Type", "text/plain; encoding=utf-8"),
        ("Content-Description", "Notification"),
    ]))?;

    let date = |date: Option<DateTime<FixedOffset>>| {
        date.map_or_else(|| String::from("unknown"), |d| d.format(DATE_FORMAT).to_string())
    };

    write!(
        part,
        "\r\n\
         This is the mail delivery system at {mta}.\r\n\
         \r\n\
         Unfortunately, your message could not be delivered to one or more\r\n\
         recipients. The usual cause of this problem is an invalid\r\n\
         recipient address or maintenance at the recipient side.\r\n\
         \r\n\
         Contact the postmaster for further assistance, provide the Message ID (below):\r\n\
         \r\n\
         Message ID: {id}\r\n\
         Arrival: {arrival}\r\n\
         Last delivery attempt: {last}\r\n\
         \r\n",
        mta = mta_info.reporting_mta,
        id = mta_info.message_id.as_deref().unwrap_or_default(),
        arrival = date(mta_info.arrival_date),
        last = date(mta_info.last_attempt_date),
    )?;

    for rcpt in rcpts {
        match rcpt.remote_mta.as_deref().filter(|s| !s.is_empty()) {
            Some(remote) => write!(
                part,
                "Delivery to {} ({remote}) failed with error: {}\r\n",
                rcpt.final_recipient, rcpt.diagnostic_code
            )?,
            None => write!(
                part,
                "Delivery to {} failed with error: {}\r\n",
                rcpt.final_recipient, rcpt.diagnostic_code
            )?,
        }
    }

    Ok(())
}

fn write_status<W: Write>(
    writer: &mut MultipartWriter<W>,
    mta_info: &ReportingMtaInfo,
    rcpts: &[RecipientInfo],
) -> Result<(), DsnError> {
    let part = writer.create_part(&Header::from_iter([
        ("Content-Type", "message/delivery-status"),
        ("Content-Description", "Delivery report"),
    ]))?;

    mta_info.write_to(part)?;
    rcpts.iter().try_for_each(|rcpt| rcpt.write_to(part))
}
