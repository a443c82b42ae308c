//! Deliver one message, read from stdin, into local mailboxes.
//!
//! Recipients that could not be reached are listed on stdout with their
//! reply. If a bounce was generated it can be written to a file for the
//! outbound queue to pick up.

use std::path::PathBuf;

use clap::Parser;
use courier::{Courier, CourierConfig, InboundMessage, find_config_file};
use courier_common::{MsgMetadata, logging};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "courier-deliver")]
#[command(about = "Deliver a message from stdin into local mailboxes", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Envelope sender, empty for the null sender
    #[arg(short, long, default_value = "")]
    from: String,

    /// Write a generated bounce to this file
    #[arg(long)]
    bounce: Option<PathBuf>,

    /// Envelope recipients
    #[arg(required = true)]
    recipients: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config_path = match cli.config {
        Some(path) => path,
        None => find_config_file()?,
    };
    let config = CourierConfig::load(&config_path)?;
    let hostname = config.hostname.clone();
    let courier = Courier::from_config(config)?;

    let mut raw = Vec::new();
    tokio::io::stdin().read_to_end(&mut raw).await?;

    let meta = MsgMetadata {
        id: ulid::Ulid::new().to_string(),
        src_proto: String::from("local"),
        our_hostname: hostname,
        ..MsgMetadata::default()
    };
    let message = InboundMessage::from_raw(meta, cli.from, cli.recipients, &raw)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let report = courier.deliver(message, &cancel).await?;

    for rcpt in &report.accepted {
        println!("{rcpt}: delivered");
    }
    for rejection in &report.rejected {
        println!("{}: {}", rejection.recipient, rejection.reply);
    }

    if let (Some(path), Some(bounce)) = (cli.bounce, &report.bounce) {
        tokio::fs::write(&path, bounce.to_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write bounce to {}: {}", path.display(), e))?;
    }

    if report.accepted.is_empty() {
        anyhow::bail!("No recipient accepted the message");
    }

    Ok(())
}
