use serde::Deserialize;

use crate::RecipientInfo;

/// Delivery status notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DsnConfig {
    /// Send reports at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Name used in `Reporting-MTA`
    pub reporting_mta: String,
    /// Address reports are sent from
    pub postmaster: String,
}

const fn default_enabled() -> bool {
    true
}

impl Default for DsnConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reporting_mta: String::from("localhost"),
            postmaster: String::from("postmaster@localhost"),
        }
    }
}

/// Whether a report should be sent back to `sender` for these outcomes.
///
/// Never for the null sender (`<>`), which would risk a bounce loop, and
/// only when at least one recipient failed or was delayed.
#[must_use]
pub fn should_generate_dsn(config: &DsnConfig, sender: &str, rcpts: &[RecipientInfo]) -> bool {
    if !config.enabled {
        return false;
    }

    let sender = sender.trim();
    if sender.is_empty() || sender == "<>" {
        return false;
    }

    rcpts.iter().any(|rcpt| rcpt.action.is_failure())
}
