use crate::relocation::{BulkAction, DEFAULT_MAX_CREDITS};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

/// Config file used when `RELOC_CONFIG` is not set
pub const DEFAULT_CONFIG_FILE: &str = "config/reloc.yaml";
/// Name of the parent slash command when nothing else is configured
pub const DEFAULT_BASE_COMMAND: &str = "reloc";

/// Bot configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    // Name of the parent slash command all subcommands hang off
    pub base_command: String,
    pub protection: ProtectionConfig,
    pub credit_policy: CreditPolicy,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            base_command: DEFAULT_BASE_COMMAND.to_string(),
            protection: ProtectionConfig::default(),
            credit_policy: CreditPolicy::default(),
        }
    }
}

/// Protection ledger settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    // Cap on credits a single grant can hold
    pub max_credits: u32,
    // How often expired grants are swept
    pub sweep_interval_ms: u64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            max_credits: DEFAULT_MAX_CREDITS,
            sweep_interval_ms: 1000,
        }
    }
}

impl ProtectionConfig {
    /// Credit cap for grants; a grant always holds at least one credit
    #[must_use]
    pub fn max_credits(&self) -> u32 {
        self.max_credits.max(1)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Whether bulk commands spend protection credits when they hit a protected member
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CreditPolicy {
    pub consume_on_disconnect: bool,
    pub consume_on_move: bool,
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self {
            consume_on_disconnect: true,
            consume_on_move: false,
        }
    }
}

impl CreditPolicy {
    #[must_use]
    pub const fn consumes_for(&self, action: &BulkAction) -> bool {
        match action {
            BulkAction::Disconnect { .. } => self.consume_on_disconnect,
            BulkAction::MoveTo { .. } => self.consume_on_move,
        }
    }
}

impl BotConfig {
    /// Parse a YAML document
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid YAML for this structure.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Apply the `BASE_COMMAND` override
    #[must_use]
    pub fn with_base_command(mut self, base_command: Option<String>) -> Self {
        if let Some(name) = base_command.filter(|name| !name.trim().is_empty()) {
            self.base_command = name.trim().to_lowercase();
        }
        self
    }

    /// Load configuration from the YAML file, then apply environment overrides.
    ///
    /// A missing file yields the defaults; a malformed one is logged and ignored.
    pub async fn load() -> Self {
        let path =
            std::env::var("RELOC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let config = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match Self::from_yaml(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {path}");
                    config
                }
                Err(e) => {
                    warn!("Ignoring malformed configuration in {path}: {e}");
                    Self::default()
                }
            },
            Err(_) => {
                info!("No configuration file at {path}, using defaults");
                Self::default()
            }
        };

        config.with_base_command(std::env::var("BASE_COMMAND").ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poise::serenity_prelude::ChannelId;

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.base_command, "reloc");
        assert_eq!(config.protection.max_credits, 10);
        assert_eq!(config.protection.sweep_interval(), Duration::from_secs(1));
        assert!(config.credit_policy.consume_on_disconnect);
        assert!(!config.credit_policy.consume_on_move);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "base_command: relocate\nprotection:\n  max_credits: 3\n";
        let config = BotConfig::from_yaml(yaml).expect("Failed to parse");
        assert_eq!(config.base_command, "relocate");
        assert_eq!(config.protection.max_credits, 3);
        assert_eq!(config.protection.sweep_interval_ms, 1000);
        assert!(config.credit_policy.consume_on_disconnect);
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        assert!(BotConfig::from_yaml("protection: [1, 2").is_err());
    }

    #[test]
    fn test_base_command_override() {
        let config = BotConfig::default().with_base_command(Some(" Move ".to_string()));
        assert_eq!(config.base_command, "move");

        let config = BotConfig::default().with_base_command(Some("   ".to_string()));
        assert_eq!(config.base_command, "reloc");

        let config = BotConfig::default().with_base_command(None);
        assert_eq!(config.base_command, "reloc");
    }

    #[test]
    fn test_credit_policy_per_action() {
        let policy = CreditPolicy {
            consume_on_disconnect: false,
            consume_on_move: true,
        };
        assert!(!policy.consumes_for(&BulkAction::disconnect("x")));
        assert!(policy.consumes_for(&BulkAction::move_to(ChannelId::new(1), "x")));
    }

    #[test]
    fn test_sweep_interval_never_zero() {
        let config = ProtectionConfig {
            max_credits: 1,
            sweep_interval_ms: 0,
        };
        assert_eq!(config.sweep_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_zero_max_credits_clamped_to_one() {
        let config =
            BotConfig::from_yaml("protection:\n  max_credits: 0\n").expect("Failed to parse");
        assert_eq!(config.protection.max_credits(), 1);

        let config =
            BotConfig::from_yaml("protection:\n  max_credits: 4\n").expect("Failed to parse");
        assert_eq!(config.protection.max_credits(), 4);
    }
}
