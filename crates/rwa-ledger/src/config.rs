//! Ledger gateway client configuration.
//!
//! The operator account pays for every submitted transaction and is also
//! the treasury that holds unsold fractions of every tokenized asset.

use url::Url;

use rwa_core::LedgerAccountId;

use crate::keys::SignerKey;

/// Network the gateway submits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerNetwork {
    /// Production network.
    Mainnet,
    /// Public test network.
    Testnet,
    /// Preview network.
    Previewnet,
    /// Local node.
    Local,
}

impl LedgerNetwork {
    /// Header value sent to the gateway.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Previewnet => "previewnet",
            Self::Local => "local",
        }
    }
}

impl std::str::FromStr for LedgerNetwork {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "previewnet" => Ok(Self::Previewnet),
            "local" => Ok(Self::Local),
            other => Err(ConfigError::Invalid {
                var: "LEDGER_NETWORK",
                reason: format!("unknown network {other:?}"),
            }),
        }
    }
}

/// Configuration for the ledger gateway client.
///
/// Custom `Debug` implementation redacts the operator key.
#[derive(Clone)]
pub struct LedgerConfig {
    /// Gateway base URL.
    pub gateway_url: Url,
    /// Target network.
    pub network: LedgerNetwork,
    /// Operator (payer and treasury) account.
    pub operator_id: LedgerAccountId,
    /// Operator signing key.
    pub operator_key: SignerKey,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerConfig")
            .field("gateway_url", &self.gateway_url)
            .field("network", &self.network)
            .field("operator_id", &self.operator_id)
            .field("operator_key", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `LEDGER_GATEWAY_URL` (default: `http://127.0.0.1:5551`)
    /// - `LEDGER_NETWORK` (default: `testnet`)
    /// - `LEDGER_OPERATOR_ID` (required)
    /// - `LEDGER_OPERATOR_KEY` (required, 64-hex Ed25519 seed)
    /// - `LEDGER_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let gateway_raw = lookup("LEDGER_GATEWAY_URL")
            .unwrap_or_else(|| "http://127.0.0.1:5551".to_string());
        let gateway_url = Url::parse(&gateway_raw).map_err(|e| ConfigError::Invalid {
            var: "LEDGER_GATEWAY_URL",
            reason: e.to_string(),
        })?;

        let network = match lookup("LEDGER_NETWORK") {
            Some(raw) => raw.parse()?,
            None => LedgerNetwork::Testnet,
        };

        let operator_raw =
            lookup("LEDGER_OPERATOR_ID").ok_or(ConfigError::Missing("LEDGER_OPERATOR_ID"))?;
        let operator_id =
            LedgerAccountId::new(&operator_raw).map_err(|e| ConfigError::Invalid {
                var: "LEDGER_OPERATOR_ID",
                reason: e.to_string(),
            })?;

        let key_raw =
            lookup("LEDGER_OPERATOR_KEY").ok_or(ConfigError::Missing("LEDGER_OPERATOR_KEY"))?;
        let operator_key = SignerKey::from_seed_hex(&key_raw).map_err(|e| ConfigError::Invalid {
            var: "LEDGER_OPERATOR_KEY",
            reason: e.to_string(),
        })?;

        let timeout_secs = match lookup("LEDGER_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "LEDGER_TIMEOUT_SECS",
                reason: format!("not a number of seconds: {raw:?}"),
            })?,
            None => 30,
        };

        Ok(Self {
            gateway_url,
            network,
            operator_id,
            operator_key,
            timeout_secs,
        })
    }

    /// Configuration pointing at a local mock gateway (for testing).
    pub fn local_mock(base_url: &str, operator_id: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            gateway_url: Url::parse(base_url).map_err(|e| ConfigError::Invalid {
                var: "LEDGER_GATEWAY_URL",
                reason: e.to_string(),
            })?,
            network: LedgerNetwork::Local,
            operator_id: LedgerAccountId::new(operator_id).map_err(|e| ConfigError::Invalid {
                var: "LEDGER_OPERATOR_ID",
                reason: e.to_string(),
            })?,
            operator_key: SignerKey::generate(),
            timeout_secs: 5,
        })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset.
    #[error("{0} environment variable is required")]
    Missing(&'static str),
    /// A variable is set but unusable.
    #[error("invalid value for {var}: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    #[test]
    fn test_defaults_applied() {
        let cfg = LedgerConfig::from_lookup(lookup(&[
            ("LEDGER_OPERATOR_ID", "0.0.2"),
            ("LEDGER_OPERATOR_KEY", SEED),
        ]))
        .unwrap();
        assert_eq!(cfg.gateway_url.as_str(), "http://127.0.0.1:5551/");
        assert_eq!(cfg.network, LedgerNetwork::Testnet);
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.operator_id.as_str(), "0.0.2");
    }

    #[test]
    fn test_missing_operator() {
        let err = LedgerConfig::from_lookup(lookup(&[("LEDGER_OPERATOR_KEY", SEED)])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("LEDGER_OPERATOR_ID"));
    }

    #[test]
    fn test_invalid_network_and_timeout() {
        let err = LedgerConfig::from_lookup(lookup(&[
            ("LEDGER_OPERATOR_ID", "0.0.2"),
            ("LEDGER_OPERATOR_KEY", SEED),
            ("LEDGER_NETWORK", "moonnet"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "LEDGER_NETWORK", .. }));

        let err = LedgerConfig::from_lookup(lookup(&[
            ("LEDGER_OPERATOR_ID", "0.0.2"),
            ("LEDGER_OPERATOR_KEY", SEED),
            ("LEDGER_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "LEDGER_TIMEOUT_SECS", .. }));
    }

    #[test]
    fn test_debug_redacts_operator_key() {
        let cfg = LedgerConfig::from_lookup(lookup(&[
            ("LEDGER_OPERATOR_ID", "0.0.2"),
            ("LEDGER_OPERATOR_KEY", SEED),
        ]))
        .unwrap();
        let debug = format!("{cfg:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(SEED));
    }
}
