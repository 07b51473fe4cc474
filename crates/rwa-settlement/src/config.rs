//! Engine configuration.

use std::time::Duration;

use rwa_ledger::ConfigError;

/// Tuning for the settlement core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Permits for concurrent treasury-signed ledger calls (mint, transfer).
    pub treasury_concurrency: usize,
    /// Status polls before an unknown ledger outcome is reported unconfirmed.
    pub status_checks: u32,
    /// Delay between status polls.
    pub status_poll_interval: Duration,
    /// Prefix of the memo attached to every token issuance.
    pub token_memo_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            treasury_concurrency: 4,
            status_checks: 3,
            status_poll_interval: Duration::from_millis(500),
            token_memo_prefix: "rwa-asset".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `RWA_TREASURY_CONCURRENCY` (default: 4)
    /// - `RWA_STATUS_CHECKS` (default: 3)
    /// - `RWA_STATUS_POLL_MS` (default: 500)
    /// - `RWA_TOKEN_MEMO_PREFIX` (default: `rwa-asset`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let treasury_concurrency: usize =
            parse_or(&lookup, "RWA_TREASURY_CONCURRENCY", defaults.treasury_concurrency)?;
        if treasury_concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "RWA_TREASURY_CONCURRENCY",
                reason: "must be at least 1".into(),
            });
        }

        let status_checks: u32 = parse_or(&lookup, "RWA_STATUS_CHECKS", defaults.status_checks)?;
        let poll_ms: u64 = parse_or(&lookup, "RWA_STATUS_POLL_MS", 500)?;

        let token_memo_prefix = match lookup("RWA_TOKEN_MEMO_PREFIX") {
            Some(raw) if raw.trim().is_empty() => {
                return Err(ConfigError::Invalid {
                    var: "RWA_TOKEN_MEMO_PREFIX",
                    reason: "must be non-empty".into(),
                })
            }
            Some(raw) => raw.trim().to_string(),
            None => defaults.token_memo_prefix,
        };

        Ok(Self {
            treasury_concurrency,
            status_checks,
            status_poll_interval: Duration::from_millis(poll_ms),
            token_memo_prefix,
        })
    }

    /// Configuration for tests: no delay between status polls.
    pub fn for_tests() -> Self {
        Self {
            status_poll_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("not a number: {raw:?}"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.treasury_concurrency, 4);
        assert_eq!(cfg.status_checks, 3);
        assert_eq!(cfg.token_memo_prefix, "rwa-asset");
    }

    #[test]
    fn test_overrides() {
        let cfg = EngineConfig::from_lookup(|name| match name {
            "RWA_TREASURY_CONCURRENCY" => Some("1".into()),
            "RWA_STATUS_CHECKS" => Some(" 5 ".into()),
            "RWA_STATUS_POLL_MS" => Some("0".into()),
            "RWA_TOKEN_MEMO_PREFIX" => Some("harbour".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.treasury_concurrency, 1);
        assert_eq!(cfg.status_checks, 5);
        assert_eq!(cfg.status_poll_interval, Duration::ZERO);
        assert_eq!(cfg.token_memo_prefix, "harbour");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = EngineConfig::from_lookup(|name| {
            (name == "RWA_TREASURY_CONCURRENCY").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "RWA_TREASURY_CONCURRENCY",
                ..
            }
        ));
    }

    #[test]
    fn test_non_numeric_rejected() {
        let err =
            EngineConfig::from_lookup(|name| (name == "RWA_STATUS_CHECKS").then(|| "many".into()))
                .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "RWA_STATUS_CHECKS", .. }));
    }
}
