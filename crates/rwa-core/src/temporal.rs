//! # Temporal Types — Review and Settlement Instants
//!
//! `Timestamp` records when an identity or asset was reviewed and when a
//! trade settled. Values are UTC at whole-second precision and always
//! render as `YYYY-MM-DDTHH:MM:SSZ`, which is also the form the ledger
//! gateway reports consensus times in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RwaError;

const RENDER_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// UTC instant at whole-second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current instant.
    pub fn now() -> Self {
        Self::from_utc(Utc::now())
    }

    /// Wrap a `chrono` instant, dropping the sub-second part.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(DateTime::from_timestamp(dt.timestamp(), 0).unwrap_or(dt))
    }

    /// Parse `YYYY-MM-DDTHH:MM:SS[.fraction]Z`.
    ///
    /// Explicit offsets are refused, `+00:00` included: the ledger and the
    /// store only ever emit the `Z` form, so anything else is a foreign value.
    pub fn parse(raw: &str) -> Result<Self, RwaError> {
        if !raw.ends_with('Z') {
            return Err(RwaError::Validation(format!(
                "timestamp must be UTC with a Z suffix, got {raw:?}"
            )));
        }
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| Self::from_utc(dt.with_timezone(&Utc)))
            .map_err(|e| RwaError::Validation(format!("malformed timestamp {raw:?}: {e}")))
    }

    /// The underlying `chrono` value, for database binding.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn to_iso8601(&self) -> String {
        self.0.format(RENDER_FORMAT).to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(RENDER_FORMAT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_settlement_time_drops_fraction() {
        let settled = Utc
            .with_ymd_and_hms(2026, 3, 2, 9, 15, 7)
            .unwrap()
            .with_nanosecond(987_000_000)
            .unwrap();
        let ts = Timestamp::from_utc(settled);
        assert_eq!(ts.to_string(), "2026-03-02T09:15:07Z");
        assert_eq!(ts.as_datetime().nanosecond(), 0);
    }

    #[test]
    fn test_gateway_consensus_time_parses() {
        let ts = Timestamp::parse("2026-01-15T12:00:00.000000001Z").unwrap();
        assert_eq!(ts.to_iso8601(), "2026-01-15T12:00:00Z");
    }

    #[test]
    fn test_offsets_are_refused() {
        for raw in ["2026-01-15T12:00:00+00:00", "2026-01-15T17:00:00+05:00", "yesterday"] {
            assert!(matches!(Timestamp::parse(raw), Err(RwaError::Validation(_))), "{raw}");
        }
    }

    #[test]
    fn test_review_precedes_settlement() {
        let reviewed = Timestamp::parse("2026-01-15T12:00:00Z").unwrap();
        let settled = Timestamp::parse("2026-01-15T12:00:01Z").unwrap();
        assert!(reviewed < settled);
        assert!(Timestamp::now() > settled);
    }
}
