use std::time::Duration;

/// Preference value that is not a whole number of minutes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("preference '{name}' is not a whole number of minutes: {value:?}")]
pub struct ConfigParseError {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollInterval {
    Enabled(Duration),
    Disabled,
}

impl PollInterval {
    /// Anything `<= 0` disables polling.
    pub fn from_millis(ms: i64) -> Self {
        if ms <= 0 {
            Self::Disabled
        } else {
            Self::Enabled(Duration::from_millis(ms as u64))
        }
    }

    /// Parse a polling preference expressed in whole minutes.
    ///
    /// - missing or blank → `Ok(None)` (not configured yet)
    /// - not an integer → `ConfigParseError`
    /// - `<= 0` → `Disabled`
    /// - `n > 0` → `Enabled(n minutes)`
    pub fn from_preference(name: &str, raw: Option<&str>) -> Result<Option<Self>, ConfigParseError> {
        let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        let minutes: i64 = raw.parse().map_err(|_| ConfigParseError {
            name: name.to_string(),
            value: raw.to_string(),
        })?;
        Ok(Some(Self::from_millis(minutes.saturating_mul(60_000))))
    }

    /// Milliseconds, `0` when disabled.
    pub fn as_millis(&self) -> i64 {
        match self {
            Self::Enabled(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
            Self::Disabled => 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREF: &str = "AWS_Notifications_Polling_Interval";

    #[test]
    fn non_positive_values_disable() {
        assert_eq!(PollInterval::from_millis(0), PollInterval::Disabled);
        assert_eq!(PollInterval::from_millis(-5), PollInterval::Disabled);
        assert_eq!(
            PollInterval::from_preference(PREF, Some("0")),
            Ok(Some(PollInterval::Disabled))
        );
        assert_eq!(
            PollInterval::from_preference(PREF, Some("-3")),
            Ok(Some(PollInterval::Disabled))
        );
    }

    #[test]
    fn minutes_are_converted_to_millis() {
        let parsed = PollInterval::from_preference(PREF, Some(" 2 ")).unwrap().unwrap();
        assert_eq!(parsed, PollInterval::Enabled(Duration::from_secs(120)));
        assert_eq!(parsed.as_millis(), 120_000);
    }

    #[test]
    fn blank_means_not_configured() {
        assert_eq!(PollInterval::from_preference(PREF, None), Ok(None));
        assert_eq!(PollInterval::from_preference(PREF, Some("  ")), Ok(None));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = PollInterval::from_preference(PREF, Some("5min")).unwrap_err();
        assert_eq!(err.value, "5min");
        assert!(PollInterval::from_preference(PREF, Some("1.5")).is_err());
    }
}
