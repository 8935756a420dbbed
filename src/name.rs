//! Backup object naming.
//!
//! Archives are stored as `backup-<RFC3339Nano>.tar.gz`. The timestamp uses
//! the RFC3339Nano layout (`2006-01-02T15:04:05.999999999Z07:00`): up to nine
//! fractional digits with trailing zeros removed, no fraction at all when the
//! instant falls on a whole second. Cleanup recovers the creation time from
//! this name, so existing buckets depend on the exact rendering.

use std::fmt;

use chrono::{DateTime, FixedOffset, Timelike, Utc};

/// Fixed prefix of every backup object.
pub const PREFIX: &str = "backup-";

/// Fixed suffix of every backup object.
pub const SUFFIX: &str = ".tar.gz";

/// Errors from recovering a timestamp out of an object name.
#[derive(Debug, thiserror::Error)]
pub enum NameError {
    /// The name cannot hold a prefix, a suffix and anything in between.
    #[error("object name is too short ({len} bytes)")]
    TooShort { len: usize },

    /// The name lacks the `backup-` prefix or the `.tar.gz` suffix.
    #[error("object name does not start with \"backup-\" and end with \".tar.gz\"")]
    NotABackup,

    /// The timestamp between prefix and suffix is not valid RFC3339.
    #[error("invalid timestamp {stamp:?}")]
    Timestamp {
        stamp: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Name of a backup object in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectName(String);

impl ObjectName {
    /// Builds the object name for an archive created at `created_at`.
    pub fn for_time(created_at: DateTime<Utc>) -> Self {
        Self(format!("{PREFIX}{}{SUFFIX}", format_rfc3339_nano(created_at)))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recovers the creation time encoded in this name.
    pub fn backup_time(&self) -> Result<DateTime<FixedOffset>, NameError> {
        backup_time(&self.0)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Renders `t` with the RFC3339Nano layout.
pub fn format_rfc3339_nano(t: DateTime<Utc>) -> String {
    let mut out = t.format("%Y-%m-%dT%H:%M:%S").to_string();

    // Leap seconds are folded into the preceding second.
    let nanos = t.nanosecond() % 1_000_000_000;
    if nanos != 0 {
        let digits = format!("{nanos:09}");
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }

    out.push('Z');
    out
}

/// Extracts the creation time from an object name.
///
/// The timestamp is whatever lies between [`PREFIX`] and [`SUFFIX`]. Names
/// without both are rejected rather than guessed at.
pub fn backup_time(name: &str) -> Result<DateTime<FixedOffset>, NameError> {
    let len = name.len();
    if len <= PREFIX.len() + SUFFIX.len() {
        return Err(NameError::TooShort { len });
    }

    let stamp = name
        .strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_suffix(SUFFIX))
        .ok_or(NameError::NotABackup)?;

    DateTime::parse_from_rfc3339(stamp).map_err(|source| NameError::Timestamp {
        stamp: stamp.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(secs: i64, nanos: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, nanos).unwrap()
    }

    #[test]
    fn test_whole_second_has_no_fraction() {
        let name = ObjectName::for_time(utc(1_588_336_496, 0));
        assert_eq!(name.as_str(), "backup-2020-05-01T12:34:56Z.tar.gz");
    }

    #[test]
    fn test_fraction_trailing_zeros_trimmed() {
        let name = ObjectName::for_time(utc(1_588_336_496, 120_000_000));
        assert_eq!(name.as_str(), "backup-2020-05-01T12:34:56.12Z.tar.gz");

        let name = ObjectName::for_time(utc(1_588_336_496, 123_456_789));
        assert_eq!(name.as_str(), "backup-2020-05-01T12:34:56.123456789Z.tar.gz");

        let name = ObjectName::for_time(utc(1_588_336_496, 1_000));
        assert_eq!(name.as_str(), "backup-2020-05-01T12:34:56.000001Z.tar.gz");
    }

    #[test]
    fn test_name_recovers_creation_time() {
        let created = utc(1_700_000_000, 987_654_321);
        let name = ObjectName::for_time(created);
        let parsed = name.backup_time().unwrap();
        assert_eq!(parsed.with_timezone(&Utc), created);
    }

    #[test]
    fn test_parses_names_with_offsets() {
        let parsed = backup_time("backup-2020-05-01T07:34:56.5-05:00.tar.gz").unwrap();
        assert_eq!(parsed.with_timezone(&Utc), utc(1_588_336_496, 500_000_000));
    }

    #[test]
    fn test_too_short_name_is_rejected() {
        assert!(matches!(
            backup_time("backup-.tar.gz"),
            Err(NameError::TooShort { len: 14 })
        ));
        assert!(matches!(backup_time("x"), Err(NameError::TooShort { .. })));
    }

    #[test]
    fn test_garbage_timestamp_is_rejected() {
        let err = backup_time("backup-yesterday.tar.gz").unwrap_err();
        match err {
            NameError::Timestamp { stamp, .. } => assert_eq!(stamp, "yesterday"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_foreign_prefix_or_suffix_is_rejected() {
        for name in [
            "restore2020-05-01T12:34:56Z.zip.gz",
            "backup-2020-05-01T12:34:56Z.tar.xz",
            "Backup-2020-05-01T12:34:56Z.tar.gz",
            "backup\u{e9}2020-05-01T12:34:56Z.tar.gz",
        ] {
            assert!(
                matches!(backup_time(name), Err(NameError::NotABackup)),
                "{name} should be rejected"
            );
        }
    }
}
