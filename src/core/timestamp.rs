//! Timestamp rendering
//!
//! Timestamps are written straight into a pooled output buffer; no
//! intermediate `String` is built on the log path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Standardized timestamp format options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampFormat {
    /// ISO 8601 with milliseconds: `2025-01-08T10:30:45.123Z`
    #[default]
    Iso8601,

    /// ISO 8601 with microseconds: `2025-01-08T10:30:45.123456Z`
    Iso8601Micros,

    /// RFC 3339 format: `2025-01-08T10:30:45.123+00:00`
    Rfc3339,

    /// Unix timestamp in seconds: `1736332245`
    Unix,

    /// Unix timestamp in milliseconds: `1736332245123`
    UnixMillis,

    /// Unix timestamp in microseconds: `1736332245123456`
    UnixMicros,

    /// Custom strftime format
    Custom(String),
}

impl TimestampFormat {
    /// Append the rendered timestamp to `buf`
    pub fn write_to(&self, buf: &mut Vec<u8>, datetime: &DateTime<Utc>) {
        // Writing into a Vec cannot fail
        let _ = match self {
            TimestampFormat::Iso8601 => write!(buf, "{}", datetime.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            TimestampFormat::Iso8601Micros => {
                write!(buf, "{}", datetime.format("%Y-%m-%dT%H:%M:%S%.6fZ"))
            }
            TimestampFormat::Rfc3339 => write!(buf, "{}", datetime.format("%Y-%m-%dT%H:%M:%S%.3f%:z")),
            TimestampFormat::Unix => write!(buf, "{}", datetime.timestamp()),
            TimestampFormat::UnixMillis => write!(buf, "{}", datetime.timestamp_millis()),
            TimestampFormat::UnixMicros => write!(buf, "{}", datetime.timestamp_micros()),
            TimestampFormat::Custom(format_str) => write!(buf, "{}", datetime.format(format_str)),
        };
    }

    /// Render to a new string
    #[must_use]
    pub fn format(&self, datetime: &DateTime<Utc>) -> String {
        let mut buf = Vec::with_capacity(32);
        self.write_to(&mut buf, datetime);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Numeric value for JSON output, if this is a Unix-based format
    #[must_use]
    pub fn numeric_value(&self, datetime: &DateTime<Utc>) -> Option<i64> {
        match self {
            TimestampFormat::Unix => Some(datetime.timestamp()),
            TimestampFormat::UnixMillis => Some(datetime.timestamp_millis()),
            TimestampFormat::UnixMicros => Some(datetime.timestamp_micros()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_datetime() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 8, 10, 30, 45)
            .single()
            .expect("valid datetime")
            + chrono::Duration::microseconds(123456)
    }

    #[test]
    fn test_iso8601_formats() {
        assert_eq!(
            TimestampFormat::Iso8601.format(&fixed_datetime()),
            "2025-01-08T10:30:45.123Z"
        );
        assert_eq!(
            TimestampFormat::Iso8601Micros.format(&fixed_datetime()),
            "2025-01-08T10:30:45.123456Z"
        );
        assert_eq!(
            TimestampFormat::Rfc3339.format(&fixed_datetime()),
            "2025-01-08T10:30:45.123+00:00"
        );
    }

    #[test]
    fn test_unix_formats() {
        let dt = fixed_datetime();
        assert_eq!(TimestampFormat::Unix.format(&dt), "1736332245");
        assert_eq!(TimestampFormat::UnixMillis.format(&dt), "1736332245123");
        assert_eq!(TimestampFormat::UnixMicros.numeric_value(&dt), Some(1736332245123456));
        assert_eq!(TimestampFormat::Iso8601.numeric_value(&dt), None);
    }

    #[test]
    fn test_custom_format_appends() {
        let mut buf = b"at ".to_vec();
        TimestampFormat::Custom("%d/%b/%Y".to_string()).write_to(&mut buf, &fixed_datetime());
        assert_eq!(buf, b"at 08/Jan/2025");
    }

    #[test]
    fn test_deserialization() {
        let format: TimestampFormat =
            serde_json::from_str(r#"{"Custom":"%Y-%m-%d"}"#).expect("deserialize Custom");
        assert_eq!(format, TimestampFormat::Custom("%Y-%m-%d".to_string()));
    }
}
