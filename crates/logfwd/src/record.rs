// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record layout on disk and on the wire.
//!
//! Ingested lines are stored as RFC 5424 style syslog records. The HTTP
//! transport strips the syslog envelope back off and sends [`LogEntry`]
//! objects; the stream transport sends the stored records verbatim.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;

/// Facility user (1) * 8 + severity notice (5)
pub const SYSLOG_PRIORITY: u8 = 13;

/// Separator between the syslog header and the message
pub const SYSLOG_SEPARATOR: &str = " - - - ";

/// Timestamp format of the `dt` field sent to the collector
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

const MAX_LOGGED_PAYLOAD: usize = 1024;

/// JSON log entry for the HTTP API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub dt: String,
    pub message: String,
}

impl LogEntry {
    /// Builds the outbound entry for a stored record, stamped with `now`.
    #[must_use]
    pub fn from_record(record: &str, now: DateTime<Utc>) -> Self {
        Self {
            dt: now.format(TIMESTAMP_FORMAT).to_string(),
            message: extract_message(record).to_string(),
        }
    }
}

/// Formats one input line as a newline-terminated syslog record.
#[must_use]
pub fn format_syslog<Tz: TimeZone>(
    timestamp: &DateTime<Tz>,
    hostname: &str,
    program: &str,
    line: &str,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "<{SYSLOG_PRIORITY}>1 {} {hostname} {program}{SYSLOG_SEPARATOR}{line}\n",
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Returns the message part of a syslog record, or the whole record when it
/// carries no syslog envelope.
#[must_use]
pub fn extract_message(record: &str) -> &str {
    match record.find(SYSLOG_SEPARATOR) {
        Some(idx) => &record[idx + SYSLOG_SEPARATOR.len()..],
        None => record,
    }
}

/// Renders bytes for debug output: control and non-ASCII bytes are escaped
/// and the output is limited to the first 1024 input bytes.
#[must_use]
pub fn escape_for_log(data: &[u8]) -> String {
    let shown = &data[..data.len().min(MAX_LOGGED_PAYLOAD)];
    let mut out = String::with_capacity(shown.len());
    for &b in shown {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            32..=126 => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    if data.len() > MAX_LOGGED_PAYLOAD {
        out.push_str(&format!(
            "... (showing first {MAX_LOGGED_PAYLOAD} bytes of {} total)",
            data.len()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_format_syslog() {
        let ts = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 1, 12, 30, 45)
            .unwrap();
        let record = format_syslog(&ts, "web-1", "api", "GET /health 200");
        assert_eq!(
            record,
            "<13>1 2024-03-01T12:30:45+02:00 web-1 api - - - GET /health 200\n"
        );
    }

    #[test]
    fn test_extract_message() {
        let record = "<13>1 2024-03-01T12:30:45Z web-1 api - - - hello - - - world";
        assert_eq!(extract_message(record), "hello - - - world");
        assert_eq!(extract_message("plain line"), "plain line");
        assert_eq!(extract_message("<13>1 ts h p - - - "), "");
    }

    #[test]
    fn test_log_entry_serialization() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();
        let entry = LogEntry::from_record("<13>1 ts host prog - - - payload", now);
        assert_eq!(entry.dt, "2024-03-01 12:30:45 UTC");

        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"dt":"2024-03-01 12:30:45 UTC","message":"payload"}"#);
    }

    #[test]
    fn test_escape_for_log() {
        assert_eq!(escape_for_log(b"a\tb\r\n\x01\xff"), "a\\tb\\r\\n\\x01\\xff");

        let long = vec![b'x'; 2000];
        let escaped = escape_for_log(&long);
        assert!(escaped.starts_with(&"x".repeat(1024)));
        assert!(escaped.ends_with("(showing first 1024 bytes of 2000 total)"));
    }
}
