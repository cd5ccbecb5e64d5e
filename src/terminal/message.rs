//! Human-readable texts shown to terminal clients and audit viewers.

use crate::terminal::error::TerminalError;
use crate::terminal::types::{SessionStatus, StoredSessionRecord, TerminalSessionInfo};

/// Text frame sent when a terminal cannot be opened. Ends in CRLF so it
/// renders on its own line in the client's terminal emulator.
pub fn creation_failure_text(error: &TerminalError) -> String {
    format!("connection failed: {}\r\n", error)
}

/// `45s`, `2m 5s`, `1h 1m`.
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

/// `512 B`, `1.5 KB`, `3.0 MB`, up to exabytes.
pub fn format_file_size(size: u64) -> String {
    const UNIT: u64 = 1024;
    const PREFIXES: &[u8] = b"KMGTPE";

    if size < UNIT {
        return format!("{} B", size);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = size / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    format!(
        "{:.1} {}B",
        size as f64 / div as f64,
        char::from(PREFIXES[exp])
    )
}

pub fn status_text(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Recording => "Recording",
        SessionStatus::Completed => "Completed",
        SessionStatus::Failed => "Failed",
    }
}

/// Listing row for an audit record.
pub fn session_info(stored: &StoredSessionRecord) -> TerminalSessionInfo {
    let record = &stored.record;
    TerminalSessionInfo {
        id: stored.id,
        host_id: record.host_id,
        host_name: record.host_name.clone(),
        host_ip: record.host_ip.clone(),
        user_id: record.user_id,
        username: record.username.clone(),
        duration: record.duration_seconds,
        duration_text: format_duration(record.duration_seconds),
        file_size: record.file_size_bytes,
        file_size_text: format_file_size(record.file_size_bytes),
        status: record.status,
        status_text: status_text(record.status).to_string(),
        created_at: stored.created_at,
        created_at_text: stored.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod duration {
        use super::*;

        #[test]
        fn test_seconds() {
            assert_eq!(format_duration(0), "0s");
            assert_eq!(format_duration(45), "45s");
        }

        #[test]
        fn test_minutes() {
            assert_eq!(format_duration(60), "1m 0s");
            assert_eq!(format_duration(125), "2m 5s");
        }

        #[test]
        fn test_hours_drop_seconds() {
            assert_eq!(format_duration(3661), "1h 1m");
            assert_eq!(format_duration(7200), "2h 0m");
        }
    }

    mod file_size {
        use super::*;

        #[test]
        fn test_bytes() {
            assert_eq!(format_file_size(0), "0 B");
            assert_eq!(format_file_size(1023), "1023 B");
        }

        #[test]
        fn test_kilobytes() {
            assert_eq!(format_file_size(1024), "1.0 KB");
            assert_eq!(format_file_size(1536), "1.5 KB");
        }

        #[test]
        fn test_larger_units() {
            assert_eq!(format_file_size(3 * 1024 * 1024), "3.0 MB");
            assert_eq!(format_file_size(5 * 1024 * 1024 * 1024), "5.0 GB");
            assert_eq!(format_file_size(u64::MAX), "16.0 EB");
        }
    }

    #[test]
    fn test_creation_failure_text() {
        let text = creation_failure_text(&TerminalError::HostNotFound(9));
        assert_eq!(text, "connection failed: host 9 not found\r\n");
    }

    #[test]
    fn test_session_info_texts() {
        use crate::terminal::types::TerminalSessionRecord;
        use chrono::TimeZone;

        let stored = StoredSessionRecord {
            id: 3,
            created_at: chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            record: TerminalSessionRecord {
                host_id: 1,
                host_name: "web".to_string(),
                host_ip: "10.0.0.1".to_string(),
                user_id: 2,
                username: "alice".to_string(),
                recording_path: "/r/a.cast".to_string(),
                duration_seconds: 125,
                file_size_bytes: 2048,
                status: SessionStatus::Completed,
            },
        };

        let info = session_info(&stored);
        assert_eq!(info.duration_text, "2m 5s");
        assert_eq!(info.file_size_text, "2.0 KB");
        assert_eq!(info.status_text, "Completed");
        assert_eq!(info.created_at_text, "2026-01-02 03:04:05");
    }
}
