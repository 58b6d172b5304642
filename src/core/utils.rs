//! Formatting helpers for user-facing messages.

use std::time::Duration;

/// Formats a byte count as a human-readable size (1024-based).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Formats a duration in seconds as `m:ss` or `h:mm:ss`.
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Formats a download speed in bytes per second.
pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec <= 0.0 {
        return "–".to_string();
    }
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

/// Formats an ETA for the progress message.
pub fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        Some(d) => format_duration(d.as_secs()),
        None => "–".to_string(),
    }
}

/// Rounds a wait time up to whole seconds for user messages, never
/// reporting zero for a positive wait.
pub fn wait_secs_for_display(wait: Duration) -> u64 {
    let secs = wait.as_secs_f64().ceil() as u64;
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bytes_formatting() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes(1536 * 1024 * 1024), "1.5 GB");
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(30), "0:30");
        assert_eq!(format_duration(90), "1:30");
        assert_eq!(format_duration(3600), "1:00:00");
        assert_eq!(format_duration(3725), "1:02:05");
    }

    #[test]
    fn speed_formatting() {
        assert_eq!(format_speed(0.0), "–");
        assert_eq!(format_speed(2.0 * 1024.0 * 1024.0), "2.0 MB/s");
    }

    #[test]
    fn wait_display_never_reports_zero() {
        assert_eq!(wait_secs_for_display(Duration::from_millis(200)), 1);
        assert_eq!(wait_secs_for_display(Duration::from_secs_f64(2.3)), 3);
    }
}
