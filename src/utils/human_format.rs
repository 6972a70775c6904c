//! Human-readable formatting for elapsed and remaining times

/// Formats a time duration in milliseconds to a human-readable string
pub fn format_duration(millis: u64) -> String {
    if millis == 0 {
        return "0s".to_string();
    }

    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        let seconds = millis as f64 / 1000.0;
        format!("{seconds:.1}s")
    } else if millis < 3_600_000 {
        let total_seconds = millis / 1000;
        let minutes = total_seconds / 60;
        let seconds = total_seconds % 60;

        if seconds == 0 {
            format!("{minutes}m")
        } else {
            format!("{minutes}m{seconds}s")
        }
    } else {
        let total_seconds = millis / 1000;
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;

        if minutes == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h{minutes}m")
        }
    }
}

/// Formats fractional seconds (as stored on progress records)
///
/// Negative and non-finite inputs render as `0s`.
pub fn format_seconds(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0s".to_string();
    }
    format_duration((seconds * 1000.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(250), "250ms");
        assert_eq!(format_duration(1500), "1.5s");
        assert_eq!(format_duration(42_000), "42.0s");
        assert_eq!(format_duration(120_000), "2m");
        assert_eq!(format_duration(125_000), "2m5s");
        assert_eq!(format_duration(3_600_000), "1h");
        assert_eq!(format_duration(5_430_000), "1h30m");
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(-3.0), "0s");
        assert_eq!(format_seconds(f64::NAN), "0s");
        assert_eq!(format_seconds(12.34), "12.3s");
        assert_eq!(format_seconds(754.0), "12m34s");
    }
}
