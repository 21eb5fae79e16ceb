//! Terminal formatting helpers for scriptdex output.

use chrono::{DateTime, Utc};

/// Format repo name as clickable hyperlink (only if stderr is a TTY)
pub fn format_repo_link(name: &str, url: &str) -> String {
    use std::io::IsTerminal;
    if std::io::stderr().is_terminal() {
        // OSC 8 hyperlink: \x1b]8;;URL\x1b\\TEXT\x1b]8;;\x1b\\
        format!("\x1b]8;;{}\x1b\\\x1b[1m{}\x1b[0m\x1b]8;;\x1b\\", url, name)
    } else {
        name.to_string()
    }
}

/// Format star count (e.g., 850, 1.2k, 15k)
pub fn format_stars(stars: u64) -> String {
    if stars >= 10_000 {
        format!("{}k", stars / 1000)
    } else if stars >= 1000 {
        format!("{}.{}k", stars / 1000, (stars % 1000) / 100)
    } else {
        format!("{}", stars)
    }
}

/// Format the age of a commit relative to `now` (e.g., "3mo", "2y")
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (now - at).num_days().max(0);
    if days < 60 {
        format!("{}d", days)
    } else if days < 730 {
        format!("{}mo", days / 30)
    } else {
        format!("{}y", days / 365)
    }
}

/// Truncate string safely at char boundary
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_stars_plain() {
        assert_eq!(format_stars(0), "0");
        assert_eq!(format_stars(999), "999");
    }

    #[test]
    fn test_format_stars_thousands() {
        assert_eq!(format_stars(1000), "1.0k");
        assert_eq!(format_stars(1250), "1.2k");
        assert_eq!(format_stars(9900), "9.9k");
        assert_eq!(format_stars(15000), "15k");
    }

    #[test]
    fn test_format_age() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(format_age(Utc.with_ymd_and_hms(2025, 5, 20, 0, 0, 0).unwrap(), now), "12d");
        assert_eq!(format_age(Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap(), now), "6mo");
        assert_eq!(format_age(Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap(), now), "4y");
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello world", 8), "hello...");
        let ja = "日本語のライブラリです";
        let cut = truncate_str(ja, 6);
        assert!(cut.ends_with("..."));
        assert!(cut.chars().count() <= 6);
    }
}
