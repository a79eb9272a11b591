//! Human-readable formatting shared by PAS tools

use chrono::Duration;

/// Format an age as a short human string ("3d", "5h", "42m", "just now")
pub fn age(duration: Duration) -> String {
    let secs = duration.num_seconds();
    if secs < 60 {
        return "just now".to_string();
    }

    let days = duration.num_days();
    if days > 0 {
        return format!("{}d", days);
    }

    let hours = duration.num_hours();
    if hours > 0 {
        return format!("{}h", hours);
    }

    format!("{}m", duration.num_minutes())
}

/// Mask a secret for display, keeping at most the last four characters
/// of values long enough that doing so reveals little.
pub fn mask(value: &str) -> String {
    let count = value.chars().count();
    if count < 12 {
        return "********".to_string();
    }
    let tail: String = value.chars().skip(count - 4).collect();
    format!("********{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age() {
        assert_eq!(age(Duration::seconds(5)), "just now");
        assert_eq!(age(Duration::minutes(42)), "42m");
        assert_eq!(age(Duration::hours(5)), "5h");
        assert_eq!(age(Duration::days(31)), "31d");
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("short"), "********");
        assert_eq!(mask("sk-abcdefghijklmnop"), "********mnop");
    }
}
