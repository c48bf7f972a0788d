//! ---
//! adit_section: "01-core-functionality"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Shared primitives and utilities for the bridge runtime."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};

/// Express the age of a timestamp as a short human-readable phrase, the way
/// operators see it in log lines ("cached 2 minutes ago").
pub fn humanize_age(timestamp: DateTime<Utc>) -> String {
    humanize_age_at(timestamp, Utc::now())
}

fn humanize_age_at(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(timestamp);
    let seconds = elapsed.num_seconds();
    if seconds < 0 {
        return "in the future".to_owned();
    }
    if seconds < 10 {
        return "just now".to_owned();
    }
    if seconds < 60 {
        return format!("{} seconds ago", seconds);
    }
    let minutes = elapsed.num_minutes();
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let hours = elapsed.num_hours();
    if hours < 24 {
        return plural(hours, "hour");
    }
    plural(elapsed.num_days(), "day")
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", count, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ages_humanize_across_unit_boundaries() {
        let now = Utc::now();
        assert_eq!(humanize_age_at(now - Duration::seconds(3), now), "just now");
        assert_eq!(
            humanize_age_at(now - Duration::seconds(45), now),
            "45 seconds ago"
        );
        assert_eq!(
            humanize_age_at(now - Duration::minutes(2), now),
            "2 minutes ago"
        );
        assert_eq!(humanize_age_at(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(humanize_age_at(now - Duration::hours(5), now), "5 hours ago");
        assert_eq!(humanize_age_at(now - Duration::days(3), now), "3 days ago");
    }

    #[test]
    fn future_timestamps_do_not_underflow() {
        let now = Utc::now();
        assert_eq!(
            humanize_age_at(now + Duration::minutes(5), now),
            "in the future"
        );
    }
}
