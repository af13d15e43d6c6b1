//! Input validation — every check runs before any side effect, so a
//! malformed request never produces a partial dispatch.

use chrono::{DateTime, Duration, Utc};

use quizcast_core::error::{QuizcastError, Result};
use quizcast_core::types::CampaignDef;

/// Require a non-empty list no larger than `max` items.
pub fn bulk_limits(len: usize, max: usize, item_name: &str) -> Result<()> {
    if len == 0 {
        return Err(QuizcastError::Validation(format!(
            "{item_name} list is required and must not be empty"
        )));
    }
    if len > max {
        return Err(QuizcastError::Validation(format!(
            "maximum {max} {item_name} can be provided"
        )));
    }
    Ok(())
}

/// Interactive campaigns need 2-10 non-empty options.
pub fn options(options: &[String]) -> Result<()> {
    if options.len() < 2 || options.len() > 10 {
        return Err(QuizcastError::Validation(
            "options must contain 2-10 items".into(),
        ));
    }
    if options.iter().any(|o| o.trim().is_empty()) {
        return Err(QuizcastError::Validation(
            "options must not contain empty strings".into(),
        ));
    }
    Ok(())
}

pub fn correct_index(index: u32, options_len: usize) -> Result<()> {
    if (index as usize) >= options_len {
        return Err(QuizcastError::Validation(
            "correct option index is out of range".into(),
        ));
    }
    Ok(())
}

/// Full check of one campaign definition.
pub fn campaign_def(def: &CampaignDef) -> Result<()> {
    options(&def.options)?;
    if let Some(index) = def.correct_option_index {
        correct_index(index, def.options.len())?;
    }
    Ok(())
}

/// The scheduler only accepts strictly future start times.
pub fn future_time(time: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if time <= now {
        return Err(QuizcastError::Validation(
            "time must be in the future".into(),
        ));
    }
    Ok(())
}

pub fn interval_minutes(minutes: i64) -> Result<()> {
    if !(1..=1440).contains(&minutes) {
        return Err(QuizcastError::Validation(
            "interval minutes must be between 1 and 1440 (24 hours)".into(),
        ));
    }
    Ok(())
}

pub fn destination(destination: &str) -> Result<()> {
    if destination.trim().is_empty() {
        return Err(QuizcastError::Validation(
            "all destination ids must be non-empty strings".into(),
        ));
    }
    Ok(())
}

/// Fire times for a campaign series: the i-th campaign fires at
/// `start + i * interval`.
pub fn fire_times(
    start: DateTime<Utc>,
    interval_minutes: i64,
    count: usize,
) -> Vec<DateTime<Utc>> {
    (0..count as i64)
        .map(|i| start + Duration::minutes(i * interval_minutes))
        .collect()
}

/// Truncate text for log lines and stats listings.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("option {i}")).collect()
    }

    #[test]
    fn test_bulk_limits() {
        assert!(bulk_limits(0, 50, "chat ids").is_err());
        assert!(bulk_limits(50, 50, "chat ids").is_ok());
        assert!(bulk_limits(51, 50, "chat ids").is_err());
    }

    #[test]
    fn test_option_counts() {
        assert!(options(&opts(1)).is_err());
        assert!(options(&opts(2)).is_ok());
        assert!(options(&opts(10)).is_ok());
        assert!(options(&opts(11)).is_err());
        assert!(options(&["a".into(), "  ".into()]).is_err());
    }

    #[test]
    fn test_correct_index_range() {
        assert!(correct_index(0, 4).is_ok());
        assert!(correct_index(3, 4).is_ok());
        assert!(correct_index(4, 4).is_err());
    }

    #[test]
    fn test_interval_bounds() {
        assert!(interval_minutes(0).is_err());
        assert!(interval_minutes(1).is_ok());
        assert!(interval_minutes(1440).is_ok());
        assert!(interval_minutes(1441).is_err());
    }

    #[test]
    fn test_future_time_is_strict() {
        let now = Utc::now();
        assert!(future_time(now, now).is_err());
        assert!(future_time(now + Duration::seconds(1), now).is_ok());
    }

    #[test]
    fn test_fire_times_arithmetic() {
        let start = Utc::now();
        let times = fire_times(start, 15, 4);
        assert_eq!(times.len(), 4);
        for (i, time) in times.iter().enumerate() {
            assert_eq!(*time, start + Duration::minutes(15 * i as i64));
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 50), "short");
        let long = "x".repeat(60);
        let cut = truncate(&long, 50);
        assert_eq!(cut.chars().count(), 50);
        assert!(cut.ends_with("..."));
    }
}
