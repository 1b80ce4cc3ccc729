// src/routine.rs
// Fixed-schedule community posts that need no external source: attendance
// reminders, recruitment nudges, and the "time until optime" status line.
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};

use crate::notify::MessageSink;

/// Weekly op starts Saturday 18:00 UTC; "optime" is today's (or tomorrow's)
/// 18:00 slot.
const OPTIME_HOUR: u32 = 18;

/// Attendance is only collected on op day, during the 17:00-20:00 slot.
pub fn attendance_due(now: DateTime<Utc>) -> bool {
    now.weekday() == Weekday::Sat && (17..=20).contains(&now.hour())
}

/// Recruitment posts go out Monday, Wednesday and Friday.
pub fn recruitment_due(now: DateTime<Utc>) -> bool {
    matches!(now.weekday(), Weekday::Mon | Weekday::Wed | Weekday::Fri)
}

/// Time until the next 18:00 UTC, rolling to tomorrow once today's has
/// passed.
pub fn time_until_optime(now: DateTime<Utc>) -> Duration {
    let today = now
        .date_naive()
        .and_hms_opt(OPTIME_HOUR, 0, 0)
        .expect("valid optime")
        .and_utc();
    let target = if today <= now {
        today + Duration::days(1)
    } else {
        today
    };
    target - now
}

/// "H:MM:00 until optime", matching the status line format users know.
pub fn presence_text(now: DateTime<Utc>) -> String {
    let left = time_until_optime(now);
    let secs = left.num_seconds();
    format!("{}:{:02}:00 until optime", secs / 3600, (secs % 3600) / 60)
}

pub async fn attendance_post(
    sink: &Arc<dyn MessageSink>,
    admin_role: Option<&str>,
    channel: &str,
) -> Result<()> {
    let ping = admin_role
        .map(|r| format!("<@&{r}> "))
        .unwrap_or_default();
    sink.post(channel, &format!("{ping}Collect attendance!")).await?;
    Ok(())
}

pub async fn recruitment_post(
    sink: &Arc<dyn MessageSink>,
    admin_role: Option<&str>,
    channel: &str,
) -> Result<()> {
    let ping = admin_role
        .map(|r| format!("<@&{r}> "))
        .unwrap_or_default();
    sink.post(
        channel,
        &format!("{ping}Post recruitment on <https://www.reddit.com/r/FindAUnit>"),
    )
    .await?;
    Ok(())
}

pub async fn presence_post(sink: &Arc<dyn MessageSink>, channel: &str) -> Result<()> {
    sink.post(channel, &presence_text(Utc::now())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn attendance_only_in_saturday_slot() {
        // 2026-03-14 is a Saturday.
        let sat_17 = Utc.with_ymd_and_hms(2026, 3, 14, 17, 30, 0).unwrap();
        let sat_21 = Utc.with_ymd_and_hms(2026, 3, 14, 21, 0, 0).unwrap();
        let fri_17 = Utc.with_ymd_and_hms(2026, 3, 13, 17, 30, 0).unwrap();
        assert!(attendance_due(sat_17));
        assert!(!attendance_due(sat_21));
        assert!(!attendance_due(fri_17));
    }

    #[test]
    fn recruitment_days() {
        let mon = Utc.with_ymd_and_hms(2026, 3, 9, 17, 0, 0).unwrap();
        let tue = Utc.with_ymd_and_hms(2026, 3, 10, 17, 0, 0).unwrap();
        assert!(recruitment_due(mon));
        assert!(!recruitment_due(tue));
    }

    #[test]
    fn optime_rolls_past_eighteen() {
        let before = Utc.with_ymd_and_hms(2026, 3, 14, 17, 0, 0).unwrap();
        assert_eq!(time_until_optime(before), Duration::hours(1));
        let after = Utc.with_ymd_and_hms(2026, 3, 14, 19, 0, 0).unwrap();
        assert_eq!(time_until_optime(after), Duration::hours(23));
    }

    #[test]
    fn presence_line_format() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 16, 53, 20).unwrap();
        assert_eq!(presence_text(now), "1:06:00 until optime");
    }
}
