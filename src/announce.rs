// src/announce.rs
// One-shot calendar announcements: an initial post when an event enters the
// notification window, then a single reminder at start minus five minutes.
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::RouteRule;
use crate::notify::MessageSink;

/// Events closer than this are stale; farther are left for a later cycle.
const WINDOW_MIN: i64 = 10 * 60;
const WINDOW_MAX: i64 = 60 * 60;
const REMINDER_LEAD: i64 = 5 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// What `consider` decided for one event at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Initial announcement posted; reminder timer scheduled.
    Announced,
    /// Start time outside [10 min, 60 min]; re-evaluated next cycle.
    OutsideWindow,
    /// Routed to the "ignored" audience; nothing posted.
    Suppressed,
    /// Already announced earlier and the reminder has not fired yet.
    Duplicate,
}

/// Resolved destination for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub ping: String,
    pub channel: String,
}

/// First matching keyword wins; the special audience "ignored" drops the
/// event. No match falls through to `@here` in the default channel.
pub fn resolve_route(
    summary: &str,
    routes: &[RouteRule],
    roles: &BTreeMap<String, String>,
    default_channel: &str,
) -> Option<RouteTarget> {
    let haystack = summary.to_lowercase();
    for rule in routes {
        if !haystack.contains(&rule.keyword.to_lowercase()) {
            continue;
        }
        if rule.audience == "ignored" {
            return None;
        }
        let ping = match roles.get(&rule.audience) {
            Some(role_id) => format!("<@&{role_id}>"),
            None => {
                tracing::warn!(audience = %rule.audience, "no role configured, falling back to @here");
                "@here".to_string()
            }
        };
        return Some(RouteTarget {
            ping,
            channel: rule.channel.clone(),
        });
    }
    Some(RouteTarget {
        ping: "@here".to_string(),
        channel: default_channel.to_string(),
    })
}

/// "H:MM:SS" with sub-second precision dropped.
fn format_time_until(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub struct Announcer {
    sink: Arc<dyn MessageSink>,
    routes: Vec<RouteRule>,
    roles: BTreeMap<String, String>,
    default_channel: String,
    // Events announced but whose reminder has not fired yet. In-memory only:
    // a restart between the two posts drops the pending reminder.
    in_flight: Arc<std::sync::Mutex<HashSet<String>>>,
}

impl Announcer {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        routes: Vec<RouteRule>,
        roles: BTreeMap<String, String>,
        default_channel: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            routes,
            roles,
            default_channel: default_channel.into(),
            in_flight: Arc::new(std::sync::Mutex::new(HashSet::new())),
        }
    }

    /// Evaluate one event at `now`. On `Announced` the initial post has been
    /// awaited and the reminder timer is already scheduled; a delivery
    /// failure is logged but does not undo either (at-most-once delivery).
    pub async fn consider(&self, event: &CalendarEvent, now: DateTime<Utc>) -> Disposition {
        let time_until = event.start.signed_duration_since(now);
        let secs = time_until.num_seconds();
        if !(WINDOW_MIN..=WINDOW_MAX).contains(&secs) {
            return Disposition::OutsideWindow;
        }

        let key = format!("{}|{}", event.start.to_rfc3339(), event.summary);
        if !self.in_flight.lock().unwrap().insert(key.clone()) {
            return Disposition::Duplicate;
        }

        let Some(target) = resolve_route(
            &event.summary,
            &self.routes,
            &self.roles,
            &self.default_channel,
        ) else {
            tracing::debug!(summary = %event.summary, "event routed to ignored audience");
            self.in_flight.lock().unwrap().remove(&key);
            return Disposition::Suppressed;
        };

        let initial = format!(
            "{}\n```md\n# {}\n\nStarting in {}\n\nStart: {} UTC\nEnd:   {} UTC```",
            target.ping,
            event.summary,
            format_time_until(time_until),
            event.start.format("%H:%M:%S"),
            event.end.format("%H:%M:%S"),
        );

        tracing::info!(summary = %event.summary, channel = %target.channel, "announcing event");
        if let Err(e) = self.sink.post(&target.channel, &initial).await {
            tracing::warn!(summary = %event.summary, error = %e, "initial announcement delivery failed");
        }

        // The initial post has completed before this timer exists; that
        // ordering is part of the contract.
        let sink = Arc::clone(&self.sink);
        let in_flight = Arc::clone(&self.in_flight);
        let summary = event.summary.clone();
        let delay = (time_until - Duration::seconds(REMINDER_LEAD))
            .to_std()
            .unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let reminder = format!(
                "{}\n```md\n# {}\n\nStarting in 5 minutes```",
                target.ping, summary
            );
            if let Err(e) = sink.post(&target.channel, &reminder).await {
                tracing::warn!(summary = %summary, error = %e, "reminder delivery failed");
            }
            in_flight.lock().unwrap().remove(&key);
        });

        Disposition::Announced
    }
}
