use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use reqwest::Client;
use serde::Deserialize;

use crate::announce::{Announcer, CalendarEvent, Disposition};
use crate::check::{CheckOutcome, SourceChecker};
use crate::watermark::WatermarkStore;

/// Fetches upcoming calendar events and hands them to the [`Announcer`].
/// The watermark is the end time of the last event handed over, so an event
/// is never re-fetched once announced (or suppressed). Unlike the other
/// checkers this one posts through the announcer itself; the returned post
/// text is informational only.
pub struct CalendarChecker {
    api_base: String,
    calendar_id: String,
    token: Option<String>,
    client: Client,
    store: Arc<WatermarkStore>,
    announcer: Arc<Announcer>,
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<EventItem>,
}

#[derive(Debug, Deserialize)]
struct EventItem {
    summary: Option<String>,
    start: Option<EventTime>,
    end: Option<EventTime>,
}

#[derive(Debug, Deserialize)]
struct EventTime {
    #[serde(rename = "dateTime")]
    date_time: Option<DateTime<Utc>>,
}

impl CalendarChecker {
    pub fn new(
        api_base: impl Into<String>,
        calendar_id: impl Into<String>,
        token: Option<String>,
        store: Arc<WatermarkStore>,
        announcer: Arc<Announcer>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            calendar_id: calendar_id.into(),
            token,
            client: Client::new(),
            store,
            announcer,
        }
    }

    /// Stored watermark, clamped to `now`: a stale lower bound would replay
    /// events that already started.
    async fn time_min(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.store.calendar_last().await {
            Some(s) => match DateTime::parse_from_rfc3339(&s) {
                Ok(dt) if dt.with_timezone(&Utc) > now => dt.with_timezone(&Utc),
                Ok(_) => now,
                Err(e) => {
                    tracing::warn!(source = "calendar", error = %e, "unparsable watermark, using now");
                    now
                }
            },
            None => now,
        }
    }

    async fn fetch_events(&self, time_min: DateTime<Utc>) -> Result<Vec<CalendarEvent>> {
        let url = format!("{}/calendars/{}/events", self.api_base, self.calendar_id);
        let mut req = self.client.get(&url).query(&[
            ("timeMin", time_min.to_rfc3339()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ]);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let rsp = req.send().await?.error_for_status()?;
        let list: EventList = rsp.json().await?;

        let mut events = Vec::new();
        for item in list.items {
            let (Some(summary), Some(start), Some(end)) = (
                item.summary,
                item.start.and_then(|t| t.date_time),
                item.end.and_then(|t| t.date_time),
            ) else {
                tracing::warn!(source = "calendar", "event missing summary or times, skipping item");
                counter!("check_item_errors_total").increment(1);
                continue;
            };
            events.push(CalendarEvent {
                summary,
                start,
                end,
            });
        }
        Ok(events)
    }
}

#[async_trait::async_trait]
impl SourceChecker for CalendarChecker {
    fn name(&self) -> &'static str {
        "calendar"
    }

    async fn check(&self) -> Result<CheckOutcome> {
        crate::check::ensure_metrics_described();

        let now = Utc::now();
        let time_min = self.time_min(now).await;

        let events = match self.fetch_events(time_min).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(source = "calendar", error = %e, "fetch failed");
                counter!("check_source_errors_total").increment(1);
                return Ok(CheckOutcome::unchanged());
            }
        };

        let mut announced = Vec::new();
        let mut last_end: Option<DateTime<Utc>> = None;

        // Events arrive ordered by start time; past the far edge of the
        // window nothing later can qualify either.
        for event in &events {
            match self.announcer.consider(event, now).await {
                Disposition::Announced => {
                    announced.push(event.summary.clone());
                    last_end = Some(event.end);
                }
                Disposition::Suppressed => {
                    last_end = Some(event.end);
                }
                Disposition::Duplicate => {}
                Disposition::OutsideWindow => {
                    if event.start.signed_duration_since(now).num_seconds() > 3600 {
                        break;
                    }
                }
            }
        }

        if let Some(end) = last_end {
            self.store.set_calendar_last(Some(end.to_rfc3339())).await?;
        }

        counter!("check_runs_total").increment(1);
        gauge!("check_last_run_ts").set(now.timestamp() as f64);

        let changed = !announced.is_empty();
        if changed {
            counter!("check_changes_total").increment(1);
        }
        Ok(CheckOutcome {
            changed,
            post: announced.join(", "),
        })
    }
}
