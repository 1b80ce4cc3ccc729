// src/check/mod.rs
pub mod a3sync;
pub mod calendar;
pub mod cup;
pub mod github;
pub mod steam;

use anyhow::Result;
use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on the exporter).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("check_runs_total", "Completed checker invocations.");
        describe_counter!(
            "check_changes_total",
            "Checker invocations that detected at least one change."
        );
        describe_counter!(
            "check_item_errors_total",
            "Items skipped because of fetch/parse errors."
        );
        describe_counter!("check_source_errors_total", "Whole-source fetch errors.");
        describe_gauge!("check_last_run_ts", "Unix ts of the last checker run.");
    });
}

/// One item that moved between two checks of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedItem {
    pub id: String,
    pub old_version: Option<String>,
    pub new_version: String,
    /// Ready-to-post markdown line(s) for this item.
    pub display: String,
}

/// Transient diff result of one checker invocation. Never persisted; the
/// watermark is the only state that survives.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub source: &'static str,
    pub items: Vec<ChangedItem>,
}

impl ChangeEvent {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            items: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_post(self) -> String {
        self.items.into_iter().map(|i| i.display).collect()
    }
}

/// What a scheduler tick gets back from a checker.
#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    pub changed: bool,
    pub post: String,
}

impl CheckOutcome {
    pub fn unchanged() -> Self {
        Self::default()
    }
}

/// A periodic probe of one external source. Implementations fetch current
/// state, diff it against the stored watermark, compose the announcement
/// text, and advance the watermark for the items they processed. Upstream
/// errors are not fatal: the cycle reports no change and the next tick
/// retries naturally.
#[async_trait::async_trait]
pub trait SourceChecker: Send + Sync {
    fn name(&self) -> &'static str;
    async fn check(&self) -> Result<CheckOutcome>;
}

/// The shared "**name** has released a new version" line.
pub(crate) fn update_line(name: &str, version: &str, changelog_url: &str) -> String {
    format!("**{name}** has released a new version ({version})\n<{changelog_url}>\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_event_concatenates_displays() {
        let mut ev = ChangeEvent::new("github");
        ev.items.push(ChangedItem {
            id: "a".into(),
            old_version: None,
            new_version: "1".into(),
            display: "line one\n".into(),
        });
        ev.items.push(ChangedItem {
            id: "b".into(),
            old_version: Some("1".into()),
            new_version: "2".into(),
            display: "line two\n".into(),
        });
        assert_eq!(ev.into_post(), "line one\nline two\n");
    }

    #[test]
    fn update_line_wraps_url() {
        let line = update_line("CUP - Terrains", "1.16.0", "http://example.org/cl.txt");
        assert!(line.starts_with("**CUP - Terrains**"));
        assert!(line.contains("(1.16.0)"));
        assert!(line.contains("<http://example.org/cl.txt>"));
    }
}
