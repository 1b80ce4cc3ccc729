use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use metrics::{counter, gauge};
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::Client;

use crate::check::{CheckOutcome, SourceChecker};
use crate::watermark::WatermarkStore;

/// Diffs the ArmA3Sync repository's file listing (a plain HTML index) against
/// the stored per-file size map. The post groups the diff into Updated /
/// Added / Removed sections and leads with the repository size change.
pub struct A3syncChecker {
    url: String,
    client: Client,
    store: Arc<WatermarkStore>,
}

impl A3syncChecker {
    pub fn new(url: impl Into<String>, store: Arc<WatermarkStore>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            store,
        }
    }
}

fn row_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    // href, then anything, then the size as the last number on the line.
    RE.get_or_init(|| Regex::new(r#"(?m)<a href="([^"?/][^"]*)"[^>]*>.*?</a>.*?(\d+)\s*$"#).unwrap())
}

/// Parse an autoindex-style listing into file -> size-in-bytes.
pub fn parse_listing(html: &str) -> BTreeMap<String, u64> {
    let mut out = BTreeMap::new();
    for cap in row_re().captures_iter(html) {
        let name = html_escape::decode_html_entities(&cap[1]).to_string();
        let Ok(size) = cap[2].parse::<u64>() else {
            continue;
        };
        out.insert(name, size);
    }
    out
}

/// Diff of two listings, fields already sorted by file name.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ListingDiff {
    pub updated: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ListingDiff {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

pub fn diff_listing(old: &BTreeMap<String, String>, new: &BTreeMap<String, u64>) -> ListingDiff {
    let mut diff = ListingDiff::default();
    for (name, size) in new {
        match old.get(name) {
            Some(known) if *known == size.to_string() => {}
            Some(_) => diff.updated.push(name.clone()),
            None => diff.added.push(name.clone()),
        }
    }
    for name in old.keys() {
        if !new.contains_key(name) {
            diff.removed.push(name.clone());
        }
    }
    diff
}

fn gb(bytes: u64) -> f64 {
    (bytes as f64 / 1_000_000_000.0 * 100.0).round() / 100.0
}

fn compose_post(diff: &ListingDiff, new_size_gb: f64, old_size_gb: f64) -> String {
    let delta = ((new_size_gb - old_size_gb) * 100.0).round() / 100.0;
    let delta_str = if delta < 0.0 {
        format!("{delta}")
    } else {
        format!("+{delta}")
    };
    format!(
        "```md\n# The ArmA3Sync repo has changed #\n\n[{} GB]({} GB)\n\n< Updated >\n{}\n\n< Added >\n{}\n\n< Removed >\n{}```",
        new_size_gb,
        delta_str,
        diff.updated.join("\n"),
        diff.added.join("\n"),
        diff.removed.join("\n"),
    )
}

#[async_trait::async_trait]
impl SourceChecker for A3syncChecker {
    fn name(&self) -> &'static str {
        "a3sync"
    }

    async fn check(&self) -> Result<CheckOutcome> {
        crate::check::ensure_metrics_described();

        let rsp = match self.client.get(&self.url).send().await {
            Ok(rsp) => rsp,
            Err(e) => {
                tracing::warn!(source = "a3sync", error = %e, "request failed");
                counter!("check_source_errors_total").increment(1);
                return Ok(CheckOutcome::unchanged());
            }
        };
        if !rsp.status().is_success() {
            tracing::warn!(source = "a3sync", status = %rsp.status(), "GET error");
            counter!("check_source_errors_total").increment(1);
            return Ok(CheckOutcome::unchanged());
        }
        let html = match rsp.text().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(source = "a3sync", error = %e, "body read failed");
                counter!("check_source_errors_total").increment(1);
                return Ok(CheckOutcome::unchanged());
            }
        };

        let listing = parse_listing(&html);
        if listing.is_empty() {
            // An empty listing is far more likely a scrape failure than a
            // repository wipe; do not diff it into a full "removed" post.
            tracing::warn!(source = "a3sync", "listing parsed to nothing, treating as no change");
            counter!("check_source_errors_total").increment(1);
            return Ok(CheckOutcome::unchanged());
        }

        let marks = self.store.get(crate::watermark::Section::A3sync).await;
        let diff = diff_listing(&marks, &listing);

        counter!("check_runs_total").increment(1);
        gauge!("check_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

        if diff.is_empty() {
            return Ok(CheckOutcome::unchanged());
        }
        counter!("check_changes_total").increment(1);

        let new_size_gb = gb(listing.values().sum());
        let old_size_gb = self.store.a3sync_total_size().await;
        if marks.is_empty() {
            tracing::info!(source = "a3sync", files = listing.len(), "first run, diff covers the whole repository");
        }
        tracing::info!(
            source = "a3sync",
            updated = diff.updated.len(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            "repository changed"
        );

        let post = compose_post(&diff, new_size_gb, old_size_gb);

        let new_marks = listing
            .into_iter()
            .map(|(name, size)| (name, size.to_string()))
            .collect();
        self.store.set_a3sync(new_marks, new_size_gb).await?;

        Ok(CheckOutcome {
            changed: true,
            post,
        })
    }
}
