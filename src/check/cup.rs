use std::sync::Arc;

use anyhow::Result;
use metrics::{counter, gauge};
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::Client;

use crate::check::{update_line, ChangeEvent, ChangedItem, CheckOutcome, SourceChecker};
use crate::watermark::{Section, WatermarkStore};

/// Scrapes the CUP download page for mod name/version pairs and diffs them
/// against the per-mod version map. A mod seen for the first time is
/// recorded silently; only a version change produces an announcement line.
pub struct CupChecker {
    url: String,
    client: Client,
    store: Arc<WatermarkStore>,
}

impl CupChecker {
    pub fn new(url: impl Into<String>, store: Arc<WatermarkStore>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            store,
        }
    }
}

fn cell_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").unwrap())
}

fn tag_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap())
}

fn version_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r" ([0-9][0-9.]*\S*)\s*$").unwrap())
}

/// Extract `(name, version)` pairs from the download table. Cells that do
/// not end in a version number are ignored rather than failing the scrape.
pub fn parse_downloads(html: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for cap in cell_re().captures_iter(html) {
        let raw = tag_re().replace_all(&cap[1], "");
        let text = html_escape::decode_html_entities(raw.trim()).to_string();
        let Some(vcap) = version_re().captures(&text) else {
            continue;
        };
        let version = vcap[1].to_string();
        let name = text[..vcap.get(0).unwrap().start()].trim().to_string();
        if name.is_empty() {
            continue;
        }
        out.push((name, version));
    }
    out
}

fn changelog_url(name: &str, version: &str) -> String {
    format!(
        "http://cup-arma3.org/downloads/CUP_{}-{}-changelog.txt",
        name.replace(' ', "_"),
        version
    )
}

#[async_trait::async_trait]
impl SourceChecker for CupChecker {
    fn name(&self) -> &'static str {
        "cup"
    }

    async fn check(&self) -> Result<CheckOutcome> {
        crate::check::ensure_metrics_described();

        let rsp = match self.client.get(&self.url).send().await {
            Ok(rsp) => rsp,
            Err(e) => {
                tracing::warn!(source = "cup", error = %e, "request failed");
                counter!("check_source_errors_total").increment(1);
                return Ok(CheckOutcome::unchanged());
            }
        };
        if !rsp.status().is_success() {
            tracing::warn!(source = "cup", status = %rsp.status(), "GET error");
            counter!("check_source_errors_total").increment(1);
            return Ok(CheckOutcome::unchanged());
        }
        let html = match rsp.text().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(source = "cup", error = %e, "body read failed");
                counter!("check_source_errors_total").increment(1);
                return Ok(CheckOutcome::unchanged());
            }
        };

        let mut marks = self.store.get(Section::Cup).await;
        let mut event = ChangeEvent::new("cup");

        for (name, version) in parse_downloads(&html) {
            match marks.get(&name) {
                Some(known) if *known == version => {}
                Some(known) => {
                    tracing::info!(source = "cup", mod_name = %name, old = %known, new = %version, "mod updated");
                    event.items.push(ChangedItem {
                        id: name.clone(),
                        old_version: Some(known.clone()),
                        new_version: version.clone(),
                        display: update_line(
                            &format!("CUP - {name}"),
                            &version,
                            &changelog_url(&name, &version),
                        ),
                    });
                    marks.insert(name, version);
                }
                None => {
                    tracing::debug!(source = "cup", mod_name = %name, "first sighting, recording silently");
                    marks.insert(name, version);
                }
            }
        }

        counter!("check_runs_total").increment(1);
        gauge!("check_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

        let changed = !event.is_empty();
        if changed {
            counter!("check_changes_total").increment(1);
        }
        let post = event.into_post();
        // First sightings also persist, just without an announcement.
        self.store.set(Section::Cup, marks).await?;
        Ok(CheckOutcome { changed, post })
    }
}
