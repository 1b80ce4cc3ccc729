use std::sync::Arc;

use anyhow::Result;
use metrics::{counter, gauge};
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;

use crate::check::{ChangeEvent, ChangedItem, CheckOutcome, SourceChecker};
use crate::watermark::{Section, WatermarkStore};

/// Polls the Steam Workshop for the configured published files and diffs each
/// file's `time_updated` stamp. An updated mod also gets its changelog page
/// scraped so the announcement can quote the latest entry; a failed scrape
/// degrades to an announcement without the quote.
pub struct SteamChecker {
    api_base: String,
    community_base: String,
    file_ids: Vec<String>,
    client: Client,
    store: Arc<WatermarkStore>,
}

#[derive(Debug, Deserialize)]
struct FileDetailsEnvelope {
    response: FileDetailsResponse,
}

#[derive(Debug, Deserialize)]
struct FileDetailsResponse {
    #[serde(default)]
    publishedfiledetails: Vec<FileDetails>,
}

#[derive(Debug, Deserialize)]
struct FileDetails {
    publishedfileid: String,
    title: Option<String>,
    time_updated: Option<u64>,
}

impl SteamChecker {
    pub fn new(
        api_base: impl Into<String>,
        community_base: impl Into<String>,
        file_ids: Vec<String>,
        store: Arc<WatermarkStore>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            community_base: community_base.into(),
            file_ids,
            client: Client::new(),
            store,
        }
    }

    async fn fetch_changelog(&self, file_id: &str) -> Option<String> {
        let url = format!(
            "{}/sharedfiles/filedetails/changelog/{}",
            self.community_base, file_id
        );
        let rsp = match self.client.get(&url).send().await {
            Ok(rsp) if rsp.status().is_success() => rsp,
            Ok(rsp) => {
                tracing::warn!(source = "steam", file_id, status = %rsp.status(), "changelog GET error");
                return None;
            }
            Err(e) => {
                tracing::warn!(source = "steam", file_id, error = %e, "changelog request failed");
                return None;
            }
        };
        let html = rsp.text().await.ok()?;
        parse_changelog(&html)
    }
}

fn headline_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)class="changelog headline".*?<p[^>]*>(.*?)</p>"#).unwrap()
    })
}

fn br_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?i)<br\s*/?>").unwrap())
}

fn tag_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap())
}

/// Extract the newest changelog entry from the workshop changelog page.
pub fn parse_changelog(html: &str) -> Option<String> {
    let cap = headline_re().captures(html)?;
    let with_breaks = br_re().replace_all(&cap[1], "\n");
    let stripped = tag_re().replace_all(&with_breaks, "");
    let text = html_escape::decode_html_entities(stripped.trim()).to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait::async_trait]
impl SourceChecker for SteamChecker {
    fn name(&self) -> &'static str {
        "steam"
    }

    async fn check(&self) -> Result<CheckOutcome> {
        crate::check::ensure_metrics_described();

        if self.file_ids.is_empty() {
            return Ok(CheckOutcome::unchanged());
        }

        let mut form = vec![("itemcount".to_string(), self.file_ids.len().to_string())];
        for (i, id) in self.file_ids.iter().enumerate() {
            form.push((format!("publishedfileids[{i}]"), id.clone()));
        }

        let url = format!(
            "{}/ISteamRemoteStorage/GetPublishedFileDetails/v1/",
            self.api_base
        );
        let rsp = match self.client.post(&url).form(&form).send().await {
            Ok(rsp) => rsp,
            Err(e) => {
                tracing::warn!(source = "steam", error = %e, "request failed");
                counter!("check_source_errors_total").increment(1);
                return Ok(CheckOutcome::unchanged());
            }
        };
        if !rsp.status().is_success() {
            tracing::warn!(source = "steam", status = %rsp.status(), "POST error");
            counter!("check_source_errors_total").increment(1);
            return Ok(CheckOutcome::unchanged());
        }
        let details: FileDetailsEnvelope = match rsp.json().await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(source = "steam", error = %e, "unparsable response");
                counter!("check_source_errors_total").increment(1);
                return Ok(CheckOutcome::unchanged());
            }
        };

        let mut marks = self.store.get(Section::Steam).await;
        let mut event = ChangeEvent::new("steam");

        for file in details.response.publishedfiledetails {
            let (Some(title), Some(time_updated)) = (file.title.as_deref(), file.time_updated)
            else {
                tracing::warn!(source = "steam", file_id = %file.publishedfileid, "missing title or time_updated, skipping item");
                counter!("check_item_errors_total").increment(1);
                continue;
            };
            let time_updated = time_updated.to_string();

            match marks.get(title) {
                Some(known) if *known == time_updated => {}
                Some(known) => {
                    tracing::info!(source = "steam", mod_name = %title, "mod updated");
                    let changelog_url = format!(
                        "{}/sharedfiles/filedetails/changelog/{}",
                        self.community_base, file.publishedfileid
                    );
                    let mut display =
                        format!("**{title}** has released a new version\n<{changelog_url}>\n");
                    if let Some(entry) = self.fetch_changelog(&file.publishedfileid).await {
                        display.push_str(&format!("```\n{entry}\n```\n"));
                    }
                    event.items.push(ChangedItem {
                        id: file.publishedfileid.clone(),
                        old_version: Some(known.clone()),
                        new_version: time_updated.clone(),
                        display,
                    });
                    marks.insert(title.to_string(), time_updated);
                }
                None => {
                    tracing::debug!(source = "steam", mod_name = %title, "first sighting, recording silently");
                    marks.insert(title.to_string(), time_updated);
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
        self.store.set(Section::Steam, marks).await?;
        Ok(CheckOutcome { changed, post })
    }
}
