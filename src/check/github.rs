use std::sync::Arc;

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;

use crate::check::{update_line, ChangeEvent, ChangedItem, CheckOutcome, SourceChecker};
use crate::watermark::{Section, WatermarkStore};

/// Watches the latest release of each configured repository through the
/// GitHub REST API. The watermark per repo is the `Last-Modified` response
/// header, sent back as `If-Modified-Since` so an unchanged repo answers 304
/// and costs no rate-limit budget.
pub struct GithubChecker {
    api_base: String,
    repos: Vec<String>,
    token: Option<String>,
    client: Client,
    store: Arc<WatermarkStore>,
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: String,
}

impl GithubChecker {
    pub fn new(
        api_base: impl Into<String>,
        repos: Vec<String>,
        token: Option<String>,
        store: Arc<WatermarkStore>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            repos,
            token,
            client: Client::new(),
            store,
        }
    }
}

#[async_trait::async_trait]
impl SourceChecker for GithubChecker {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn check(&self) -> Result<CheckOutcome> {
        crate::check::ensure_metrics_described();

        let mut marks = self.store.get(Section::Github).await;
        let mut event = ChangeEvent::new("github");

        for repo in &self.repos {
            let url = format!("{}/repos/{}/releases/latest", self.api_base, repo);
            let mut req = self
                .client
                .get(&url)
                .header(header::USER_AGENT, "modwatch")
                .header(header::ACCEPT, "application/vnd.github+json");
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }
            if let Some(since) = marks.get(repo) {
                req = req.header(header::IF_MODIFIED_SINCE, since);
            }

            let rsp = match req.send().await {
                Ok(rsp) => rsp,
                Err(e) => {
                    tracing::warn!(source = "github", repo = %repo, error = %e, "request failed");
                    counter!("check_item_errors_total").increment(1);
                    continue;
                }
            };

            match rsp.status() {
                StatusCode::OK => {
                    let last_modified = rsp
                        .headers()
                        .get(header::LAST_MODIFIED)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let release: LatestRelease = match rsp.json().await.context("release body") {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(source = "github", repo = %repo, error = %e, "unparsable release, skipping item");
                            counter!("check_item_errors_total").increment(1);
                            continue;
                        }
                    };
                    let Some(last_modified) = last_modified else {
                        tracing::warn!(source = "github", repo = %repo, "200 without Last-Modified, skipping item");
                        counter!("check_item_errors_total").increment(1);
                        continue;
                    };

                    tracing::info!(source = "github", repo = %repo, tag = %release.tag_name, "new release");
                    let changelog =
                        format!("https://github.com/{}/releases/tag/{}", repo, release.tag_name);
                    event.items.push(ChangedItem {
                        id: repo.clone(),
                        old_version: marks.get(repo).cloned(),
                        new_version: last_modified.clone(),
                        display: update_line(repo, &release.tag_name, &changelog),
                    });
                    marks.insert(repo.clone(), last_modified);
                }
                StatusCode::NOT_MODIFIED => {}
                status => {
                    let body = rsp.text().await.unwrap_or_default();
                    tracing::warn!(source = "github", repo = %repo, %status, body = %body, "GET error");
                    counter!("check_item_errors_total").increment(1);
                }
            }
        }

        counter!("check_runs_total").increment(1);
        gauge!("check_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

        if event.is_empty() {
            return Ok(CheckOutcome::unchanged());
        }
        counter!("check_changes_total").increment(1);

        // Compose first, then advance: the watermark moves only once the
        // announcement text exists.
        let post = event.into_post();
        self.store.set(Section::Github, marks).await?;
        Ok(CheckOutcome {
            changed: true,
            post,
        })
    }
}
