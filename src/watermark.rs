// src/watermark.rs
// Last-seen state shared by every checker. One JSON document on disk,
// read fully, mutated in memory, rewritten fully under a single-writer lock.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

/// Which section of the document a checker owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Github,
    Cup,
    Steam,
    A3sync,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WatermarkDoc {
    #[serde(default)]
    pub github: BTreeMap<String, String>,
    #[serde(default)]
    pub cup: BTreeMap<String, String>,
    #[serde(default)]
    pub steam: BTreeMap<String, String>,
    #[serde(default)]
    pub a3sync: BTreeMap<String, String>,
    #[serde(default)]
    pub a3sync_total_size: f64,
    #[serde(default)]
    pub calendar_last: Option<String>,
}

impl WatermarkDoc {
    fn section(&self, s: Section) -> &BTreeMap<String, String> {
        match s {
            Section::Github => &self.github,
            Section::Cup => &self.cup,
            Section::Steam => &self.steam,
            Section::A3sync => &self.a3sync,
        }
    }

    fn section_mut(&mut self, s: Section) -> &mut BTreeMap<String, String> {
        match s {
            Section::Github => &mut self.github,
            Section::Cup => &mut self.cup,
            Section::Steam => &mut self.steam,
            Section::A3sync => &mut self.a3sync,
        }
    }
}

/// Persistent store for [`WatermarkDoc`]. Checkers never open the file
/// themselves; all access goes through `get`/`set` here.
#[derive(Debug)]
pub struct WatermarkStore {
    path: PathBuf,
    doc: Mutex<WatermarkDoc>,
}

impl WatermarkStore {
    /// Open the store at `path`. A missing or unparsable document becomes the
    /// default (empty) one, which makes the next check treat every item as
    /// new. That over-broad first diff is accepted behavior, so it is only
    /// logged here.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let doc = match fs::read_to_string(&path).await {
            Ok(s) => match serde_json::from_str(&s) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "watermark file unparsable, starting from empty state");
                    WatermarkDoc::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "no watermark file, starting from empty state");
                WatermarkDoc::default()
            }
        };

        Self {
            path,
            doc: Mutex::new(doc),
        }
    }

    pub async fn get(&self, section: Section) -> BTreeMap<String, String> {
        self.doc.lock().await.section(section).clone()
    }

    /// Replace a section and rewrite the document. No-op (and no disk write)
    /// when the section is already identical.
    pub async fn set(&self, section: Section, map: BTreeMap<String, String>) -> Result<()> {
        let mut doc = self.doc.lock().await;
        if *doc.section(section) == map {
            return Ok(());
        }
        *doc.section_mut(section) = map;
        self.persist(&doc).await
    }

    /// The a3sync checker tracks its file map and the repository's total size
    /// together; both move in one write.
    pub async fn set_a3sync(&self, map: BTreeMap<String, String>, total_size: f64) -> Result<()> {
        let mut doc = self.doc.lock().await;
        if doc.a3sync == map && doc.a3sync_total_size == total_size {
            return Ok(());
        }
        doc.a3sync = map;
        doc.a3sync_total_size = total_size;
        self.persist(&doc).await
    }

    pub async fn a3sync_total_size(&self) -> f64 {
        self.doc.lock().await.a3sync_total_size
    }

    pub async fn calendar_last(&self) -> Option<String> {
        self.doc.lock().await.calendar_last.clone()
    }

    pub async fn set_calendar_last(&self, value: Option<String>) -> Result<()> {
        let mut doc = self.doc.lock().await;
        if doc.calendar_last == value {
            return Ok(());
        }
        doc.calendar_last = value;
        self.persist(&doc).await
    }

    pub async fn snapshot(&self) -> WatermarkDoc {
        self.doc.lock().await.clone()
    }

    // Caller holds the lock, so writers are serialized. Write-then-rename
    // keeps a crash from leaving a truncated document behind.
    async fn persist(&self, doc: &WatermarkDoc) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating state dir {}", dir.display()))?;
            }
        }
        let body = serde_json::to_vec_pretty(doc).context("serializing watermarks")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming into {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_empty_doc() {
        let dir = tempfile::tempdir().unwrap();
        let store = WatermarkStore::open(dir.path().join("watermarks.json")).await;
        assert!(store.get(Section::Github).await.is_empty());
        assert_eq!(store.calendar_last().await, None);
    }

    #[tokio::test]
    async fn corrupt_file_yields_empty_doc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermarks.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = WatermarkStore::open(&path).await;
        assert!(store.get(Section::Steam).await.is_empty());
    }

    #[tokio::test]
    async fn set_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermarks.json");

        let store = WatermarkStore::open(&path).await;
        let mut map = BTreeMap::new();
        map.insert("acemod/ACE3".to_string(), "Tue, 01 Jul 2025 10:00:00 GMT".to_string());
        store.set(Section::Github, map.clone()).await.unwrap();

        let reopened = WatermarkStore::open(&path).await;
        assert_eq!(reopened.get(Section::Github).await, map);
    }

    #[tokio::test]
    async fn identical_set_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermarks.json");

        let store = WatermarkStore::open(&path).await;
        let mut map = BTreeMap::new();
        map.insert("cba".to_string(), "3.18".to_string());
        store.set(Section::Cup, map.clone()).await.unwrap();

        let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
        store.set(Section::Cup, map).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), mtime);
    }
}
