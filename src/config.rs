// src/config.rs
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

const ENV_PATH: &str = "MODWATCH_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/modwatch.toml";

fn default_state_path() -> PathBuf {
    PathBuf::from("state/watermarks.json")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default)]
    pub intervals: Intervals,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub cup: CupConfig,
    #[serde(default)]
    pub steam: SteamConfig,
    #[serde(default)]
    pub a3sync: A3syncConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    /// Destination name -> Discord webhook URL.
    #[serde(default)]
    pub channels: BTreeMap<String, String>,
    /// Audience name -> role id, used to build pings.
    #[serde(default)]
    pub roles: BTreeMap<String, String>,
}

/// Poll intervals in seconds. These are operational knobs, not product
/// constants; deployments tune them per source.
#[derive(Debug, Clone, Deserialize)]
pub struct Intervals {
    pub modcheck: u64,
    pub a3sync: u64,
    pub calendar: u64,
    pub presence: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            modcheck: 3600,
            a3sync: 600,
            calendar: 60,
            presence: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "GithubConfig::default_api_base")]
    pub api_base: String,
    /// "owner/repo" slugs whose latest release is watched.
    #[serde(default)]
    pub repos: Vec<String>,
}

impl GithubConfig {
    fn default_api_base() -> String {
        "https://api.github.com".to_string()
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: Self::default_api_base(),
            repos: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CupConfig {
    #[serde(default = "CupConfig::default_url")]
    pub url: String,
}

impl CupConfig {
    fn default_url() -> String {
        "http://cup-arma3.org/download".to_string()
    }
}

impl Default for CupConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SteamConfig {
    #[serde(default = "SteamConfig::default_api_base")]
    pub api_base: String,
    #[serde(default = "SteamConfig::default_community_base")]
    pub community_base: String,
    /// Workshop published-file ids.
    #[serde(default)]
    pub file_ids: Vec<String>,
}

impl SteamConfig {
    fn default_api_base() -> String {
        "https://api.steampowered.com".to_string()
    }
    fn default_community_base() -> String {
        "https://steamcommunity.com".to_string()
    }
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            api_base: Self::default_api_base(),
            community_base: Self::default_community_base(),
            file_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct A3syncConfig {
    /// URL of the repository file listing (HTML index).
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "CalendarConfig::default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub calendar_id: String,
    /// Fallback destination when no route matches.
    #[serde(default = "CalendarConfig::default_channel")]
    pub default_channel: String,
    /// First matching keyword wins; audience "ignored" suppresses the event.
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

impl CalendarConfig {
    fn default_api_base() -> String {
        "https://www.googleapis.com/calendar/v3".to_string()
    }
    fn default_channel() -> String {
        "op_news".to_string()
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            api_base: Self::default_api_base(),
            calendar_id: String::new(),
            default_channel: Self::default_channel(),
            routes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RouteRule {
    /// Matched case-insensitively against the event summary.
    pub keyword: String,
    pub audience: String,
    pub channel: String,
}

/// Load configuration from an explicit path.
pub fn load_from(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
}

/// Load configuration using env var + fallback:
/// 1) $MODWATCH_CONFIG_PATH
/// 2) config/modwatch.toml
pub fn load_default() -> Result<Config> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(anyhow!("MODWATCH_CONFIG_PATH points to non-existent path"));
    }
    let fallback = PathBuf::from(DEFAULT_PATH);
    if fallback.exists() {
        return load_from(&fallback);
    }
    Err(anyhow!(
        "no configuration found (set {ENV_PATH} or provide {DEFAULT_PATH})"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    const SAMPLE: &str = r#"
state_path = "state/wm.json"

[intervals]
modcheck = 1800
a3sync = 600
calendar = 60
presence = 60

[github]
repos = ["CBATeam/CBA_A3", "acemod/ACE3"]

[steam]
file_ids = ["450814997"]

[a3sync]
url = "https://repo.example.org/main/"

[calendar]
calendar_id = "ops@example.com"

[[calendar.routes]]
keyword = "recruit"
audience = "recruits"
channel = "op_news"

[channels]
staff = "https://discord.example/hooks/staff"

[roles]
admin = "1111"
"#;

    #[test]
    fn sample_config_parses() {
        let cfg: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.github.repos.len(), 2);
        assert_eq!(cfg.intervals.modcheck, 1800);
        assert_eq!(cfg.github.api_base, "https://api.github.com");
        assert_eq!(cfg.calendar.routes[0].keyword, "recruit");
        assert_eq!(cfg.channels["staff"], "https://discord.example/hooks/staff");
        assert_eq!(cfg.state_path, PathBuf::from("state/wm.json"));
    }

    #[test]
    fn empty_config_gets_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.intervals.modcheck, 3600);
        assert_eq!(cfg.cup.url, "http://cup-arma3.org/download");
        assert!(cfg.github.repos.is_empty());
    }

    #[serial_test::serial]
    #[test]
    fn env_path_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("modwatch.toml");
        fs::write(&p, SAMPLE).unwrap();

        env::set_var(ENV_PATH, p.display().to_string());
        let cfg = load_default().unwrap();
        assert_eq!(cfg.intervals.modcheck, 1800);
        env::remove_var(ENV_PATH);
    }
}
