use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "FUNNY_TUI";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub offline: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
            offline: false,
        }
    }
}

fn default_base_url() -> String {
    crate::api::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("funny-tui/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_swipe_guard", with = "humantime_serde")]
    pub swipe_guard: Duration,
    #[serde(default = "default_load_private")]
    pub load_private: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            swipe_guard: default_swipe_guard(),
            load_private: default_load_private(),
        }
    }
}

fn default_swipe_guard() -> Duration {
    Duration::from_millis(250)
}

fn default_load_private() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    #[serde(default = "default_video_command")]
    pub video_command: Vec<String>,
    #[serde(default = "default_autoplay")]
    pub autoplay: bool,
    #[serde(default)]
    pub start_muted: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            video_command: default_video_command(),
            autoplay: default_autoplay(),
            start_muted: false,
        }
    }
}

fn default_video_command() -> Vec<String> {
    vec!["mpv".into(), "--force-window=yes".into(), "%URL%".into()]
}

fn default_autoplay() -> bool {
    true
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.base_url.trim().is_empty() {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.user_agent.trim().is_empty() {
        base.api.user_agent = other.api.user_agent;
    }
    if !other.api.timeout.is_zero() {
        base.api.timeout = other.api.timeout;
    }
    base.api.offline = other.api.offline;

    base.feed.swipe_guard = other.feed.swipe_guard;
    base.feed.load_private = other.feed.load_private;

    if !other.player.video_command.is_empty() {
        base.player.video_command = other.player.video_command;
    }
    base.player.autoplay = other.player.autoplay;
    base.player.start_muted = other.player.start_muted;

    base
}

// Only keys present in the environment are applied, so file values survive.
fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "api.offline" => cfg.api.offline = truthy(&value),
        "feed.swipe_guard" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.feed.swipe_guard = duration;
            }
        }
        "feed.load_private" => cfg.feed.load_private = truthy(&value),
        "player.video_command" => {
            cfg.player.video_command = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        "player.autoplay" => cfg.player.autoplay = truthy(&value),
        "player.start_muted" => cfg.player.start_muted = truthy(&value),
        _ => {}
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("funny-tui").join("config.yaml"))
}

pub fn save_api_base_url(path: Option<PathBuf>, base_url: &str) -> Result<PathBuf> {
    let base_url = base_url.trim();
    anyhow::ensure!(!base_url.is_empty(), "config: api.base_url is required");
    url::Url::parse(base_url)
        .with_context(|| format!("config: api.base_url {base_url:?} is not a valid URL"))?;

    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };
    cfg.api.base_url = base_url.to_string();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    fn isolated(prefix: &str, file: Option<PathBuf>) -> LoadOptions {
        LoadOptions {
            config_file: file.or_else(|| Some(PathBuf::from("/nonexistent/funny-tui.yaml"))),
            env_prefix: Some(prefix.to_string()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(isolated("FUNNY_TUI_TEST_DEFAULTS", None)).unwrap();
        assert_eq!(cfg.api.base_url, crate::api::DEFAULT_BASE_URL);
        assert_eq!(cfg.feed.swipe_guard, Duration::from_millis(250));
        assert!(cfg.player.autoplay);
        assert!(!cfg.api.offline);
    }

    #[test]
    fn reads_yaml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  base_url: https://funny.example/v1/funny-app\n  timeout: 5s\nfeed:\n  swipe_guard: 400ms\nplayer:\n  autoplay: false\n",
        )
        .unwrap();
        let cfg = load(isolated("FUNNY_TUI_TEST_FILE", Some(path))).unwrap();
        assert_eq!(cfg.api.base_url, "https://funny.example/v1/funny-app");
        assert_eq!(cfg.api.timeout, Duration::from_secs(5));
        assert_eq!(cfg.feed.swipe_guard, Duration::from_millis(400));
        assert!(!cfg.player.autoplay);
        assert!(cfg.feed.load_private);
    }

    #[test]
    fn save_base_url_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        save_api_base_url(Some(path.clone()), "http://127.0.0.1:9000/v1/funny-app").unwrap();
        let saved = read_config_file(&path).unwrap();
        assert_eq!(saved.api.base_url, "http://127.0.0.1:9000/v1/funny-app");
        assert!(save_api_base_url(Some(path), "not a url").is_err());
    }

    #[test]
    fn env_overrides() {
        env::set_var("FUNNY_TUI_TEST_ENV_API__OFFLINE", "true");
        env::set_var("FUNNY_TUI_TEST_ENV_FEED__SWIPE_GUARD", "1s");
        env::set_var("FUNNY_TUI_TEST_ENV_PLAYER__VIDEO_COMMAND", "vlc, %URL%");
        let cfg = load(isolated("FUNNY_TUI_TEST_ENV", None)).unwrap();
        assert!(cfg.api.offline);
        assert_eq!(cfg.feed.swipe_guard, Duration::from_secs(1));
        assert_eq!(cfg.player.video_command, vec!["vlc", "%URL%"]);
        env::remove_var("FUNNY_TUI_TEST_ENV_API__OFFLINE");
        env::remove_var("FUNNY_TUI_TEST_ENV_FEED__SWIPE_GUARD");
        env::remove_var("FUNNY_TUI_TEST_ENV_PLAYER__VIDEO_COMMAND");
    }
}
