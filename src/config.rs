//! Configuration loader and validator for the subscriber summoning bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::batcher::Limits;
use crate::scanner::Classifier;

pub const ENV_REDDIT_CLIENT_SECRET: &str = "REDDIT_CLIENT_SECRET";
pub const ENV_REDDIT_PASSWORD: &str = "REDDIT_PASSWORD";
pub const ENV_GOOGLE_API_TOKEN: &str = "GOOGLE_API_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Missing environment variable {0}")]
    MissingSecret(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub reddit: Reddit,
    pub sheets: Sheets,
    pub summon: Summon,
    pub classifier: ClassifierConfig,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Seconds between scans when running as a long-lived process; 0 runs once.
    #[serde(default)]
    pub interval_seconds: u64,
}

/// Reddit account and listing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reddit {
    pub client_id: String,
    pub username: String,
    pub user_agent: String,
    pub subreddit: String,
    pub listing_limit: u32,
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

/// Subscriber spreadsheet location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sheets {
    pub spreadsheet_id: String,
    pub range: String,
}

/// Batch sizing and message text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summon {
    pub max_per_batch: usize,
    pub max_users_per_run: usize,
    pub mention_prefix: String,
    pub batch_prefix: String,
    pub announcement: String,
}

/// Title heuristic for notifiable posts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifierConfig {
    pub marker: String,
    pub topic_keyword: String,
    pub exclude_keyword: String,
}

/// Credentials pulled from the environment at bootstrap.
#[derive(Clone)]
pub struct Secrets {
    pub reddit_client_secret: String,
    pub reddit_password: String,
    pub google_api_token: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets").finish_non_exhaustive()
    }
}

fn default_throttle_ms() -> u64 {
    10_000
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.data_dir)
    }

    /// SQLite URL for the ledger, honouring `DATABASE_URL` when set.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "sqlite://{}/summonbot.db",
                self.app.data_dir.trim_end_matches('/')
            )
        })
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_per_batch: self.summon.max_per_batch,
            max_users_per_run: self.summon.max_users_per_run,
        }
    }

    pub fn classifier(&self) -> Classifier {
        Classifier {
            marker: self.classifier.marker.clone(),
            topic_keyword: self.classifier.topic_keyword.clone(),
            exclude_keyword: self.classifier.exclude_keyword.clone(),
        }
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            reddit_client_secret: required_env(ENV_REDDIT_CLIENT_SECRET)?,
            reddit_password: required_env(ENV_REDDIT_PASSWORD)?,
            google_api_token: required_env(ENV_GOOGLE_API_TOKEN)?,
        })
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingSecret(name)),
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.reddit.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.client_id must be non-empty"));
    }
    if cfg.reddit.username.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.username must be non-empty"));
    }
    if cfg.reddit.user_agent.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.user_agent must be non-empty"));
    }
    if cfg.reddit.subreddit.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.subreddit must be non-empty"));
    }
    // Reddit caps listings at 100 items.
    if !(1..=100).contains(&cfg.reddit.listing_limit) {
        return Err(ConfigError::Invalid("reddit.listing_limit must be within 1..=100"));
    }

    if cfg.sheets.spreadsheet_id.trim().is_empty() {
        return Err(ConfigError::Invalid("sheets.spreadsheet_id must be non-empty"));
    }
    if cfg.sheets.range.trim().is_empty() {
        return Err(ConfigError::Invalid("sheets.range must be non-empty"));
    }

    let s = &cfg.summon;
    if s.max_per_batch == 0 {
        return Err(ConfigError::Invalid("summon.max_per_batch must be > 0"));
    }
    if s.max_users_per_run < s.max_per_batch {
        return Err(ConfigError::Invalid(
            "summon.max_users_per_run must be >= summon.max_per_batch",
        ));
    }
    if s.mention_prefix.trim().is_empty() {
        return Err(ConfigError::Invalid("summon.mention_prefix must be non-empty"));
    }
    if s.announcement.trim().is_empty() {
        return Err(ConfigError::Invalid("summon.announcement must be non-empty"));
    }

    let c = &cfg.classifier;
    if c.marker.is_empty() || c.topic_keyword.is_empty() || c.exclude_keyword.is_empty() {
        return Err(ConfigError::Invalid("classifier fields must be non-empty"));
    }

    Ok(())
}

/// Example configuration shipped with the bot.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  interval_seconds: 0

reddit:
  client_id: "YOUR_REDDIT_CLIENT_ID"
  username: "CrossStitchBot"
  user_agent: "summonbot/0.1 (by u/CrossStitchBot)"
  subreddit: "CrossStitch"
  listing_limit: 20
  throttle_ms: 10000

sheets:
  spreadsheet_id: "YOUR_SPREADSHEET_ID"
  range: "SignedUp!A2:A"

summon:
  max_per_batch: 3
  max_users_per_run: 12
  mention_prefix: "u/"
  batch_prefix: "Summoning contestants "
  announcement: "This month's competition is live! Please submit your piece and/or vote for your favorite entries!\n\nTo subscribe to future monthly competition posts, please fill out the signup form and our friendly robot will summon you. You may unsubscribe at any time using the same form!"

classifier:
  marker: "[MOD]"
  topic_keyword: "competition"
  exclude_keyword: "winner"
"#
}
