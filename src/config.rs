use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Scrape cadence in minutes, counted from local midnight
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Offset of the wall clock the cadence is aligned to
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub run_on_start: bool,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    pub feeds: Vec<FeedConfig>,
}

/// One scrape per day; boundaries restart at local midnight.
pub const MAX_REFRESH_INTERVAL: u64 = 24 * 60;

fn default_refresh_interval() -> u64 {
    30
}

// Asia/Ho_Chi_Minh
fn default_utc_offset_minutes() -> i32 {
    420
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub url: String,
    pub category_name: String,
    pub category_slug: String,
}

/// How an item whose slug already belongs to another category is treated.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// The slug is the only dedupe key; the first writer wins.
    #[default]
    Global,
    /// Same slug in a different category is stored under `{slug}-{category_slug}`.
    PerCategory,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(1..=MAX_REFRESH_INTERVAL).contains(&self.refresh_interval) {
            anyhow::bail!(
                "refresh_interval must be between 1 and {} minutes, got {}",
                MAX_REFRESH_INTERVAL,
                self.refresh_interval
            );
        }
        if !(-720..=840).contains(&self.utc_offset_minutes) {
            anyhow::bail!(
                "utc_offset_minutes must be between -720 and 840, got {}",
                self.utc_offset_minutes
            );
        }
        for feed in &self.feeds {
            if feed.category_slug.trim().is_empty() {
                anyhow::bail!("feed '{}' has an empty category_slug", feed.url);
            }
        }
        Ok(())
    }
}
