//! RSS ingestion: fetch, parse, dedupe and store every configured feed.
//!
//! A run walks the feed registry strictly in order. Each feed is isolated:
//! a fetch, parse or storage failure is logged and recorded in that feed's
//! [`FeedReport`], and the run moves on to the next feed. At most one run is
//! active at a time; a second request while one is in flight gets
//! [`IngestError::AlreadyRunning`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DuplicatePolicy, FeedConfig};
use crate::db::{Category, Database, NewArticle};
use crate::error::{IngestError, Result};
use crate::fetcher::FeedFetcher;
use crate::parser::{parse_feed, FeedItem};
use crate::slug::slugify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
    Startup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedCounts {
    pub items_seen: usize,
    pub articles_created: usize,
    pub duplicates_skipped: usize,
    /// Items with no usable title, so no slug could be derived.
    pub items_skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedReport {
    pub url: String,
    pub category_slug: String,
    pub status: FeedStatus,
    pub error: Option<String>,
    #[serde(flatten)]
    pub counts: FeedCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub feeds: Vec<FeedReport>,
}

impl RunReport {
    pub fn articles_created(&self) -> usize {
        self.feeds.iter().map(|f| f.counts.articles_created).sum()
    }

    pub fn failed_feeds(&self) -> usize {
        self.feeds
            .iter()
            .filter(|f| f.status == FeedStatus::Failed)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Created,
    Duplicate,
    Skipped,
}

/// Clears the running flag when dropped, including on panic or abort.
struct RunGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

pub struct Ingestor {
    db: Arc<Database>,
    fetcher: FeedFetcher,
    feeds: Vec<FeedConfig>,
    policy: DuplicatePolicy,
    running: Arc<AtomicBool>,
    last_report: RwLock<Option<RunReport>>,
}

impl Ingestor {
    pub fn new(
        db: Arc<Database>,
        feeds: Vec<FeedConfig>,
        policy: DuplicatePolicy,
        fetch_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            db,
            fetcher: FeedFetcher::new(fetch_timeout)?,
            feeds,
            policy,
            running: Arc::new(AtomicBool::new(false)),
            last_report: RwLock::new(None),
        })
    }

    pub fn from_config(db: Arc<Database>, config: &Config) -> Result<Self> {
        Self::new(
            db,
            config.feeds.clone(),
            config.duplicate_policy,
            Duration::from_secs(config.fetch_timeout_secs),
        )
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn last_report(&self) -> Option<RunReport> {
        self.last_report.read().await.clone()
    }

    fn acquire(&self) -> Result<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| IngestError::AlreadyRunning)?;

        Ok(RunGuard {
            running: self.running.clone(),
        })
    }

    /// Run a full pass and wait for it to finish.
    pub async fn run(&self, trigger: Trigger) -> Result<RunReport> {
        let guard = self.acquire()?;
        Ok(self.run_guarded(guard, trigger).await)
    }

    /// Start a pass in the background. Returns as soon as the run is claimed.
    pub fn try_start(self: &Arc<Self>, trigger: Trigger) -> Result<()> {
        let guard = self.acquire()?;
        let ingestor = Arc::clone(self);

        tokio::spawn(async move {
            ingestor.run_guarded(guard, trigger).await;
        });

        Ok(())
    }

    async fn run_guarded(&self, _guard: RunGuard, trigger: Trigger) -> RunReport {
        let report = self.scrape_all_feeds(trigger).await;

        info!(
            "Scrape finished: {} feeds, {} failed, {} new articles",
            report.feeds.len(),
            report.failed_feeds(),
            report.articles_created()
        );

        *self.last_report.write().await = Some(report.clone());
        report
    }

    /// Scrape every registered feed in order. Per-feed failures are recorded,
    /// never propagated.
    pub async fn scrape_all_feeds(&self, trigger: Trigger) -> RunReport {
        let started_at = Utc::now();
        info!("Scraping {} feeds ({:?})", self.feeds.len(), trigger);

        let mut feeds = Vec::with_capacity(self.feeds.len());
        for feed in &self.feeds {
            let mut counts = FeedCounts::default();
            let result = self
                .scrape_feed(&feed.url, &feed.category_name, &feed.category_slug, &mut counts)
                .await;

            let (status, error) = match result {
                Ok(()) => (FeedStatus::Succeeded, None),
                Err(e) => {
                    error!("Failed to scrape feed '{}': {}", feed.url, e);
                    (FeedStatus::Failed, Some(e.to_string()))
                }
            };

            feeds.push(FeedReport {
                url: feed.url.clone(),
                category_slug: feed.category_slug.clone(),
                status,
                error,
                counts,
            });
        }

        RunReport {
            trigger,
            started_at,
            finished_at: Utc::now(),
            feeds,
        }
    }

    /// Counts are updated as items are processed, so a feed that fails
    /// part-way still reports what it stored before the failure.
    pub async fn scrape_feed(
        &self,
        url: &str,
        category_name: &str,
        category_slug: &str,
        counts: &mut FeedCounts,
    ) -> Result<()> {
        info!("Fetching feed: {} ({})", category_name, url);

        let bytes = self.fetcher.fetch(url).await?;
        let items = parse_feed(&bytes)?;
        counts.items_seen = items.len();

        if items.is_empty() {
            info!("Feed '{}' has no items", url);
            return Ok(());
        }

        let category = self.db.resolve_category(category_name, category_slug).await?;

        for item in &items {
            match self.ingest_item(item, &category).await? {
                ItemOutcome::Created => counts.articles_created += 1,
                ItemOutcome::Duplicate => counts.duplicates_skipped += 1,
                ItemOutcome::Skipped => counts.items_skipped += 1,
            }
        }

        info!(
            "Added {} new articles for '{}' ({} already stored)",
            counts.articles_created, category_slug, counts.duplicates_skipped
        );
        Ok(())
    }

    async fn ingest_item(&self, item: &FeedItem, category: &Category) -> Result<ItemOutcome> {
        let base_slug = slugify(&item.title);
        if base_slug.is_empty() {
            warn!("Skipping item without usable title: {}", item.link);
            return Ok(ItemOutcome::Skipped);
        }

        let Some(slug) = self.available_slug(base_slug, category).await? else {
            return Ok(ItemOutcome::Duplicate);
        };

        let article = NewArticle {
            title: item.title.clone(),
            slug,
            content: item.description.clone(),
            thumbnail: item.thumbnail.clone().unwrap_or_default(),
            published_at: item.published,
            category_id: Some(category.id),
            author_id: None,
        };

        match self.db.insert_article_if_absent(&article).await? {
            Some(stored) => {
                info!("Saved new article: {}", stored.title);
                Ok(ItemOutcome::Created)
            }
            None => {
                debug!("Slug '{}' was taken concurrently", article.slug);
                Ok(ItemOutcome::Duplicate)
            }
        }
    }

    /// The slug to store the item under, or `None` if it is a duplicate.
    async fn available_slug(&self, slug: String, category: &Category) -> Result<Option<String>> {
        let Some(existing) = self.db.find_article_by_slug(&slug).await? else {
            return Ok(Some(slug));
        };

        if self.policy == DuplicatePolicy::Global || existing.category_id == Some(category.id) {
            return Ok(None);
        }

        let scoped = format!("{}-{}", slug, category.slug);
        if self.db.find_article_by_slug(&scoped).await?.is_some() {
            return Ok(None);
        }
        Ok(Some(scoped))
    }
}
