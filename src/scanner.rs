use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::model::{Event, Outcome};
use crate::reddit::{FeedSource, Sort};
use crate::summoner::Summoner;

/// Title heuristic for posts whose subscribers should be summoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    pub marker: String,
    pub topic_keyword: String,
    pub exclude_keyword: String,
}

impl Classifier {
    /// Starts with the marker, mentions the topic, and is not a results post.
    pub fn matches(&self, title: &str) -> bool {
        title.starts_with(&self.marker)
            && title.contains(&self.topic_keyword)
            && !title.contains(&self.exclude_keyword)
    }
}

/// Where and how much of the feed to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub subreddit: String,
    pub sort: Sort,
    pub limit: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub seen: usize,
    pub matched: usize,
    pub outcomes: Vec<(String, Outcome)>,
    pub resumed: usize,
}

pub struct Scanner {
    feed: Arc<dyn FeedSource>,
    summoner: Summoner,
    classifier: Classifier,
    query: FeedQuery,
}

impl Scanner {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        summoner: Summoner,
        classifier: Classifier,
        query: FeedQuery,
    ) -> Self {
        Self {
            feed,
            summoner,
            classifier,
            query,
        }
    }

    /// One invocation: handle matching feed posts, then sweep resume tokens for
    /// posts that scrolled off the page. The first error aborts the run.
    #[instrument(skip_all, fields(subreddit = %self.query.subreddit))]
    pub async fn run_once(&self) -> Result<ScanReport> {
        let events = self
            .feed
            .list_recent(&self.query.subreddit, self.query.sort, self.query.limit)
            .await
            .context("failed to list recent posts")?;

        let mut report = ScanReport {
            seen: events.len(),
            ..Default::default()
        };
        let mut driven = HashSet::new();

        for event in events.iter().filter(|e| self.classifier.matches(&e.title)) {
            report.matched += 1;
            // A listing can repeat a post; one pass per invocation is enough.
            if !driven.insert(event.id.clone()) {
                continue;
            }
            let outcome = self
                .summoner
                .handle(event)
                .await
                .with_context(|| format!("failed to summon subscribers for {}", event.permalink))?;
            report.outcomes.push((event.id.clone(), outcome));
        }

        let pending = self
            .summoner
            .ledger()
            .list_pending_tokens()
            .await
            .context("failed to sweep resume tokens")?;
        for (event_id, token) in pending {
            if driven.contains(&event_id) {
                continue;
            }
            let event = Event {
                id: event_id.clone(),
                title: String::new(),
                permalink: String::new(),
            };
            let outcome = self
                .summoner
                .resume(&event, token)
                .await
                .with_context(|| format!("failed to resume summons for {}", event_id))?;
            report.resumed += 1;
            driven.insert(event_id.clone());
            report.outcomes.push((event_id, outcome));
        }

        info!(
            seen = report.seen,
            matched = report.matched,
            resumed = report.resumed,
            "scan finished"
        );
        Ok(report)
    }
}
