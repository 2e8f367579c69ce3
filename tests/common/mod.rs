#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use summonbot::batcher::{Batcher, Limits};
use summonbot::ledger::Ledger;
use summonbot::model::{Event, Message};
use summonbot::reddit::{FeedSource, Messenger, Sort};
use summonbot::sheets::Directory;
use summonbot::store::{Key, MemoryStore, Store};
use summonbot::summoner::{DirectoryRange, Summoner};

pub const ANNOUNCEMENT: &str = "This month's competition is live!";

pub fn user(i: usize) -> String {
    format!("u/user-{}", i)
}

pub fn users(n: usize) -> Vec<Vec<String>> {
    (0..n).map(|i| vec![user(i)]).collect()
}

pub fn post(id: &str, title: &str) -> Event {
    Event {
        id: id.to_string(),
        title: title.to_string(),
        permalink: format!("/r/CrossStitch/comments/{}/", id),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posted {
    pub parent: String,
    pub text: String,
}

#[derive(Clone, Default)]
pub struct RecordingMessenger {
    roots: Arc<Mutex<Vec<Posted>>>,
    replies: Arc<Mutex<Vec<Posted>>>,
    lookups: Arc<Mutex<Vec<String>>>,
    next_id: Arc<AtomicUsize>,
    fail_roots: Arc<AtomicUsize>,
    fail_reply_containing: Arc<Mutex<Option<String>>>,
}

impl RecordingMessenger {
    /// Make the next `n` announcement posts fail.
    pub fn fail_next_roots(&self, n: usize) {
        self.fail_roots.store(n, Ordering::SeqCst);
    }

    pub async fn fail_replies_containing(&self, needle: &str) {
        *self.fail_reply_containing.lock().await = Some(needle.to_string());
    }

    pub async fn roots(&self) -> Vec<Posted> {
        self.roots.lock().await.clone()
    }

    pub async fn replies(&self) -> Vec<Posted> {
        self.replies.lock().await.clone()
    }

    pub async fn lookups(&self) -> Vec<String> {
        self.lookups.lock().await.clone()
    }

    /// Every call that reached the platform, lookups included.
    pub async fn total_calls(&self) -> usize {
        self.roots().await.len() + self.replies().await.len() + self.lookups().await.len()
    }

    fn mint(&self) -> Message {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Message {
            id: format!("t1_c{}", n),
        }
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn post_root(&self, event: &Event, text: &str) -> Result<Message> {
        self.roots.lock().await.push(Posted {
            parent: event.id.clone(),
            text: text.to_string(),
        });
        let pending = self.fail_roots.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_roots.store(pending - 1, Ordering::SeqCst);
            return Err(anyhow!("503 from platform"));
        }
        Ok(self.mint())
    }

    async fn post_reply(&self, parent: &Message, text: &str) -> Result<Message> {
        self.replies.lock().await.push(Posted {
            parent: parent.id.clone(),
            text: text.to_string(),
        });
        if let Some(needle) = self.fail_reply_containing.lock().await.as_deref() {
            if text.contains(needle) {
                return Err(anyhow!("comment rejected"));
            }
        }
        Ok(self.mint())
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        self.lookups.lock().await.push(id.to_string());
        Ok(Message { id: id.to_string() })
    }
}

#[derive(Clone, Default)]
pub struct StaticDirectory {
    rows: Arc<Mutex<Vec<Vec<String>>>>,
    fail: Arc<AtomicUsize>,
}

impl StaticDirectory {
    pub fn with_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(rows)),
            ..Default::default()
        }
    }

    pub async fn set_rows(&self, rows: Vec<Vec<String>>) {
        *self.rows.lock().await = rows;
    }

    pub fn fail_next(&self) {
        self.fail.store(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn read_range(&self, _sheet_id: &str, _range: &str) -> Result<Vec<Vec<String>>> {
        if self.fail.swap(0, Ordering::SeqCst) > 0 {
            return Err(anyhow!("sheets unavailable"));
        }
        Ok(self.rows.lock().await.clone())
    }
}

#[derive(Clone, Default)]
pub struct StaticFeed {
    events: Arc<Mutex<Vec<Event>>>,
    queries: Arc<Mutex<Vec<(String, Sort, u32)>>>,
}

impl StaticFeed {
    pub fn with_events(events: Vec<Event>) -> Self {
        Self {
            events: Arc::new(Mutex::new(events)),
            ..Default::default()
        }
    }

    pub async fn queries(&self) -> Vec<(String, Sort, u32)> {
        self.queries.lock().await.clone()
    }
}

#[async_trait]
impl FeedSource for StaticFeed {
    async fn list_recent(&self, subreddit: &str, sort: Sort, limit: u32) -> Result<Vec<Event>> {
        self.queries
            .lock()
            .await
            .push((subreddit.to_string(), sort, limit));
        Ok(self.events.lock().await.clone())
    }
}

/// Memory store that counts mutating calls.
#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    writes: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for CountingStore {
    async fn get(&self, key: &Key) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &Key, value: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, value).await
    }

    async fn put_if_absent(&self, key: &Key, value: &str) -> Result<bool> {
        let inserted = self.inner.put_if_absent(key, value).await?;
        if inserted {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(inserted)
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        if self.inner.get(key).await?.is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.delete(key).await
    }

    async fn list(&self, kind: &'static str) -> Result<Vec<(String, String)>> {
        self.inner.list(kind).await
    }
}

pub struct Harness {
    pub messenger: RecordingMessenger,
    pub directory: StaticDirectory,
    pub store: CountingStore,
    pub ledger: Ledger,
}

impl Harness {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        let store = CountingStore::default();
        Self {
            messenger: RecordingMessenger::default(),
            directory: StaticDirectory::with_rows(rows),
            ledger: Ledger::new(Arc::new(store.clone())),
            store,
        }
    }

    pub fn summoner(&self) -> Summoner {
        self.summoner_with(Limits::default())
    }

    pub fn summoner_with(&self, limits: Limits) -> Summoner {
        Summoner::new(
            Arc::new(self.messenger.clone()),
            Arc::new(self.directory.clone()),
            self.ledger.clone(),
            Batcher::new(limits, "u/", "Summoning contestants "),
            DirectoryRange {
                sheet_id: "sheet-1".into(),
                range: "SignedUp!A2:A".into(),
            },
            ANNOUNCEMENT,
        )
    }
}
