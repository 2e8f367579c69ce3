//! Drives one event from "seen in the feed" to "every subscriber summoned",
//! possibly across several invocations.
//!
//! State per event lives in the [`Ledger`]:
//! - no record: `NEW`. The completion marker is claimed *before* anything is
//!   posted, so a crash after the claim skips the event instead of posting the
//!   announcement twice.
//! - resume token: `RESUMING`. The announcement already exists; continue
//!   replying after the token's cursor.
//! - completion marker only: `DONE`.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::batcher::{subscriber_rows, Batcher};
use crate::ledger::Ledger;
use crate::model::{Cursor, Event, EventState, Message, Outcome, ResumeToken};
use crate::reddit::Messenger;
use crate::sheets::Directory;

/// Where the subscriber directory lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRange {
    pub sheet_id: String,
    pub range: String,
}

pub struct Summoner {
    messenger: Arc<dyn Messenger>,
    directory: Arc<dyn Directory>,
    ledger: Ledger,
    batcher: Batcher,
    source: DirectoryRange,
    announcement: String,
}

impl Summoner {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        directory: Arc<dyn Directory>,
        ledger: Ledger,
        batcher: Batcher,
        source: DirectoryRange,
        announcement: impl Into<String>,
    ) -> Self {
        Self {
            messenger,
            directory,
            ledger,
            batcher,
            source,
            announcement: announcement.into(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Handle an event observed in the feed.
    #[instrument(skip_all, fields(event_id = %event.id))]
    pub async fn handle(&self, event: &Event) -> Result<Outcome> {
        if let Some(token) = self.ledger.get_token(&event.id).await? {
            return self.resume(event, token).await;
        }

        if self.ledger.is_completed(&event.id).await? {
            debug!("event already handled");
            return Ok(Outcome::AlreadyCompleted);
        }

        if !self.ledger.claim(&event.id).await? {
            info!("event claimed by a concurrent run");
            return Ok(Outcome::ClaimLost);
        }
        info!(state = EventState::New.as_str(), permalink = %event.permalink, "summoning subscribers");
        self.drive(event, EventState::New, None, None).await
    }

    /// Continue an event from its resume token.
    #[instrument(skip_all, fields(event_id = %event.id))]
    pub async fn resume(&self, event: &Event, token: ResumeToken) -> Result<Outcome> {
        info!(
            state = EventState::Resuming.as_str(),
            cursor = %token.last_processed_subscriber,
            index = token.last_processed_index,
            parent = %token.parent_message_id,
            "resuming summons"
        );
        let cursor = token.cursor();
        let parent = Some(token.parent_message_id).filter(|id| !id.is_empty());
        self.drive(event, EventState::Resuming, cursor, parent).await
    }

    async fn drive(
        &self,
        event: &Event,
        state: EventState,
        cursor: Option<Cursor>,
        parent_id: Option<String>,
    ) -> Result<Outcome> {
        let values = self
            .directory
            .read_range(&self.source.sheet_id, &self.source.range)
            .await
            .context("failed to read subscriber directory")?;
        let rows = subscriber_rows(&values);
        let page = self.batcher.paginate(&rows, cursor.as_ref());

        if page.batches.is_empty() {
            if state == EventState::Resuming {
                // Nothing left past the cursor; the token would otherwise be swept forever.
                self.ledger.delete_token(&event.id).await?;
            }
            info!(state = EventState::Done.as_str(), "no subscribers left to summon");
            return Ok(Outcome::NoSubscribers);
        }

        let parent = self.parent_message(event, parent_id).await?;
        debug!(
            state = EventState::Posting.as_str(),
            batches = page.batches.len(),
            parent = %parent.id,
            "posting summons"
        );

        let mut replies = 0;
        let mut failed = 0;
        for text in &page.batches {
            match self.messenger.post_reply(&parent, text).await {
                Ok(reply) => {
                    replies += 1;
                    debug!(reply = %reply.id, "posted summon batch");
                }
                Err(err) => {
                    failed += 1;
                    warn!(?err, batch = %text, "failed to post summon batch; skipping");
                }
            }
        }

        match page.cursor {
            Some(cursor) => {
                let token = ResumeToken::new(parent.id.clone(), cursor);
                self.ledger.put_token(&event.id, &token).await?;
                info!(
                    state = EventState::Resuming.as_str(),
                    replies, failed,
                    cursor = %token.last_processed_subscriber,
                    index = token.last_processed_index,
                    "run limit reached; saved resume token"
                );
                Ok(Outcome::Yielded { replies, failed, cursor: token.last_processed_subscriber })
            }
            None => {
                self.ledger.delete_token(&event.id).await?;
                info!(state = EventState::Done.as_str(), replies, failed, "all subscribers summoned");
                Ok(Outcome::Completed { replies, failed })
            }
        }
    }

    async fn parent_message(&self, event: &Event, known: Option<String>) -> Result<Message> {
        match known {
            Some(id) => self
                .messenger
                .get_message(&id)
                .await
                .with_context(|| format!("failed to locate announcement {}", id)),
            None => {
                let parent = self
                    .messenger
                    .post_root(event, &self.announcement)
                    .await
                    .context("failed to post announcement")?;
                info!(parent = %parent.id, "posted announcement");
                Ok(parent)
            }
        }
    }
}
