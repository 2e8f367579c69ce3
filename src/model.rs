use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A post from the feed that may need its subscribers summoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Platform fullname of the post (e.g. `t3_abc123`).
    pub id: String,
    pub title: String,
    pub permalink: String,
}

/// A message posted on the platform (a comment, for Reddit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
}

/// One directory row, already reduced to the mention column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberRow {
    /// Zero-based position in the directory.
    pub index: usize,
    pub username: String,
}

/// Position of the last subscriber consumed. The username guards against rows
/// that moved since the cursor was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub index: usize,
    pub username: String,
}

impl Cursor {
    pub fn new(index: usize, username: impl Into<String>) -> Self {
        Self {
            index,
            username: username.into(),
        }
    }
}

/// Progress of an event whose subscribers were only partly summoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    pub parent_message_id: String,
    /// Username of the last directory row consumed. Empty means "not started".
    pub last_processed_subscriber: String,
    /// Directory row of `last_processed_subscriber` when it was consumed.
    #[serde(default)]
    pub last_processed_index: usize,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ResumeToken {
    pub fn new(parent_message_id: impl Into<String>, cursor: Cursor) -> Self {
        Self {
            parent_message_id: parent_message_id.into(),
            last_processed_subscriber: cursor.username,
            last_processed_index: cursor.index,
            updated_at: Utc::now(),
        }
    }

    pub fn cursor(&self) -> Option<Cursor> {
        if self.last_processed_subscriber.is_empty() {
            return None;
        }
        Some(Cursor::new(self.last_processed_index, self.last_processed_subscriber.clone()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventState {
    New,
    Resuming,
    Posting,
    Done,
}

impl EventState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::New => "NEW",
            EventState::Resuming => "RESUMING",
            EventState::Posting => "POSTING",
            EventState::Done => "DONE",
        }
    }
}

/// What a single `handle` call did for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A completion marker already existed; nothing was touched.
    AlreadyCompleted,
    /// Another invocation claimed the event first.
    ClaimLost,
    /// The directory had nothing left to summon.
    NoSubscribers,
    /// Some batches were posted and a resume token now holds the cursor.
    Yielded { replies: usize, failed: usize, cursor: String },
    /// The final batches were posted and the event is done.
    Completed { replies: usize, failed: usize },
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::AlreadyCompleted => "already_completed",
            Outcome::ClaimLost => "claim_lost",
            Outcome::NoSubscribers => "no_subscribers",
            Outcome::Yielded { .. } => "yielded",
            Outcome::Completed { .. } => "completed",
        }
    }
}
