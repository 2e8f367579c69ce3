//! Splits the subscriber directory into mention batches.
//!
//! A run consumes at most `max_users_per_run` valid subscribers and hands back
//! the row and username of the last one consumed as a cursor, so the next
//! invocation can pick up right after it.

use regex::Regex;
use tracing::warn;

use crate::model::{Cursor, SubscriberRow};

/// Batch sizing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Mentions per reply.
    pub max_per_batch: usize,
    /// Subscribers consumed before yielding a resume cursor.
    pub max_users_per_run: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_per_batch: 3,
            max_users_per_run: 12,
        }
    }
}

/// Result of one pagination pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub batches: Vec<String>,
    /// Set when valid subscribers remain after this pass.
    pub cursor: Option<Cursor>,
    /// Number of subscribers mentioned across `batches`.
    pub summoned: usize,
}

#[derive(Debug, Clone)]
pub struct Batcher {
    limits: Limits,
    mention: Regex,
    batch_prefix: String,
}

/// Reduce raw spreadsheet rows to the mention column. Blank rows keep their
/// position so indexes match the sheet.
pub fn subscriber_rows(values: &[Vec<String>]) -> Vec<SubscriberRow> {
    values
        .iter()
        .enumerate()
        .map(|(index, row)| SubscriberRow {
            index,
            username: row.first().map(|c| c.trim().to_string()).unwrap_or_default(),
        })
        .collect()
}

/// First row after `cursor`. Prefers the recorded position, then the next row
/// at or after it with the same username. `None` when the username is gone
/// from that part of the directory.
fn resume_position(rows: &[SubscriberRow], cursor: &Cursor) -> Option<usize> {
    if rows.get(cursor.index).is_some_and(|r| r.username == cursor.username) {
        return Some(cursor.index + 1);
    }
    rows.iter()
        .enumerate()
        .skip(cursor.index)
        .find(|(_, r)| r.username == cursor.username)
        .map(|(pos, _)| pos + 1)
}

impl Batcher {
    pub fn new(limits: Limits, mention_prefix: &str, batch_prefix: impl Into<String>) -> Self {
        let pattern = format!("^{}[A-Za-z0-9_-]+$", regex::escape(mention_prefix));
        Self {
            limits,
            mention: Regex::new(&pattern).expect("escaped mention pattern is valid"),
            batch_prefix: batch_prefix.into(),
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn is_valid(&self, username: &str) -> bool {
        self.mention.is_match(username)
    }

    /// Build the batches for one run, starting after `cursor` when given.
    ///
    /// A cursor that no longer appears in the directory restarts from the first
    /// row, which may summon some users twice but never skips anyone.
    pub fn paginate(&self, rows: &[SubscriberRow], cursor: Option<&Cursor>) -> Page {
        let start = match cursor.filter(|c| !c.username.is_empty()) {
            None => 0,
            Some(c) => resume_position(rows, c).unwrap_or_else(|| {
                warn!(
                    cursor = %c.username,
                    index = c.index,
                    "resume cursor not found in directory; restarting from the top"
                );
                0
            }),
        };

        let mut page = Page::default();
        let mut group: Vec<&str> = Vec::with_capacity(self.limits.max_per_batch);

        for (offset, row) in rows[start.min(rows.len())..].iter().enumerate() {
            if !self.is_valid(&row.username) {
                warn!(row = row.index, username = %row.username, "skipping invalid subscriber row");
                continue;
            }

            group.push(&row.username);
            page.summoned += 1;
            if group.len() == self.limits.max_per_batch {
                page.batches.push(self.format(&group));
                group.clear();
            }

            if page.summoned == self.limits.max_users_per_run {
                let pos = start + offset;
                if rows[pos + 1..].iter().any(|r| self.is_valid(&r.username)) {
                    page.cursor = Some(Cursor::new(pos, row.username.clone()));
                }
                break;
            }
        }

        if !group.is_empty() {
            page.batches.push(self.format(&group));
        }
        page
    }

    fn format(&self, names: &[&str]) -> String {
        format!("{}{}", self.batch_prefix, names.join(", "))
    }
}
