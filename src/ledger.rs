//! Idempotency ledger: completion markers and resume tokens per event.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::model::ResumeToken;
use crate::store::{Key, Store};

pub const COMPLETION_KIND: &str = "Completion";
pub const TOKEN_KIND: &str = "ResumeToken";

const MARKER_VALUE: &str = "{}";

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn is_completed(&self, event_id: &str) -> Result<bool> {
        let found = self
            .store
            .get(&Key::new(COMPLETION_KIND, event_id))
            .await
            .context("failed to read completion marker")?;
        Ok(found.is_some())
    }

    /// Unconditionally record the event as handled.
    #[instrument(skip(self))]
    pub async fn mark_completed(&self, event_id: &str) -> Result<()> {
        self.store
            .put(&Key::new(COMPLETION_KIND, event_id), MARKER_VALUE)
            .await
            .context("failed to write completion marker")
    }

    /// Write the completion marker only if none exists. `false` means some
    /// other invocation already owns the event.
    #[instrument(skip(self))]
    pub async fn claim(&self, event_id: &str) -> Result<bool> {
        let won = self
            .store
            .put_if_absent(&Key::new(COMPLETION_KIND, event_id), MARKER_VALUE)
            .await
            .context("failed to claim event")?;
        if !won {
            debug!(event_id, "completion marker already present");
        }
        Ok(won)
    }

    #[instrument(skip(self))]
    pub async fn get_token(&self, event_id: &str) -> Result<Option<ResumeToken>> {
        let raw = self
            .store
            .get(&Key::new(TOKEN_KIND, event_id))
            .await
            .context("failed to read resume token")?;
        raw.map(|v| decode_token(event_id, &v)).transpose()
    }

    #[instrument(skip(self, token), fields(cursor = %token.last_processed_subscriber))]
    pub async fn put_token(&self, event_id: &str, token: &ResumeToken) -> Result<()> {
        let value = serde_json::to_string(token).context("failed to encode resume token")?;
        self.store
            .put(&Key::new(TOKEN_KIND, event_id), &value)
            .await
            .context("failed to write resume token")
    }

    #[instrument(skip(self))]
    pub async fn delete_token(&self, event_id: &str) -> Result<()> {
        self.store
            .delete(&Key::new(TOKEN_KIND, event_id))
            .await
            .context("failed to delete resume token")
    }

    /// Every event with a resume token, ordered by event id. Tokens that no
    /// longer decode are skipped and logged.
    #[instrument(skip(self))]
    pub async fn list_pending_tokens(&self) -> Result<Vec<(String, ResumeToken)>> {
        let rows = self
            .store
            .list(TOKEN_KIND)
            .await
            .context("failed to list resume tokens")?;
        let mut pending = Vec::with_capacity(rows.len());
        for (event_id, raw) in rows {
            match decode_token(&event_id, &raw) {
                Ok(token) => pending.push((event_id, token)),
                Err(err) => warn!(?err, event_id, "skipping undecodable resume token"),
            }
        }
        Ok(pending)
    }

    /// Event ids with a completion marker.
    pub async fn list_completed(&self) -> Result<Vec<String>> {
        let rows = self
            .store
            .list(COMPLETION_KIND)
            .await
            .context("failed to list completion markers")?;
        Ok(rows.into_iter().map(|(id, _)| id).collect())
    }

    /// Drop every record for an event so the next scan treats it as new.
    pub async fn forget(&self, event_id: &str) -> Result<()> {
        self.delete_token(event_id).await?;
        self.store
            .delete(&Key::new(COMPLETION_KIND, event_id))
            .await
            .context("failed to delete completion marker")
    }
}

fn decode_token(event_id: &str, raw: &str) -> Result<ResumeToken> {
    serde_json::from_str(raw).with_context(|| format!("corrupt resume token for {}", event_id))
}
