// Feedback Ledger
// Records user outcome judgements keyed by signal id

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::learning::LearningLoop;
use crate::storage::{Collection, RecordStore};
use common::FeedbackEntry;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Append-only ledger of outcome feedback.
///
/// Several entries per signal id are allowed (corrections). Every successful
/// append runs the learning loop before returning.
pub struct FeedbackLedger {
    store: Arc<RecordStore>,
    clock: Arc<dyn Clock>,
    learning: LearningLoop,
    enabled: bool,
}

impl FeedbackLedger {
    pub fn new(
        store: Arc<RecordStore>,
        clock: Arc<dyn Clock>,
        learning: LearningLoop,
        enabled: bool,
    ) -> Self {
        Self {
            store,
            clock,
            learning,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record whether a signal worked out.
    ///
    /// Returns `Ok(false)` without touching storage when feedback is disabled.
    /// A failed learning pass is logged; the feedback itself stays recorded
    /// and is picked up by the next pass.
    pub async fn record(
        &self,
        signal_id: &str,
        success: bool,
        comment: Option<&str>,
    ) -> StoreResult<bool> {
        if !self.enabled {
            debug!(signal_id = %signal_id, "Feedback disabled, ignoring");
            return Ok(false);
        }

        let signal_id = signal_id.trim();
        if signal_id.is_empty() {
            return Err(StoreError::malformed("feedback without signal_id"));
        }

        let entry = FeedbackEntry {
            signal_id: signal_id.to_string(),
            success,
            comment: comment
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            recorded_at: self.clock.now(),
            learned: false,
        };

        {
            let _feedback_guard = self.store.lock(Collection::Feedback).await;
            let mut ledger = self.store.try_read_array(Collection::Feedback).await?;
            let value = serde_json::to_value(&entry).map_err(|source| StoreError::Corrupt {
                collection: Collection::Feedback,
                source,
            })?;
            ledger.push(value);
            self.store.write(Collection::Feedback, &ledger).await?;
        }

        info!(
            signal_id = %entry.signal_id,
            "Feedback recorded: {}",
            if success { "success" } else { "failure" }
        );

        match self.learning.run().await {
            Ok(lessons) => debug!("Learning pass produced {} lessons", lessons.len()),
            Err(e) => warn!("Learning pass after feedback failed: {}", e),
        }

        Ok(true)
    }

    /// Feedback entries, optionally only those whose signal id contains `asset_filter`
    pub async fn history(&self, asset_filter: Option<&str>) -> Vec<FeedbackEntry> {
        let entries: Vec<FeedbackEntry> = self.store.read_records(Collection::Feedback).await;
        match asset_filter.map(str::trim).filter(|f| !f.is_empty()) {
            Some(filter) => entries
                .into_iter()
                .filter(|entry| entry.signal_id.contains(filter))
                .collect(),
            None => entries,
        }
    }
}

/// Ids of every signal that has at least one feedback entry.
///
/// Only `signal_id` is needed, so entries that fail full decoding still count.
pub(crate) async fn load_answered_ids(store: &RecordStore) -> HashSet<String> {
    let raw: Vec<Value> = store.read(Collection::Feedback).await;
    raw.iter()
        .filter_map(|value| value.get("signal_id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}
