// Learning Loop
// Turns unlearned feedback into lessons, exactly once per feedback entry

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::storage::{truncate_oldest, Collection, RecordStore};
use chrono::{DateTime, FixedOffset};
use common::{FeedbackEntry, Lesson};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Wins and losses recorded for one asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssetRecord {
    pub wins: usize,
    pub losses: usize,
}

impl AssetRecord {
    pub fn total(&self) -> usize {
        self.wins + self.losses
    }

    /// Share of successful outcomes, 0.0 when there are none
    pub fn win_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.wins as f64 / self.total() as f64
        }
    }
}

/// Aggregate of all lessons, keyed by asset
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearningSummary {
    pub per_asset: BTreeMap<String, AssetRecord>,
    pub total_lessons: usize,
    pub last_learned_at: Option<DateTime<FixedOffset>>,
}

impl LearningSummary {
    pub fn asset(&self, asset: &str) -> AssetRecord {
        self.per_asset.get(asset).copied().unwrap_or_default()
    }
}

/// Idempotent feedback-to-lesson conversion.
///
/// Holds the feedback lock for the whole pass, so concurrent callers can
/// never turn the same entry into two lessons.
#[derive(Clone)]
pub struct LearningLoop {
    store: Arc<RecordStore>,
    clock: Arc<dyn Clock>,
    max_lessons: usize,
}

impl LearningLoop {
    pub fn new(store: Arc<RecordStore>, clock: Arc<dyn Clock>, max_lessons: usize) -> Self {
        Self {
            store,
            clock,
            max_lessons,
        }
    }

    /// Convert every unlearned feedback entry into a lesson.
    ///
    /// With nothing to learn, returns an empty list without writing. If the
    /// lesson append fails the ledger is restored, so the entries are retried
    /// on the next pass.
    pub async fn run(&self) -> StoreResult<Vec<Lesson>> {
        let _feedback_guard = self.store.lock(Collection::Feedback).await;

        let original = self.store.try_read_array(Collection::Feedback).await?;
        let learned_at = self.clock.now();

        let mut updated = original.clone();
        let mut lessons = Vec::new();
        for (index, value) in updated.iter_mut().enumerate() {
            let entry: FeedbackEntry = match serde_json::from_value(value.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(index, "Skipping malformed feedback entry: {}", e);
                    continue;
                }
            };
            if entry.learned {
                continue;
            }

            lessons.push(Lesson::from_feedback(&entry, learned_at));
            if let Some(object) = value.as_object_mut() {
                object.insert("learned".to_string(), Value::Bool(true));
            }
        }

        if lessons.is_empty() {
            debug!("No unlearned feedback");
            return Ok(lessons);
        }

        self.store.write(Collection::Feedback, &updated).await?;

        if let Err(e) = self.append_lessons(&lessons).await {
            error!("Failed to store {} lessons, restoring feedback ledger: {}", lessons.len(), e);
            if let Err(restore) = self.store.write(Collection::Feedback, &original).await {
                error!("Failed to restore feedback ledger: {}", restore);
            }
            return Err(e);
        }

        info!("Learned {} lessons from feedback", lessons.len());
        Ok(lessons)
    }

    /// Stored lessons, optionally for one asset only
    pub async fn lessons(&self, asset: Option<&str>) -> Vec<Lesson> {
        let lessons: Vec<Lesson> = self.store.read_records(Collection::Lessons).await;
        match asset {
            Some(asset) => lessons.into_iter().filter(|l| l.asset == asset).collect(),
            None => lessons,
        }
    }

    /// Per-asset outcome counts over all stored lessons
    pub async fn summary(&self) -> LearningSummary {
        let lessons = self.lessons(None).await;

        let mut summary = LearningSummary {
            total_lessons: lessons.len(),
            ..LearningSummary::default()
        };
        for lesson in &lessons {
            let record = summary.per_asset.entry(lesson.asset.clone()).or_default();
            if lesson.success {
                record.wins += 1;
            } else {
                record.losses += 1;
            }
            summary.last_learned_at = match summary.last_learned_at {
                Some(latest) if latest >= lesson.learned_at => Some(latest),
                _ => Some(lesson.learned_at),
            };
        }
        summary
    }

    async fn append_lessons(&self, lessons: &[Lesson]) -> StoreResult<()> {
        let _lessons_guard = self.store.lock(Collection::Lessons).await;

        let mut stored = self.store.try_read_array(Collection::Lessons).await?;
        for lesson in lessons {
            let value = serde_json::to_value(lesson).map_err(|source| StoreError::Corrupt {
                collection: Collection::Lessons,
                source,
            })?;
            stored.push(value);
        }

        let dropped = truncate_oldest(&mut stored, self.max_lessons);
        if dropped > 0 {
            debug!("Dropped {} oldest lessons", dropped);
        }
        self.store.write(Collection::Lessons, &stored).await
    }
}
