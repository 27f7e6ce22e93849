//! Signal Lifecycle & Feedback-Learning Store
//!
//! Keeps a small, bounded collection of currently-actionable trading signals,
//! an append-only history of everything that was ever saved, a ledger of user
//! feedback and the lessons derived from it. Each collection is persisted as
//! one JSON document and replaced atomically on every write.

mod activity;
mod candidate;
mod clock;
mod config;
mod error;
mod feedback;
mod learning;
mod lifecycle;
mod storage;

pub use activity::{parse_entry_time, ActiveWindow, ActivityEvaluator, SignalPhase, DEFAULT_DURATION_MINUTES};
pub use candidate::SignalDraft;
pub use clock::{Clock, ManualClock, ZonedClock};
pub use config::{create_config_template, load_config, save_config, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use feedback::FeedbackLedger;
pub use learning::{AssetRecord, LearningLoop, LearningSummary};
pub use lifecycle::{CleanupReport, SaveOutcome, SaveReport, SignalCollection, SignalLifecycle, StoreStats};
pub use storage::{Collection, InMemoryBackend, JsonFileBackend, RecordStore, StorageBackend};

pub use common::{Direction, FeedbackEntry, HistoryEntry, Lesson, Signal};

use std::sync::Arc;
use tracing::info;

/// Main entry point: the lifecycle manager, feedback ledger and learning
/// loop wired to one record store and clock
pub struct SignalStore {
    lifecycle: SignalLifecycle,
    feedback: FeedbackLedger,
    learning: LearningLoop,
    config: StoreConfig,
}

impl SignalStore {
    /// Open a file-backed store in `config.data_dir`, using the configured timezone
    pub async fn open(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let backend = JsonFileBackend::open(config.data_dir.clone()).await?;
        let clock = ZonedClock::new(config.tz()?);
        info!(
            "Signal store opened at {} ({})",
            backend.dir().display(),
            config.timezone
        );
        Self::with_backend(config, Arc::new(backend), Arc::new(clock))
    }

    /// Build a store on any backend and clock
    pub fn with_backend(
        config: StoreConfig,
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        config.validate()?;
        let store = Arc::new(RecordStore::new(backend));

        let learning = LearningLoop::new(store.clone(), clock.clone(), config.max_lessons);
        let feedback = FeedbackLedger::new(
            store.clone(),
            clock.clone(),
            learning.clone(),
            config.feedback_enabled,
        );
        let lifecycle = SignalLifecycle::new(store, clock, config.clone());

        Ok(Self {
            lifecycle,
            feedback,
            learning,
            config,
        })
    }

    pub fn lifecycle(&self) -> &SignalLifecycle {
        &self.lifecycle
    }

    pub fn feedback(&self) -> &FeedbackLedger {
        &self.feedback
    }

    pub fn learning(&self) -> &LearningLoop {
        &self.learning
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, draft};

    #[tokio::test]
    async fn test_open_file_store_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            data_dir: dir.path().join("data"),
            ..StoreConfig::default()
        };
        let clock = Arc::new(ManualClock::new(at("2024-01-01T12:00:00+02:00")));
        let backend = JsonFileBackend::open(config.data_dir.clone()).await.unwrap();
        let store = SignalStore::with_backend(config, Arc::new(backend), clock).unwrap();

        let outcome = store
            .lifecycle()
            .save(vec![draft("EURUSD", "12:00"), draft("GBPUSD", "12:01")])
            .await
            .unwrap();
        assert!(outcome.is_saved());
        assert_eq!(store.lifecycle().get_active().await.len(), 1);

        assert!(store
            .feedback()
            .record("EURUSD_20240101120000", true, Some(""))
            .await
            .unwrap());
        let lessons = store.learning().lessons(None).await;
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].asset, "EURUSD");
        assert!(store.learning().run().await.unwrap().is_empty());

        for file in ["signals.json", "history.json", "feedback.json", "lessons.json"] {
            assert!(dir.path().join("data").join(file).exists(), "{} missing", file);
        }
    }

    #[tokio::test]
    async fn test_open_validates_config() {
        let config = StoreConfig {
            timezone: "Nowhere/Special".to_string(),
            ..StoreConfig::default()
        };
        assert!(matches!(
            SignalStore::open(config).await,
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_feedback_from_config() {
        let config = StoreConfig {
            feedback_enabled: false,
            ..StoreConfig::default()
        };
        let clock = Arc::new(ManualClock::new(at("2024-01-01T12:00:00+02:00")));
        let store =
            SignalStore::with_backend(config, Arc::new(InMemoryBackend::new()), clock).unwrap();

        assert!(!store.feedback().is_enabled());
        assert!(!store.feedback().record("EURUSD_1", true, None).await.unwrap());
    }
}
