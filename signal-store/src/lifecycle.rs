// Signal Lifecycle Manager
// Owns the current signal collection: save, retrieval, eviction, history and cleanup

use crate::activity::{ActivityEvaluator, SignalPhase};
use crate::candidate::SignalDraft;
use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::feedback::load_answered_ids;
use crate::storage::{decode_records, truncate_oldest, Collection, RecordStore};
use chrono::{DateTime, Duration, FixedOffset};
use common::{timestamp, HistoryEntry, Signal};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The current signal collection as seen by callers.
///
/// `total_count` and `active_count` are always recomputed on read.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SignalCollection {
    pub last_update: Option<DateTime<FixedOffset>>,
    pub signals: Vec<Signal>,
    pub timezone: String,
    pub total_count: usize,
    pub active_count: usize,
    pub capacity: usize,
}

/// On-disk shape of `signals.json` when reading.
/// Signals stay raw so one bad record does not hide the others.
#[derive(Debug, Default, Deserialize)]
struct StoredCollection {
    #[serde(default, with = "timestamp::option")]
    last_update: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    signals: Vec<Value>,
}

/// On-disk shape of `signals.json` when writing
#[derive(Debug, Serialize)]
struct CollectionFile<'a> {
    #[serde(with = "timestamp::option")]
    last_update: Option<DateTime<FixedOffset>>,
    signals: &'a [Signal],
    timezone: &'a str,
    total_signals: usize,
    active_signals: usize,
    capacity: usize,
}

/// Result of a save call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Empty batch, or no candidate passed validation. Nothing was written.
    NothingToSave,
    Saved(SaveReport),
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved(_))
    }

    pub fn report(&self) -> Option<&SaveReport> {
        match self {
            SaveOutcome::Saved(report) => Some(report),
            SaveOutcome::NothingToSave => None,
        }
    }
}

/// What a successful save did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Ids of the candidates that made it into the collection, in input order
    pub saved_ids: Vec<String>,
    /// Pre-existing signals carried over
    pub retained: usize,
    pub dropped_answered: usize,
    pub dropped_expired: usize,
    /// Still-active signals evicted because the collection exceeds a lowered capacity
    pub dropped_capacity: usize,
    pub rejected_malformed: usize,
    pub rejected_answered: usize,
    pub rejected_duplicate: usize,
    /// Candidates that did not fit (capacity is a silent truncation, not an error)
    pub rejected_capacity: usize,
    pub active_count: usize,
    /// False when the history append failed after the collection was written
    pub history_appended: bool,
    pub cleanup_ran: bool,
}

/// Result of a cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_answered: usize,
    pub removed_expired: usize,
    /// Expired signals kept back to honour the floor
    pub kept_by_floor: usize,
    pub remaining: usize,
}

/// Point-in-time counts for the current collection
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoreStats {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub expired: usize,
    pub invalid: usize,
    pub capacity: usize,
    pub last_update: Option<DateTime<FixedOffset>>,
}

/// Lifecycle manager for the current signal collection
pub struct SignalLifecycle {
    store: Arc<RecordStore>,
    clock: Arc<dyn Clock>,
    evaluator: ActivityEvaluator,
    config: StoreConfig,
    saves: AtomicU64,
}

impl SignalLifecycle {
    pub fn new(store: Arc<RecordStore>, clock: Arc<dyn Clock>, config: StoreConfig) -> Self {
        Self {
            store,
            clock,
            evaluator: ActivityEvaluator::new(config.default_duration_minutes),
            config,
            saves: AtomicU64::new(0),
        }
    }

    pub fn evaluator(&self) -> &ActivityEvaluator {
        &self.evaluator
    }

    /// Merge candidates into the current collection.
    ///
    /// Still-active, unanswered signals are retained first; candidates are
    /// appended in input order until capacity is reached. Only the newly
    /// saved candidates are copied into history.
    pub async fn save(&self, candidates: Vec<SignalDraft>) -> StoreResult<SaveOutcome> {
        if candidates.is_empty() {
            info!("No signals to save");
            return Ok(SaveOutcome::NothingToSave);
        }

        let now = self.clock.now();
        let mut report = SaveReport::default();

        let mut valid = Vec::with_capacity(candidates.len());
        for draft in candidates {
            match draft.into_signal(now, self.config.max_duration_minutes) {
                Ok(signal) => valid.push(signal),
                Err(e) => {
                    warn!("Rejecting candidate: {}", e);
                    report.rejected_malformed += 1;
                }
            }
        }
        if valid.is_empty() {
            warn!(
                "None of the {} candidates were valid, nothing to save",
                report.rejected_malformed
            );
            return Ok(SaveOutcome::NothingToSave);
        }

        let saved = {
            let _signals_guard = self.store.lock(Collection::Signals).await;

            let (_, existing) = self.read_current().await;
            let answered = load_answered_ids(&self.store).await;

            let mut keep = Vec::with_capacity(self.config.capacity);
            for signal in existing {
                if answered.contains(&signal.id) {
                    debug!(signal_id = %signal.id, "Dropping answered signal");
                    report.dropped_answered += 1;
                } else if !self.evaluator.is_active(&signal, &now) {
                    debug!(signal_id = %signal.id, "Dropping inactive signal");
                    report.dropped_expired += 1;
                } else {
                    keep.push(signal);
                }
            }

            // Capacity may have been lowered since the collection was written
            let overflow = truncate_oldest(&mut keep, self.config.capacity);
            if overflow > 0 {
                warn!("Evicted {} retained signals above capacity {}", overflow, self.config.capacity);
                report.dropped_capacity = overflow;
            }
            report.retained = keep.len();

            let mut ids: HashSet<String> = keep.iter().map(|s| s.id.clone()).collect();
            let mut saved = Vec::new();
            for signal in valid {
                if answered.contains(&signal.id) {
                    warn!(signal_id = %signal.id, "Candidate already has feedback, skipping");
                    report.rejected_answered += 1;
                } else if ids.contains(&signal.id) {
                    warn!(signal_id = %signal.id, "Duplicate signal id, skipping");
                    report.rejected_duplicate += 1;
                } else if keep.len() >= self.config.capacity {
                    debug!(signal_id = %signal.id, "Capacity {} reached, skipping", self.config.capacity);
                    report.rejected_capacity += 1;
                } else {
                    ids.insert(signal.id.clone());
                    keep.push(signal.clone());
                    saved.push(signal);
                }
            }

            report.active_count = self.evaluator.count_active(&keep, &now);
            self.write_current(Some(now), &keep, report.active_count).await?;

            report.saved_ids = saved.iter().map(|s| s.id.clone()).collect();
            report.history_appended = match self.append_history(&saved, now).await {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        "Current signals saved but history append failed, history is missing {} signals: {}",
                        saved.len(),
                        e
                    );
                    false
                }
            };

            saved
        };

        info!(
            "Saved {} signals ({} retained, {} active, {} over capacity)",
            saved.len(),
            report.retained,
            report.active_count,
            report.rejected_capacity
        );

        let count = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        let every = u64::from(self.config.cleanup_every_saves);
        if every > 0 && count % every == 0 {
            match self.cleanup().await {
                Ok(cleanup) => {
                    debug!("Scheduled cleanup after save #{}: {:?}", count, cleanup);
                    report.cleanup_ran = true;
                }
                Err(e) => warn!("Scheduled cleanup failed: {}", e),
            }
        }

        Ok(SaveOutcome::Saved(report))
    }

    /// Current collection with freshly computed counts. Never fails.
    pub async fn load(&self) -> SignalCollection {
        let now = self.clock.now();
        let (last_update, signals) = self.read_current().await;
        let active_count = self.evaluator.count_active(&signals, &now);

        SignalCollection {
            last_update,
            total_count: signals.len(),
            active_count,
            signals,
            timezone: self.config.timezone.clone(),
            capacity: self.config.capacity,
        }
    }

    /// Signals whose window covers the current instant
    pub async fn get_active(&self) -> Vec<Signal> {
        let now = self.clock.now();
        self.load()
            .await
            .signals
            .into_iter()
            .filter(|signal| self.evaluator.is_active(signal, &now))
            .collect()
    }

    /// Compaction pass.
    ///
    /// Removes answered signals and signals whose window ended more than the
    /// grace period ago, but keeps the most recent expired ones if the
    /// collection would otherwise drop below `cleanup_floor`.
    pub async fn cleanup(&self) -> StoreResult<CleanupReport> {
        let _signals_guard = self.store.lock(Collection::Signals).await;

        let now = self.clock.now();
        let grace = Duration::minutes(i64::from(self.config.active_signal_grace_minutes));
        let (last_update, signals) = self.read_current().await;
        let answered = load_answered_ids(&self.store).await;

        let mut report = CleanupReport::default();
        let mut keep = vec![false; signals.len()];
        let mut expired = Vec::new();

        for (index, signal) in signals.iter().enumerate() {
            if answered.contains(&signal.id) {
                report.removed_answered += 1;
                continue;
            }
            let past_grace = match self.evaluator.window(signal) {
                Some(window) => window.end + grace < now,
                None => true,
            };
            if past_grace {
                expired.push(index);
            } else {
                keep[index] = true;
            }
        }

        let mut kept = keep.iter().filter(|k| **k).count();
        for &index in expired.iter().rev() {
            if kept >= self.config.cleanup_floor {
                break;
            }
            keep[index] = true;
            kept += 1;
            report.kept_by_floor += 1;
        }
        report.removed_expired = expired.len() - report.kept_by_floor;
        report.remaining = kept;

        if report.removed_answered + report.removed_expired == 0 {
            debug!("Cleanup found nothing to remove");
            return Ok(report);
        }

        let remaining: Vec<Signal> = signals
            .into_iter()
            .zip(keep)
            .filter_map(|(signal, keep)| keep.then_some(signal))
            .collect();
        let active_count = self.evaluator.count_active(&remaining, &now);
        self.write_current(last_update, &remaining, active_count).await?;

        info!(
            "Cleanup removed {} answered and {} expired signals, {} remain",
            report.removed_answered, report.removed_expired, report.remaining
        );
        Ok(report)
    }

    /// Counts per phase for the current collection
    pub async fn stats(&self) -> StoreStats {
        let now = self.clock.now();
        let collection = self.load().await;

        let mut stats = StoreStats {
            total: collection.total_count,
            pending: 0,
            active: 0,
            expired: 0,
            invalid: 0,
            capacity: collection.capacity,
            last_update: collection.last_update,
        };
        for signal in &collection.signals {
            match self.evaluator.phase(signal, &now) {
                SignalPhase::Pending => stats.pending += 1,
                SignalPhase::Active => stats.active += 1,
                SignalPhase::Expired => stats.expired += 1,
                SignalPhase::Invalid => stats.invalid += 1,
            }
        }
        stats
    }

    /// Most recent history entries, oldest first
    pub async fn history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self.store.read_records(Collection::History).await;
        if let Some(limit) = limit {
            truncate_oldest(&mut entries, limit);
        }
        entries
    }

    async fn read_current(&self) -> (Option<DateTime<FixedOffset>>, Vec<Signal>) {
        let stored: StoredCollection = self.store.read(Collection::Signals).await;
        (stored.last_update, decode_records(Collection::Signals, stored.signals))
    }

    async fn write_current(
        &self,
        last_update: Option<DateTime<FixedOffset>>,
        signals: &[Signal],
        active_count: usize,
    ) -> StoreResult<()> {
        let file = CollectionFile {
            last_update,
            signals,
            timezone: &self.config.timezone,
            total_signals: signals.len(),
            active_signals: active_count,
            capacity: self.config.capacity,
        };
        self.store.write(Collection::Signals, &file).await
    }

    async fn append_history(&self, saved: &[Signal], now: DateTime<FixedOffset>) -> StoreResult<()> {
        if saved.is_empty() {
            return Ok(());
        }

        let _history_guard = self.store.lock(Collection::History).await;
        // A corrupt history is reported rather than overwritten
        let mut history = self.store.try_read_array(Collection::History).await?;
        for signal in saved {
            let entry = HistoryEntry::new(signal.clone(), now);
            let value = serde_json::to_value(&entry).map_err(|source| StoreError::Corrupt {
                collection: Collection::History,
                source,
            })?;
            history.push(value);
        }

        let dropped = truncate_oldest(&mut history, self.config.max_history_items);
        if dropped > 0 {
            debug!("Trimmed {} oldest history entries", dropped);
        }
        self.store.write(Collection::History, &history).await?;
        debug!("Added {} signals to history", saved.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::feedback::FeedbackLedger;
    use crate::learning::LearningLoop;
    use crate::storage::InMemoryBackend;
    use crate::testing::{at, draft};

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        store: Arc<RecordStore>,
        clock: Arc<ManualClock>,
        lifecycle: SignalLifecycle,
    }

    fn fixture(config: StoreConfig) -> Fixture {
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(RecordStore::new(backend.clone()));
        let clock = Arc::new(ManualClock::new(at("2024-01-01T12:00:00+02:00")));
        let lifecycle = SignalLifecycle::new(store.clone(), clock.clone(), config);
        Fixture {
            backend,
            store,
            clock,
            lifecycle,
        }
    }

    fn config(capacity: usize) -> StoreConfig {
        StoreConfig {
            capacity,
            cleanup_every_saves: 0,
            ..StoreConfig::default()
        }
    }

    fn ledger(f: &Fixture) -> FeedbackLedger {
        let learning = LearningLoop::new(f.store.clone(), f.clock.clone(), 100);
        FeedbackLedger::new(f.store.clone(), f.clock.clone(), learning, true)
    }

    #[tokio::test]
    async fn test_save_empty_is_noop() {
        let f = fixture(config(3));
        f.lifecycle.save(vec![draft("EURUSD", "12:01")]).await.unwrap();
        let before_signals = f.backend.raw(Collection::Signals).await;
        let before_history = f.backend.raw(Collection::History).await;

        f.clock.advance(Duration::seconds(30));
        let outcome = f.lifecycle.save(vec![]).await.unwrap();

        assert_eq!(outcome, SaveOutcome::NothingToSave);
        assert_eq!(f.backend.raw(Collection::Signals).await, before_signals);
        assert_eq!(f.backend.raw(Collection::History).await, before_history);
    }

    #[tokio::test]
    async fn test_save_all_invalid_is_noop() {
        let f = fixture(config(3));
        let outcome = f
            .lifecycle
            .save(vec![draft("EURUSD", "later"), SignalDraft::default()])
            .await
            .unwrap();

        assert_eq!(outcome, SaveOutcome::NothingToSave);
        assert!(f.backend.raw(Collection::Signals).await.is_none());
    }

    #[tokio::test]
    async fn test_capacity_keeps_first_candidates() {
        let f = fixture(config(3));
        let candidates = vec![
            draft("EURUSD", "12:01"),
            draft("GBPUSD", "12:01"),
            draft("USDJPY", "12:02"),
            draft("AUDCAD", "12:02"),
            draft("EURJPY", "12:03"),
        ];

        let outcome = f.lifecycle.save(candidates).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.rejected_capacity, 2);
        assert_eq!(
            report.saved_ids,
            vec!["EURUSD_20240101120000", "GBPUSD_20240101120000", "USDJPY_20240101120000"]
        );

        let collection = f.lifecycle.load().await;
        assert_eq!(collection.signals.len(), 3);
        let assets: Vec<_> = collection.signals.iter().map(|s| s.asset.as_str()).collect();
        assert_eq!(assets, vec!["EURUSD", "GBPUSD", "USDJPY"]);
    }

    #[tokio::test]
    async fn test_retained_signals_take_priority() {
        let f = fixture(config(2));
        f.lifecycle
            .save(vec![draft("EURUSD", "12:01"), draft("GBPUSD", "12:01")])
            .await
            .unwrap();

        f.clock.set(at("2024-01-01T12:01:30+02:00"));
        let outcome = f.lifecycle.save(vec![draft("USDJPY", "12:03")]).await.unwrap();
        let report = outcome.report().unwrap();

        assert_eq!(report.retained, 2);
        assert_eq!(report.rejected_capacity, 1);
        assert!(report.saved_ids.is_empty());
        assert_eq!(f.lifecycle.history(None).await.len(), 2);
    }

    #[tokio::test]
    async fn test_lowered_capacity_evicts_oldest_retained() {
        let f = fixture(config(3));
        f.lifecycle
            .save(vec![
                draft("EURUSD", "12:00"),
                draft("GBPUSD", "12:00"),
                draft("USDJPY", "12:00"),
            ])
            .await
            .unwrap();

        let smaller = SignalLifecycle::new(f.store.clone(), f.clock.clone(), config(1));
        f.clock.set(at("2024-01-01T12:01:00+02:00"));
        let outcome = smaller.save(vec![draft("AUDCAD", "12:01")]).await.unwrap();
        let report = outcome.report().unwrap();

        assert_eq!(report.dropped_capacity, 2);
        assert_eq!(report.dropped_expired, 0);
        assert_eq!(report.retained, 1);
        assert_eq!(report.rejected_capacity, 1);
        let ids: Vec<_> = smaller.load().await.signals.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["USDJPY_20240101120000"]);
    }

    #[tokio::test]
    async fn test_expired_signals_are_replaced() {
        let f = fixture(config(2));
        f.lifecycle
            .save(vec![draft("EURUSD", "12:01"), draft("GBPUSD", "12:01")])
            .await
            .unwrap();

        // Both windows ended at 12:03
        f.clock.set(at("2024-01-01T12:10:00+02:00"));
        let outcome = f.lifecycle.save(vec![draft("USDJPY", "12:11")]).await.unwrap();
        let report = outcome.report().unwrap();

        assert_eq!(report.dropped_expired, 2);
        assert_eq!(report.saved_ids, vec!["USDJPY_20240101121000"]);
        let ids: Vec<_> = f.lifecycle.load().await.signals.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["USDJPY_20240101121000"]);
    }

    #[tokio::test]
    async fn test_answered_signal_excluded_on_next_save() {
        let f = fixture(config(3));
        f.lifecycle
            .save(vec![draft("EURUSD", "12:00"), draft("GBPUSD", "12:00")])
            .await
            .unwrap();

        assert!(ledger(&f).record("EURUSD_20240101120000", true, None).await.unwrap());

        f.clock.set(at("2024-01-01T12:00:30+02:00"));
        let outcome = f.lifecycle.save(vec![draft("USDJPY", "12:01")]).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.dropped_answered, 1);

        let collection = f.lifecycle.load().await;
        let ids: Vec<_> = collection.signals.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["GBPUSD_20240101120000", "USDJPY_20240101120030"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_feedback_during_save_is_honoured() {
        let f = fixture(config(3));
        f.lifecycle
            .save(vec![draft("EURUSD", "12:00"), draft("GBPUSD", "12:00")])
            .await
            .unwrap();

        let ledger = ledger(&f);
        let (saved, recorded) = tokio::join!(
            f.lifecycle.save(vec![draft("USDJPY", "12:00")]),
            ledger.record("EURUSD_20240101120000", false, None)
        );
        assert!(saved.unwrap().is_saved());
        assert!(recorded.unwrap());
        assert_eq!(ledger.history(None).await.len(), 1);

        f.clock.set(at("2024-01-01T12:00:30+02:00"));
        f.lifecycle.save(vec![draft("AUDCAD", "12:01")]).await.unwrap();

        let ids: Vec<_> = f.lifecycle.load().await.signals.into_iter().map(|s| s.id).collect();
        assert!(!ids.contains(&"EURUSD_20240101120000".to_string()));
        assert!(ids.contains(&"GBPUSD_20240101120000".to_string()));
        assert!(ids.contains(&"USDJPY_20240101120000".to_string()));
        assert_eq!(f.lifecycle.history(None).await.len(), 4);
    }

    #[tokio::test]
    async fn test_answered_candidate_is_rejected() {
        let f = fixture(config(3));
        ledger(&f).record("EURUSD_20240101120000", false, None).await.unwrap();

        let outcome = f.lifecycle.save(vec![draft("EURUSD", "12:01")]).await.unwrap();
        assert_eq!(outcome.report().unwrap().rejected_answered, 1);
        assert!(f.lifecycle.load().await.signals.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_candidate_ids() {
        let f = fixture(config(3));
        let outcome = f
            .lifecycle
            .save(vec![draft("EURUSD", "12:01"), draft("EURUSD", "12:02")])
            .await
            .unwrap();

        let report = outcome.report().unwrap();
        assert_eq!(report.rejected_duplicate, 1);
        assert_eq!(f.lifecycle.load().await.signals[0].entry_time, "12:01");
    }

    #[tokio::test]
    async fn test_history_is_fifo_bounded() {
        let f = fixture(StoreConfig {
            max_history_items: 4,
            ..config(10)
        });

        for minute in 0..3 {
            f.clock.set(at(&format!("2024-01-01T12:0{}:00+02:00", minute)));
            f.lifecycle
                .save(vec![draft("EURUSD", "12:09"), draft("GBPUSD", "12:09")])
                .await
                .unwrap();
        }

        let history = f.lifecycle.history(None).await;
        assert_eq!(history.len(), 4);
        let ids: Vec<_> = history.iter().map(|h| h.signal.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "EURUSD_20240101120100",
                "GBPUSD_20240101120100",
                "EURUSD_20240101120200",
                "GBPUSD_20240101120200",
            ]
        );
        assert_eq!(f.lifecycle.history(Some(1)).await[0].signal.id, "GBPUSD_20240101120200");
    }

    #[tokio::test]
    async fn test_history_only_gets_new_signals() {
        let f = fixture(config(5));
        f.lifecycle.save(vec![draft("EURUSD", "12:00")]).await.unwrap();
        f.clock.advance(Duration::minutes(1));
        f.lifecycle.save(vec![draft("GBPUSD", "12:01")]).await.unwrap();

        assert_eq!(f.lifecycle.load().await.signals.len(), 2);
        assert_eq!(f.lifecycle.history(None).await.len(), 2);
    }

    #[tokio::test]
    async fn test_round_trip_recomputes_counts() {
        let f = fixture(config(3));
        f.lifecycle
            .save(vec![draft("EURUSD", "12:00"), draft("GBPUSD", "12:30")])
            .await
            .unwrap();

        let raw = f.backend.raw(Collection::Signals).await.unwrap();
        let mut value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["active_signals"], 1);
        assert_eq!(value["timezone"], "Europe/Kyiv");
        value["total_signals"] = 42.into();
        value["active_signals"] = 42.into();
        f.backend.put_raw(Collection::Signals, value.to_string()).await;

        let first = f.lifecycle.load().await;
        assert_eq!(first.total_count, 2);
        assert_eq!(first.active_count, 1);

        f.clock.set(at("2024-01-01T12:30:00+02:00"));
        let later = f.lifecycle.load().await;
        assert_eq!(later.signals, first.signals);
        assert_eq!(later.active_count, 1);
        assert_eq!(f.lifecycle.get_active().await[0].asset, "GBPUSD");
    }

    #[tokio::test]
    async fn test_load_survives_corrupt_storage() {
        let f = fixture(config(3));
        f.backend.put_raw(Collection::Signals, "][").await;

        let collection = f.lifecycle.load().await;
        assert!(collection.signals.is_empty());
        assert_eq!(collection.total_count, 0);
        assert!(f.lifecycle.get_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_malformed_persisted_signals() {
        let f = fixture(config(3));
        f.lifecycle.save(vec![draft("EURUSD", "12:00")]).await.unwrap();

        let raw = f.backend.raw(Collection::Signals).await.unwrap();
        let mut value: Value = serde_json::from_str(&raw).unwrap();
        value["signals"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({"asset": "BROKEN"}));
        f.backend.put_raw(Collection::Signals, value.to_string()).await;

        let collection = f.lifecycle.load().await;
        assert_eq!(collection.total_count, 1);
        assert_eq!(collection.signals[0].asset, "EURUSD");
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_collection() {
        let f = fixture(config(3));
        f.lifecycle.save(vec![draft("EURUSD", "12:00")]).await.unwrap();
        let before = f.backend.raw(Collection::Signals).await;

        f.backend.fail_writes(Collection::Signals, true).await;
        let result = f.lifecycle.save(vec![draft("GBPUSD", "12:00")]).await;

        assert!(result.unwrap_err().is_storage());
        assert_eq!(f.backend.raw(Collection::Signals).await, before);
        assert_eq!(f.lifecycle.history(None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_history_failure_is_partial_success() {
        let f = fixture(config(3));
        f.backend.fail_writes(Collection::History, true).await;

        let outcome = f.lifecycle.save(vec![draft("EURUSD", "12:00")]).await.unwrap();

        assert!(!outcome.report().unwrap().history_appended);
        assert_eq!(f.lifecycle.load().await.signals.len(), 1);
        assert!(f.lifecycle.history(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_answered_and_stale() {
        let f = fixture(StoreConfig {
            cleanup_floor: 0,
            active_signal_grace_minutes: 5,
            ..config(5)
        });
        f.lifecycle
            .save(vec![
                draft("EURUSD", "12:00"),
                draft("GBPUSD", "12:00"),
                draft("USDJPY", "12:20"),
            ])
            .await
            .unwrap();
        ledger(&f).record("USDJPY_20240101120000", true, None).await.unwrap();

        // EURUSD/GBPUSD ended 12:02; still inside grace at 12:06
        f.clock.set(at("2024-01-01T12:06:00+02:00"));
        let report = f.lifecycle.cleanup().await.unwrap();
        assert_eq!(report.removed_answered, 1);
        assert_eq!(report.removed_expired, 0);
        assert_eq!(report.remaining, 2);

        f.clock.set(at("2024-01-01T12:08:00+02:00"));
        let report = f.lifecycle.cleanup().await.unwrap();
        assert_eq!(report.removed_expired, 2);
        assert!(f.lifecycle.load().await.signals.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_respects_floor() {
        let f = fixture(StoreConfig {
            cleanup_floor: 1,
            active_signal_grace_minutes: 0,
            ..config(5)
        });
        f.lifecycle
            .save(vec![draft("EURUSD", "12:00"), draft("GBPUSD", "12:01")])
            .await
            .unwrap();

        f.clock.set(at("2024-01-01T13:00:00+02:00"));
        let report = f.lifecycle.cleanup().await.unwrap();

        assert_eq!(report.removed_expired, 1);
        assert_eq!(report.kept_by_floor, 1);
        let ids: Vec<_> = f.lifecycle.load().await.signals.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["GBPUSD_20240101120000"]);
    }

    #[tokio::test]
    async fn test_scheduled_cleanup() {
        let f = fixture(StoreConfig {
            cleanup_every_saves: 2,
            ..config(5)
        });

        let first = f.lifecycle.save(vec![draft("EURUSD", "12:01")]).await.unwrap();
        assert!(!first.report().unwrap().cleanup_ran);
        let second = f.lifecycle.save(vec![draft("GBPUSD", "12:01")]).await.unwrap();
        assert!(second.report().unwrap().cleanup_ran);
    }

    #[tokio::test]
    async fn test_stats_by_phase() {
        let f = fixture(config(5));
        f.lifecycle
            .save(vec![draft("EURUSD", "12:00"), draft("GBPUSD", "12:30")])
            .await
            .unwrap();

        f.clock.set(at("2024-01-01T12:01:00+02:00"));
        let stats = f.lifecycle.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.last_update, Some(at("2024-01-01T12:00:00+02:00")));
    }
}
