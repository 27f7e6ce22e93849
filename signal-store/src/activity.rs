// Activity evaluation
// Decides whether a signal's entry window covers a given instant

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Timelike};
use common::Signal;
use serde::{Deserialize, Serialize};

/// Duration assumed when neither the signal nor the config provides one
pub const DEFAULT_DURATION_MINUTES: u32 = 2;

/// Closed interval `[entry, end]` during which a signal is current
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub entry: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl ActiveWindow {
    pub fn contains(&self, now: &DateTime<FixedOffset>) -> bool {
        self.entry <= *now && *now <= self.end
    }
}

/// Where a signal stands relative to its window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalPhase {
    /// Entry time not reached yet
    Pending,
    Active,
    Expired,
    /// Entry time missing or unparsable
    Invalid,
}

/// Pure activity evaluator. Holds only the fallback duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityEvaluator {
    default_duration_minutes: u32,
}

impl Default for ActivityEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_DURATION_MINUTES)
    }
}

impl ActivityEvaluator {
    pub fn new(default_duration_minutes: u32) -> Self {
        Self {
            default_duration_minutes,
        }
    }

    /// Compute the signal's window.
    ///
    /// The entry time-of-day is placed on the date of `generated_at`, in its
    /// offset. If that lands before the generation minute, the entry belongs
    /// to the next day (a signal produced at 23:58 for "00:05").
    pub fn window(&self, signal: &Signal) -> Option<ActiveWindow> {
        let time = parse_entry_time(&signal.entry_time)?;
        let generated_at = signal.generated_at;

        let mut entry = generated_at
            .date_naive()
            .and_time(time)
            .and_local_timezone(*generated_at.offset())
            .single()?;

        // Entry times carry minute precision, so compare against the generation minute
        let generated_minute = generated_at
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(generated_at);
        if entry < generated_minute {
            entry = entry + Duration::days(1);
        }

        let minutes = signal
            .duration_minutes
            .unwrap_or(self.default_duration_minutes);
        let end = entry + Duration::minutes(i64::from(minutes));

        Some(ActiveWindow { entry, end })
    }

    /// Active iff `entry <= now <= end`. Fails closed on a bad entry time.
    pub fn is_active(&self, signal: &Signal, now: &DateTime<FixedOffset>) -> bool {
        self.window(signal)
            .map(|window| window.contains(now))
            .unwrap_or(false)
    }

    pub fn phase(&self, signal: &Signal, now: &DateTime<FixedOffset>) -> SignalPhase {
        match self.window(signal) {
            None => SignalPhase::Invalid,
            Some(window) if *now < window.entry => SignalPhase::Pending,
            Some(window) if *now <= window.end => SignalPhase::Active,
            Some(_) => SignalPhase::Expired,
        }
    }

    /// Time left until the window closes, if the signal is active
    pub fn remaining(&self, signal: &Signal, now: &DateTime<FixedOffset>) -> Option<Duration> {
        self.window(signal)
            .filter(|window| window.contains(now))
            .map(|window| window.end - *now)
    }

    pub fn count_active<'a, I>(&self, signals: I, now: &DateTime<FixedOffset>) -> usize
    where
        I: IntoIterator<Item = &'a Signal>,
    {
        signals
            .into_iter()
            .filter(|signal| self.is_active(signal, now))
            .count()
    }
}

/// Parse "HH:MM" (seconds tolerated)
pub fn parse_entry_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}
