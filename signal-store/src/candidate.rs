// Candidate signals
// Loosely-typed records handed over by the generator, checked for structural completeness

use crate::activity::parse_entry_time;
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, FixedOffset};
use common::{signal_id, Direction, Signal};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// A signal as produced by the analysis step, before the store accepts it.
///
/// `id` and `generated_at` are optional; the store assigns them on save.
/// Unknown keys are carried through into the stored signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SignalDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub entry_time: Option<String>,
    #[serde(default, alias = "duration")]
    pub duration_minutes: Option<u32>,
    #[serde(default, with = "common::timestamp::option")]
    pub generated_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SignalDraft {
    pub fn new(
        asset: impl Into<String>,
        direction: Direction,
        confidence: f64,
        entry_time: impl Into<String>,
    ) -> Self {
        Self {
            asset: Some(asset.into()),
            direction: Some(direction.to_string()),
            confidence: Some(confidence),
            entry_time: Some(entry_time.into()),
            ..Self::default()
        }
    }

    /// Parse a raw JSON record, e.g. an analysis response
    pub fn from_value(value: Value) -> StoreResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| StoreError::malformed(format!("candidate is not a signal object: {}", e)))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn with_generated_at(mut self, generated_at: DateTime<FixedOffset>) -> Self {
        self.generated_at = Some(generated_at);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Check required fields and fill in `id` / `generated_at`.
    ///
    /// Confidence is only range-checked; the minimum threshold is the
    /// generator's business.
    pub fn into_signal(
        self,
        now: DateTime<FixedOffset>,
        max_duration_minutes: u32,
    ) -> StoreResult<Signal> {
        let asset = self
            .asset
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| StoreError::malformed("missing asset"))?;

        let direction: Direction = self
            .direction
            .as_deref()
            .ok_or_else(|| StoreError::malformed(format!("{}: missing direction", asset)))?
            .parse()
            .map_err(|e| StoreError::malformed(format!("{}: {}", asset, e)))?;

        let confidence = self
            .confidence
            .ok_or_else(|| StoreError::malformed(format!("{}: missing confidence", asset)))?;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(StoreError::malformed(format!(
                "{}: confidence {} outside [0, 1]",
                asset, confidence
            )));
        }

        let entry_time = self
            .entry_time
            .map(|t| t.trim().to_string())
            .ok_or_else(|| StoreError::malformed(format!("{}: missing entry_time", asset)))?;
        if parse_entry_time(&entry_time).is_none() {
            return Err(StoreError::malformed(format!(
                "{}: entry_time '{}' is not HH:MM",
                asset, entry_time
            )));
        }

        let duration_minutes = match self.duration_minutes {
            Some(0) => {
                return Err(StoreError::malformed(format!("{}: zero duration", asset)));
            }
            Some(minutes) if minutes > max_duration_minutes => {
                warn!(
                    asset = %asset,
                    "Duration {} exceeds maximum {}, clamping",
                    minutes, max_duration_minutes
                );
                Some(max_duration_minutes)
            }
            other => other,
        };

        let generated_at = self.generated_at.unwrap_or(now);
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| signal_id(&asset, &generated_at));

        Ok(Signal {
            id,
            asset,
            direction,
            confidence,
            entry_time,
            duration_minutes,
            generated_at,
            reason: self.reason.unwrap_or_default(),
            extra: self.extra,
        })
    }
}

impl From<Signal> for SignalDraft {
    fn from(signal: Signal) -> Self {
        Self {
            id: Some(signal.id),
            asset: Some(signal.asset),
            direction: Some(signal.direction.to_string()),
            confidence: Some(signal.confidence),
            entry_time: Some(signal.entry_time),
            duration_minutes: signal.duration_minutes,
            generated_at: Some(signal.generated_at),
            reason: Some(signal.reason),
            extra: signal.extra,
        }
    }
}
