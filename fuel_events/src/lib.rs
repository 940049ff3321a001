//! Refuel and drain event detection over fuel-level telemetry batches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

pub mod condition;
pub mod confidence;
pub mod merge;
pub mod normalize;
pub mod segment;

pub use condition::{
    condition_samples, parse_timestamp, ConditionDiagnostics, ConditionedSample,
    ConditionedSeries, Smoothing, SmoothingMode, MAX_SAVGOL_WINDOW,
};
pub use confidence::{score_confidence, CONFIDENT_DURATION_MIN, CONFIDENT_MAGNITUDE_L};
pub use merge::{merge_adjacent, DEFAULT_MERGE_GAP_MIN};
pub use normalize::{normalize_points, CanonicalSample, DetectRequest, InputPoint};
pub use segment::{segment_events, segment_series, Segmentation};

#[derive(Error, Debug)]
pub enum FuelError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("failed to serialize parameters: {0}")]
    Serialization(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Refuel,
    Drain,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Refuel => "refuel",
            EventType::Drain => "drain",
        }
    }
}

/// A detected interval of sustained fuel increase or decrease.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FuelEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(with = "rfc3339_offset")]
    pub start_ts: DateTime<Utc>,
    #[serde(with = "rfc3339_offset")]
    pub end_ts: DateTime<Utc>,
    pub duration_min: f64,
    pub delta_liters: f64,
    pub confidence: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub refuels: usize,
    pub drains: usize,
    pub net_change_l: f64,
}

impl RunSummary {
    pub fn from_events(events: &[FuelEvent]) -> Self {
        Self {
            refuels: events
                .iter()
                .filter(|e| e.event_type == EventType::Refuel)
                .count(),
            drains: events
                .iter()
                .filter(|e| e.event_type == EventType::Drain)
                .count(),
            net_change_l: events.iter().map(|e| e.delta_liters).sum(),
        }
    }
}

/// Response body of a detection call.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DetectionReport {
    pub events: Vec<FuelEvent>,
    pub summary: RunSummary,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DetectDiagnostics {
    #[serde(flatten)]
    pub condition: ConditionDiagnostics,
    pub implausible_excluded: usize,
    pub candidate_events: usize,
    pub merged_events: usize,
    pub tank_capacity_l: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectionOutcome {
    pub report: DetectionReport,
    pub diagnostics: DetectDiagnostics,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectParams {
    pub refuel_rate_min: f64,
    pub drain_rate_min: f64,
    pub max_rate_plausible: f64,
    pub min_event_min: f64,
    pub tank_capacity_l: f64,
    pub savgol_window: usize,
    pub savgol_polyorder: usize,
    pub merge_gap_min: f64,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            refuel_rate_min: 2.5,
            drain_rate_min: 2.0,
            max_rate_plausible: 12.0,
            min_event_min: 3.0,
            tank_capacity_l: 300.0,
            savgol_window: 9,
            savgol_polyorder: 2,
            merge_gap_min: DEFAULT_MERGE_GAP_MIN,
        }
    }
}

impl DetectParams {
    pub fn validate(&self) -> Result<(), FuelError> {
        let positive = [
            ("refuel_rate_min", self.refuel_rate_min),
            ("drain_rate_min", self.drain_rate_min),
            ("max_rate_plausible", self.max_rate_plausible),
            ("tank_capacity_l", self.tank_capacity_l),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(FuelError::InvalidParameter(format!(
                    "{name} must be a positive finite number, got {value}"
                )));
            }
        }
        let non_negative = [
            ("min_event_min", self.min_event_min),
            ("merge_gap_min", self.merge_gap_min),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(FuelError::InvalidParameter(format!(
                    "{name} must be a non-negative finite number, got {value}"
                )));
            }
        }
        if self.savgol_window == 0 || self.savgol_window > MAX_SAVGOL_WINDOW {
            return Err(FuelError::InvalidParameter(format!(
                "savgol_window must be between 1 and {MAX_SAVGOL_WINDOW}, got {}",
                self.savgol_window
            )));
        }
        Ok(())
    }

    /// Tank capacity for one batch. A missing or zero override falls back to the default.
    pub fn resolve_capacity(&self, override_l: Option<f64>) -> f64 {
        override_l
            .filter(|cap| *cap != 0.0)
            .unwrap_or(self.tank_capacity_l)
    }

    pub fn params_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn params_hash_sha256(&self) -> Result<String, FuelError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| FuelError::Serialization(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

/// Run the full pipeline over one batch of input points.
pub fn detect_events(
    points: &[InputPoint],
    params: &DetectParams,
    tank_capacity_override: Option<f64>,
) -> Result<DetectionOutcome, FuelError> {
    params.validate()?;
    let tank_capacity_l = params.resolve_capacity(tank_capacity_override);

    let samples = normalize_points(points);
    let series = condition_samples(&samples, params.savgol_window, params.savgol_polyorder);
    let segmentation = segment_series(&series, params, tank_capacity_l);
    let candidate_events = segmentation.candidates.len();

    let events = merge_adjacent(segmentation.candidates, params.merge_gap_min);
    let summary = RunSummary::from_events(&events);
    debug!(
        candidates = candidate_events,
        merged = events.len(),
        refuels = summary.refuels,
        drains = summary.drains,
        "detection finished"
    );

    let diagnostics = DetectDiagnostics {
        condition: series.diagnostics().clone(),
        implausible_excluded: segmentation.implausible_excluded,
        candidate_events,
        merged_events: events.len(),
        tank_capacity_l,
    };

    Ok(DetectionOutcome {
        report: DetectionReport { events, summary },
        diagnostics,
    })
}

pub fn detect_request(
    request: &DetectRequest,
    params: &DetectParams,
) -> Result<DetectionOutcome, FuelError> {
    debug!(
        device_id = %request.device_id,
        points = request.points.len(),
        "detecting fuel events"
    );
    detect_events(&request.points, params, request.tank_capacity_l)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// RFC 3339 with an explicit `+00:00` offset, matching the service's wire format.
mod rfc3339_offset {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
