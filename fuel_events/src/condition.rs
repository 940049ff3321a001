//! Cleaning, ordering and smoothing of the fuel-level signal.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::normalize::CanonicalSample;

const RATE_MEDIAN_WINDOW: usize = 5;

/// Largest accepted Savitzky-Golay window. The kernel holds `window * window` weights.
pub const MAX_SAVGOL_WINDOW: usize = 501;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Clone, Debug, PartialEq)]
pub struct ConditionedSample {
    pub ts: DateTime<Utc>,
    pub fuel_l: f64,
    pub fuel_smooth: f64,
    /// Minutes since the previous sample; `None` for the first sample and for non-positive gaps.
    pub dt_min: Option<f64>,
    pub rate_lpm: Option<f64>,
    pub rate_med: Option<f64>,
    pub speed_kph: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingMode {
    SavitzkyGolay,
    #[default]
    PassThrough,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct ConditionDiagnostics {
    pub samples_in: usize,
    pub dropped_missing: usize,
    pub dropped_bad_timestamp: usize,
    pub dropped_negative: usize,
    pub samples_kept: usize,
    pub undefined_dt: usize,
    pub smoothing: SmoothingMode,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConditionedSeries {
    samples: Vec<ConditionedSample>,
    diagnostics: ConditionDiagnostics,
}

impl ConditionedSeries {
    /// Wrap samples that were conditioned elsewhere. They must already be in time order.
    pub fn from_samples(samples: Vec<ConditionedSample>) -> Self {
        let diagnostics = ConditionDiagnostics {
            samples_in: samples.len(),
            samples_kept: samples.len(),
            ..ConditionDiagnostics::default()
        };
        Self {
            samples,
            diagnostics,
        }
    }

    pub fn samples(&self) -> &[ConditionedSample] {
        &self.samples
    }

    pub fn diagnostics(&self) -> &ConditionDiagnostics {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Smoothing strategy for one batch.
///
/// Short batches, even windows and orders that cannot be fitted inside the
/// window fall back to the raw signal.
#[derive(Clone, Debug, PartialEq)]
pub enum Smoothing {
    SavitzkyGolay(SavgolKernel),
    PassThrough,
}

impl Smoothing {
    pub fn select(len: usize, window: usize, polyorder: usize) -> Self {
        if window == 0 || window % 2 == 0 || len < window || polyorder >= window {
            return Smoothing::PassThrough;
        }
        match SavgolKernel::new(window, polyorder) {
            Some(kernel) => Smoothing::SavitzkyGolay(kernel),
            None => Smoothing::PassThrough,
        }
    }

    pub fn mode(&self) -> SmoothingMode {
        match self {
            Smoothing::SavitzkyGolay(_) => SmoothingMode::SavitzkyGolay,
            Smoothing::PassThrough => SmoothingMode::PassThrough,
        }
    }

    pub fn apply(&self, values: &[f64]) -> Vec<f64> {
        match self {
            Smoothing::SavitzkyGolay(kernel) if values.len() >= kernel.window => {
                kernel.apply(values)
            }
            _ => values.to_vec(),
        }
    }
}

/// Least-squares projection weights of a Savitzky-Golay window.
///
/// Row `k` of `weights` evaluates the fitted polynomial at window position
/// `k`; the centre row is the usual convolution kernel and the outer rows
/// give the "interp" treatment of the series edges.
#[derive(Clone, Debug, PartialEq)]
pub struct SavgolKernel {
    window: usize,
    weights: Vec<Vec<f64>>,
}

impl SavgolKernel {
    pub fn new(window: usize, polyorder: usize) -> Option<Self> {
        if window == 0 || polyorder >= window {
            return None;
        }
        let half = (window / 2) as f64;
        let scale = half.max(1.0);
        let terms = polyorder + 1;
        let vander: Vec<Vec<f64>> = (0..window)
            .map(|j| {
                let x = (j as f64 - half) / scale;
                (0..terms).map(|p| x.powi(p as i32)).collect()
            })
            .collect();

        let mut gram = vec![vec![0.0; terms]; terms];
        for row in &vander {
            for a in 0..terms {
                for b in 0..terms {
                    gram[a][b] += row[a] * row[b];
                }
            }
        }
        let inverse = invert(gram)?;

        let weights = (0..window)
            .map(|k| {
                let coeffs: Vec<f64> = (0..terms)
                    .map(|b| (0..terms).map(|a| vander[k][a] * inverse[a][b]).sum())
                    .collect();
                (0..window)
                    .map(|j| (0..terms).map(|b| coeffs[b] * vander[j][b]).sum())
                    .collect()
            })
            .collect();

        Some(Self { window, weights })
    }

    fn apply(&self, values: &[f64]) -> Vec<f64> {
        let n = values.len();
        let half = self.window / 2;
        let last_start = n - self.window;
        (0..n)
            .map(|i| {
                let start = i.saturating_sub(half).min(last_start);
                let row = &self.weights[i - start];
                row.iter()
                    .zip(&values[start..start + self.window])
                    .map(|(w, y)| w * y)
                    .sum()
            })
            .collect()
    }
}

/// Gauss-Jordan inversion with partial pivoting.
fn invert(mut a: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut inv: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();
    for col in 0..n {
        let pivot = (col..n).max_by_key(|&r| OrderedFloat(a[r][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);
        let p = a[col][col];
        for j in 0..n {
            a[col][j] /= p;
            inv[col][j] /= p;
        }
        for r in 0..n {
            if r == col {
                continue;
            }
            let factor = a[r][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[r][j] -= factor * a[col][j];
                inv[r][j] -= factor * inv[col][j];
            }
        }
    }
    Some(inv)
}

/// Parse a telemetry timestamp into UTC. Naive date-times are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(trimmed, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

struct CleanSample<'a> {
    ts: DateTime<Utc>,
    fuel_l: f64,
    source: &'a CanonicalSample,
}

/// Clean, sort and smooth a batch of canonical samples.
///
/// Never fails: invalid samples are dropped and an empty series is a valid result.
pub fn condition_samples(
    samples: &[CanonicalSample],
    window: usize,
    polyorder: usize,
) -> ConditionedSeries {
    let mut diagnostics = ConditionDiagnostics {
        samples_in: samples.len(),
        ..ConditionDiagnostics::default()
    };

    let mut clean = Vec::with_capacity(samples.len());
    for sample in samples {
        let (Some(raw_ts), Some(fuel_l)) = (sample.timestamp.as_deref(), sample.fuel_level_liters)
        else {
            diagnostics.dropped_missing += 1;
            continue;
        };
        if fuel_l.is_nan() {
            diagnostics.dropped_missing += 1;
            continue;
        }
        let Some(ts) = parse_timestamp(raw_ts) else {
            diagnostics.dropped_bad_timestamp += 1;
            continue;
        };
        clean.push(CleanSample {
            ts,
            fuel_l,
            source: sample,
        });
    }
    clean.sort_by_key(|s| s.ts);

    let before = clean.len();
    clean.retain(|s| s.fuel_l >= 0.0);
    diagnostics.dropped_negative = before - clean.len();
    diagnostics.samples_kept = clean.len();

    let raw: Vec<f64> = clean.iter().map(|s| s.fuel_l).collect();
    let smoothing = Smoothing::select(raw.len(), window, polyorder);
    diagnostics.smoothing = smoothing.mode();
    let smooth = smoothing.apply(&raw);

    let dt_min: Vec<Option<f64>> = (0..clean.len())
        .map(|i| {
            if i == 0 {
                return None;
            }
            let delta = clean[i].ts - clean[i - 1].ts;
            let minutes = delta
                .num_nanoseconds()
                .map(|ns| ns as f64 / 60e9)
                .unwrap_or_else(|| delta.num_milliseconds() as f64 / 60_000.0);
            (minutes > 0.0).then_some(minutes)
        })
        .collect();
    diagnostics.undefined_dt = dt_min.iter().skip(1).filter(|dt| dt.is_none()).count();

    let rate_lpm: Vec<Option<f64>> = (0..clean.len())
        .map(|i| dt_min[i].map(|dt| (smooth[i] - smooth[i - 1]) / dt))
        .collect();
    let rate_med = rolling_median(&rate_lpm, RATE_MEDIAN_WINDOW);

    let samples = clean
        .iter()
        .enumerate()
        .map(|(i, s)| ConditionedSample {
            ts: s.ts,
            fuel_l: s.fuel_l,
            fuel_smooth: smooth[i],
            dt_min: dt_min[i],
            rate_lpm: rate_lpm[i],
            rate_med: rate_med[i],
            speed_kph: s.source.speed_kph,
            lat: s.source.lat,
            lon: s.source.lon,
        })
        .collect();

    debug!(
        samples_in = diagnostics.samples_in,
        kept = diagnostics.samples_kept,
        dropped_missing = diagnostics.dropped_missing,
        dropped_bad_timestamp = diagnostics.dropped_bad_timestamp,
        dropped_negative = diagnostics.dropped_negative,
        smoothing = ?diagnostics.smoothing,
        "conditioned fuel series"
    );

    ConditionedSeries {
        samples,
        diagnostics,
    }
}

/// Centered rolling median over the defined values of each window.
fn rolling_median(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let before = (window - 1) / 2;
    let after = window / 2;
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(before);
            let end = (i + after + 1).min(n);
            let mut slice: Vec<OrderedFloat<f64>> = values[start..end]
                .iter()
                .flatten()
                .map(|&v| OrderedFloat(v))
                .collect();
            if slice.is_empty() {
                return None;
            }
            slice.sort();
            let mid = slice.len() / 2;
            Some(if slice.len() % 2 == 0 {
                (slice[mid - 1].0 + slice[mid].0) / 2.0
            } else {
                slice[mid].0
            })
        })
        .collect()
}
