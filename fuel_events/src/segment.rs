//! Threshold segmentation of the conditioned series into candidate events.

use std::ops::Range;

use tracing::debug;

use crate::condition::{ConditionedSample, ConditionedSeries};
use crate::confidence::score_confidence;
use crate::{DetectParams, EventType, FuelEvent};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Segmentation {
    /// Refuel candidates first, then drain candidates, each in time order.
    pub candidates: Vec<FuelEvent>,
    pub implausible_excluded: usize,
}

/// Samples whose median rate is undefined or within the plausible bound.
///
/// The exclusion runs over the whole series before any run is scanned, so a
/// dropped spike makes its neighbours adjacent.
pub fn plausible_samples(
    series: &ConditionedSeries,
    max_rate_plausible: f64,
) -> Vec<&ConditionedSample> {
    series
        .samples()
        .iter()
        .filter(|s| match s.rate_med {
            Some(rate) => rate.abs() <= max_rate_plausible,
            None => true,
        })
        .collect()
}

pub fn candidate_mask(
    samples: &[&ConditionedSample],
    event_type: EventType,
    params: &DetectParams,
) -> Vec<bool> {
    samples
        .iter()
        .map(|s| match (event_type, s.rate_med) {
            (EventType::Refuel, Some(rate)) => rate > params.refuel_rate_min,
            (EventType::Drain, Some(rate)) => rate < -params.drain_rate_min,
            (_, None) => false,
        })
        .collect()
}

/// Maximal runs of consecutive `true` positions.
///
/// The `false` position that closes a run is not part of it, so an event
/// ends on its last qualifying sample.
pub fn extract_runs(mask: &[bool]) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;
    for (i, &ok) in mask.iter().enumerate() {
        match (ok, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push(s..i);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push(s..mask.len());
    }
    runs
}

fn build_event(
    run: &[&ConditionedSample],
    event_type: EventType,
    params: &DetectParams,
    tank_capacity_l: f64,
) -> Option<FuelEvent> {
    let first = run.first()?;
    let last = run.last()?;
    let duration_min: f64 = run.iter().filter_map(|s| s.dt_min).sum();
    let delta_liters = last.fuel_smooth - first.fuel_smooth;
    if duration_min < params.min_event_min || delta_liters == 0.0 {
        return None;
    }
    let max_level = run
        .iter()
        .map(|s| s.fuel_smooth)
        .fold(f64::NEG_INFINITY, f64::max);
    if !(0.0..=tank_capacity_l).contains(&max_level) {
        return None;
    }
    Some(FuelEvent {
        event_type,
        start_ts: first.ts,
        end_ts: last.ts,
        duration_min,
        delta_liters,
        confidence: score_confidence(
            event_type,
            duration_min,
            delta_liters,
            params.max_rate_plausible,
        ),
    })
}

/// Candidate events of one type from an already filtered sample set.
pub fn segment_events(
    samples: &[&ConditionedSample],
    event_type: EventType,
    params: &DetectParams,
    tank_capacity_l: f64,
) -> Vec<FuelEvent> {
    let mask = candidate_mask(samples, event_type, params);
    extract_runs(&mask)
        .into_iter()
        .filter_map(|run| build_event(&samples[run], event_type, params, tank_capacity_l))
        .collect()
}

pub fn segment_series(
    series: &ConditionedSeries,
    params: &DetectParams,
    tank_capacity_l: f64,
) -> Segmentation {
    let samples = plausible_samples(series, params.max_rate_plausible);
    let implausible_excluded = series.len() - samples.len();
    if implausible_excluded > 0 {
        debug!(
            excluded = implausible_excluded,
            max_rate_plausible = params.max_rate_plausible,
            "excluded samples with implausible fuel rate"
        );
    }

    let mut candidates = segment_events(&samples, EventType::Refuel, params, tank_capacity_l);
    candidates.extend(segment_events(
        &samples,
        EventType::Drain,
        params,
        tank_capacity_l,
    ));

    Segmentation {
        candidates,
        implausible_excluded,
    }
}
