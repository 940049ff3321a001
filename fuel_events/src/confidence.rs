//! Heuristic confidence for candidate events.

use crate::EventType;

/// Minimum duration counted as confident. Independent of the configured minimum event length.
pub const CONFIDENT_DURATION_MIN: f64 = 3.0;
/// Minimum absolute volume counted as confident. Independent of tank capacity.
pub const CONFIDENT_MAGNITUDE_L: f64 = 5.0;

const CHECK_WEIGHT: f64 = 0.25;

/// Score an event in `[0, 1]` from four equally weighted checks.
pub fn score_confidence(
    event_type: EventType,
    duration_min: f64,
    delta_liters: f64,
    max_rate_plausible: f64,
) -> f64 {
    let mean_rate = delta_liters.abs() / duration_min.max(1.0);
    let sign_matches = match event_type {
        EventType::Refuel => delta_liters > 0.0,
        EventType::Drain => delta_liters < 0.0,
    };
    let checks = [
        duration_min >= CONFIDENT_DURATION_MIN,
        mean_rate <= max_rate_plausible,
        sign_matches,
        delta_liters.abs() >= CONFIDENT_MAGNITUDE_L,
    ];
    let score = checks.iter().filter(|&&passed| passed).count() as f64 * CHECK_WEIGHT;
    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_refuel_scores_full() {
        assert_eq!(score_confidence(EventType::Refuel, 10.0, 100.0, 12.0), 1.0);
    }

    #[test]
    fn each_failed_check_costs_a_quarter() {
        // Too short.
        assert_eq!(score_confidence(EventType::Refuel, 2.0, 20.0, 12.0), 0.75);
        // Mean rate above plausible.
        assert_eq!(score_confidence(EventType::Refuel, 4.0, 60.0, 12.0), 0.75);
        // Sign disagrees with type.
        assert_eq!(score_confidence(EventType::Drain, 10.0, 30.0, 12.0), 0.75);
        // Too small.
        assert_eq!(score_confidence(EventType::Drain, 10.0, -4.0, 12.0), 0.75);
    }

    #[test]
    fn mean_rate_uses_at_least_one_minute() {
        // 0.5 min with 10 L: 10 / max(0.5, 1) = 10 <= 12.
        assert_eq!(score_confidence(EventType::Refuel, 0.5, 10.0, 12.0), 0.75);
    }

    #[test]
    fn zero_delta_still_scores_within_bounds() {
        let score = score_confidence(EventType::Drain, 0.0, 0.0, 12.0);
        assert_eq!(score, 0.25);
        assert!((0.0..=1.0).contains(&score));
    }
}
