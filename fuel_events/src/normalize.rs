//! Mapping of heterogeneous telemetry records onto canonical samples.

use serde::{Deserialize, Serialize};

/// One telemetry record as it arrives on the wire.
///
/// The timestamp may be sent as `ts` or `timestamp`, the fuel reading as
/// `fuel_level_liters` or `fuel`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct InputPoint {
    pub ts: Option<String>,
    pub timestamp: Option<String>,
    pub fuel: Option<f64>,
    pub fuel_level_liters: Option<f64>,
    pub speed: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectRequest {
    pub device_id: String,
    pub tank_capacity_l: Option<f64>,
    pub points: Vec<InputPoint>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CanonicalSample {
    pub timestamp: Option<String>,
    pub fuel_level_liters: Option<f64>,
    pub speed_kph: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl From<&InputPoint> for CanonicalSample {
    fn from(point: &InputPoint) -> Self {
        Self {
            timestamp: point.ts.clone().or_else(|| point.timestamp.clone()),
            fuel_level_liters: point.fuel_level_liters.or(point.fuel),
            speed_kph: point.speed,
            lat: point.lat,
            lon: point.lon,
        }
    }
}

pub fn normalize_points(points: &[InputPoint]) -> Vec<CanonicalSample> {
    points.iter().map(CanonicalSample::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_wins_over_timestamp() {
        let point = InputPoint {
            ts: Some("2024-01-01T00:00:00Z".into()),
            timestamp: Some("2023-12-31T00:00:00Z".into()),
            fuel: Some(10.0),
            ..InputPoint::default()
        };
        let sample = CanonicalSample::from(&point);
        assert_eq!(sample.timestamp.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn timestamp_used_when_ts_missing() {
        let point = InputPoint {
            timestamp: Some("2023-12-31T00:00:00Z".into()),
            ..InputPoint::default()
        };
        let sample = CanonicalSample::from(&point);
        assert_eq!(sample.timestamp.as_deref(), Some("2023-12-31T00:00:00Z"));
    }

    #[test]
    fn liters_field_takes_priority_over_generic_fuel() {
        let point = InputPoint {
            fuel: Some(10.0),
            fuel_level_liters: Some(42.0),
            ..InputPoint::default()
        };
        assert_eq!(CanonicalSample::from(&point).fuel_level_liters, Some(42.0));

        let point = InputPoint {
            fuel: Some(10.0),
            ..InputPoint::default()
        };
        assert_eq!(CanonicalSample::from(&point).fuel_level_liters, Some(10.0));
    }

    #[test]
    fn passthrough_fields_are_carried_and_order_kept() {
        let points = vec![
            InputPoint {
                ts: Some("b".into()),
                speed: Some(55.0),
                lat: Some(52.1),
                lon: Some(4.3),
                ..InputPoint::default()
            },
            InputPoint {
                ts: Some("a".into()),
                fuel: Some(-3.0),
                ..InputPoint::default()
            },
        ];
        let samples = normalize_points(&points);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].speed_kph, Some(55.0));
        assert_eq!(samples[0].lat, Some(52.1));
        assert_eq!(samples[0].lon, Some(4.3));
        assert_eq!(samples[1].timestamp.as_deref(), Some("a"));
        assert_eq!(samples[1].fuel_level_liters, Some(-3.0));
    }

    #[test]
    fn request_deserializes_with_optional_fields_missing() {
        let request: DetectRequest = serde_json::from_str(
            r#"{"device_id":"truck-7","points":[{"timestamp":"2024-01-01T00:00:00Z","fuel":12.5}]}"#,
        )
        .unwrap();
        assert_eq!(request.device_id, "truck-7");
        assert_eq!(request.tank_capacity_l, None);
        assert_eq!(request.points[0].fuel, Some(12.5));
        assert_eq!(request.points[0].ts, None);
    }
}
