use assert_matches::assert_matches;
use serde_json::{Map, Value, json};

use hydroviewer::domain::RiverId;
use hydroviewer::error::HydroError;
use hydroviewer::reconcile::{member_key, reconcile_forecast, reconcile_retrospective};
use hydroviewer::series::ENSEMBLE_MEMBERS;

const STEPS: usize = 10;

fn datetimes(count: usize) -> Value {
    Value::Array(
        (0..count)
            .map(|hour| json!(format!("2024-01-01T{:02}:00:00Z", hour)))
            .collect(),
    )
}

/// Corrected members hold `member * 100 + step`, originals the negation.
fn forecast_payload(sentinels: &[usize]) -> Map<String, Value> {
    let mut object = Map::new();
    object.insert("datetime".to_string(), datetimes(STEPS));
    for member in 1..=ENSEMBLE_MEMBERS {
        let corrected: Vec<Value> = (0..STEPS)
            .map(|step| {
                if member == 1 && sentinels.contains(&step) {
                    if step == 7 { json!(null) } else { json!("") }
                } else {
                    json!((member * 100 + step) as f64)
                }
            })
            .collect();
        let original: Vec<Value> = (0..STEPS)
            .map(|step| json!(-((member * 100 + step) as f64)))
            .collect();
        object.insert(member_key(member), Value::Array(corrected));
        object.insert(format!("{}_original", member_key(member)), Value::Array(original));
    }
    object
}

#[test]
fn forecast_drops_sentinel_positions_everywhere() {
    let payload = Value::Object(forecast_payload(&[3, 7]));
    let series = reconcile_forecast(&payload).unwrap();

    assert_eq!(series.len(), STEPS - 2);
    assert_eq!(series.member_count(), ENSEMBLE_MEMBERS);
    let original = series.discharge_original.as_ref().unwrap();
    assert_eq!(original.len(), ENSEMBLE_MEMBERS);
    for member in series.discharge.iter().chain(original.iter()) {
        assert_eq!(member.len(), STEPS - 2);
        assert!(member.iter().all(|value| value.is_finite()));
    }

    let kept_steps: Vec<usize> = (0..STEPS).filter(|step| *step != 3 && *step != 7).collect();
    let expected: Vec<f64> = kept_steps.iter().map(|step| (200 + step) as f64).collect();
    assert_eq!(series.discharge[1], expected);
    let expected_original: Vec<f64> = kept_steps.iter().map(|step| -((100 + step) as f64)).collect();
    assert_eq!(original[0], expected_original);
    assert_eq!(series.datetime[3].format("%H").to_string(), "04");

    assert_eq!(series.stats.len(), STEPS - 2);
    assert_eq!(series.stats_original.as_ref().map(|stats| stats.len()), Some(STEPS - 2));
}

#[test]
fn forecast_without_sentinels_keeps_everything() {
    let payload = Value::Object(forecast_payload(&[]));
    let series = reconcile_forecast(&payload).unwrap();
    assert_eq!(series.len(), STEPS);
    assert!(series.is_bias_corrected());
}

#[test]
fn forecast_missing_member_is_malformed() {
    let mut object = forecast_payload(&[]);
    object.remove("ensemble_37_original");
    let err = reconcile_forecast(&Value::Object(object)).unwrap_err();
    assert_matches!(err, HydroError::MalformedResponse(message) if message.contains("ensemble_37_original"));
}

#[test]
fn forecast_gap_outside_first_member_is_malformed() {
    let mut object = forecast_payload(&[]);
    if let Some(Value::Array(values)) = object.get_mut("ensemble_05") {
        values[2] = json!("");
    }
    let err = reconcile_forecast(&Value::Object(object)).unwrap_err();
    assert_matches!(err, HydroError::MalformedResponse(_));
}

#[test]
fn retrospective_renames_river_arrays() {
    let river = RiverId::new(760021611);
    let payload = json!({
        "datetime": datetimes(4),
        "760021611": [1.0, "", 3.0, null],
        "760021611_original": [1.5, 2.5, 3.5, 4.5],
    });

    let series = reconcile_retrospective(&payload, river).unwrap();
    assert_eq!(series.len(), 4);
    assert_eq!(series.discharge, vec![Some(1.0), None, Some(3.0), None]);
    assert_eq!(
        series.discharge_original,
        Some(vec![Some(1.5), Some(2.5), Some(3.5), Some(4.5)])
    );
    assert_eq!(series.observations().count(), 2);
}

#[test]
fn retrospective_length_mismatch_is_malformed() {
    let payload = json!({
        "datetime": datetimes(3),
        "7": [1.0, 2.0],
        "7_original": [1.0, 2.0, 3.0],
    });
    let err = reconcile_retrospective(&payload, RiverId::new(7)).unwrap_err();
    assert_matches!(err, HydroError::MalformedResponse(_));
}
