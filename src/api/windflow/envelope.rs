//! Decoding of push-channel frames.
//!
//! A frame is `{"type": ..., "message": ...}` where `message` is normally a
//! JSON document serialized into a string. Nothing in here returns an error:
//! a bad frame becomes [`StreamEvent::Unrecognized`], a bad row is reported in
//! [`Decoded::skipped`] and the rest of its batch survives.

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::dashboard::core::alerts::AlertCondition;
use crate::dashboard::rollups::RollupRow;
use crate::dashboard::snapshots::CitySnapshot;
use crate::error::WindflowError;

/// How many layers of string-wrapped JSON are peeled off `message`.
const MAX_PAYLOAD_DEPTH: usize = 3;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    message: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Weather(Vec<CitySnapshot>),
    Rollup(BTreeMap<String, Vec<RollupRow>>),
    Alert(Vec<AlertCondition>),
    Unrecognized(String),
}

#[derive(Debug, Default)]
pub struct Decoded {
    pub events: Vec<StreamEvent>,
    /// Rows dropped for missing or ill-typed fields.
    pub skipped: Vec<WindflowError>,
}

impl Decoded {
    fn unrecognized(reason: String) -> Self {
        warn!("Dropping envelope: {}", WindflowError::DecodeError(reason.clone()));
        Decoded {
            events: vec![StreamEvent::Unrecognized(reason)],
            skipped: Vec::new(),
        }
    }

    pub fn is_unrecognized(&self) -> bool {
        matches!(self.events.as_slice(), [StreamEvent::Unrecognized(_)])
    }
}

pub fn decode(raw: &str) -> Decoded {
    let envelope = match serde_json::from_str::<Envelope>(raw) {
        Ok(envelope) => envelope,
        Err(e) => return Decoded::unrecognized(format!("malformed envelope: {}", e)),
    };

    let payload = match unwrap_payload(envelope.message) {
        Ok(payload) => payload,
        Err(reason) => {
            return Decoded::unrecognized(format!("'{}' envelope: {}", envelope.kind, reason))
        }
    };

    let mut decoded = Decoded::default();
    match envelope.kind.as_str() {
        "weather" => decode_weather(payload, &mut decoded),
        "alert" | "alerts" => {
            let list = match payload {
                Value::Object(mut fields) => fields.remove("alerts").unwrap_or(Value::Null),
                other => other,
            };
            match decode_rows::<AlertCondition>("alerts", list, &mut decoded.skipped) {
                Some(alerts) => decoded.events.push(StreamEvent::Alert(alerts)),
                None => return Decoded::unrecognized("alert envelope carries no list".into()),
            }
        }
        other => return Decoded::unrecognized(format!("unknown envelope type '{}'", other)),
    }

    for skipped in &decoded.skipped {
        warn!("Skipping row: {}", skipped);
    }
    debug!(
        "Decoded '{}' envelope into {} event(s), {} row(s) skipped",
        envelope.kind,
        decoded.events.len(),
        decoded.skipped.len()
    );
    decoded
}

fn decode_weather(payload: Value, decoded: &mut Decoded) {
    let Value::Object(mut fields) = payload else {
        *decoded = Decoded::unrecognized("weather payload is not an object".into());
        return;
    };

    let weather = fields.remove("weather");
    let roll_ups = fields.remove("roll_ups").or_else(|| fields.remove("rollups"));
    let alerts = fields.remove("alerts");

    if weather.is_none() && roll_ups.is_none() && alerts.is_none() {
        *decoded = Decoded::unrecognized(
            "weather payload has none of 'weather', 'roll_ups', 'alerts'".into(),
        );
        return;
    }

    if let Some(weather) = weather {
        if let Some(rows) = decode_rows::<CitySnapshot>("weather", weather, &mut decoded.skipped) {
            decoded.events.push(StreamEvent::Weather(rows));
        }
    }

    if let Some(roll_ups) = roll_ups {
        match roll_ups {
            Value::Object(cities) => {
                let mut by_city = BTreeMap::new();
                for (city, rows) in cities {
                    let section = format!("roll_ups[{}]", city);
                    if let Some(rows) = decode_rows::<RollupRow>(&section, rows, &mut decoded.skipped)
                    {
                        by_city.insert(city, rows);
                    }
                }
                decoded.events.push(StreamEvent::Rollup(by_city));
            }
            other => decoded.skipped.push(WindflowError::merge(
                "roll_ups",
                format!("expected object, got {}", kind_of(&other)),
            )),
        }
    }

    if let Some(alerts) = alerts {
        if let Some(rows) = decode_rows::<AlertCondition>("alerts", alerts, &mut decoded.skipped) {
            decoded.events.push(StreamEvent::Alert(rows));
        }
    }
}

/// Peels string-encoded layers until a structured value remains.
fn unwrap_payload(mut value: Value) -> Result<Value, String> {
    for _ in 0..MAX_PAYLOAD_DEPTH {
        value = match value {
            Value::String(text) => serde_json::from_str(&text)
                .map_err(|e| format!("message payload is not JSON: {}", e))?,
            Value::Object(_) | Value::Array(_) => return Ok(value),
            other => return Err(format!("message payload is {}", kind_of(&other))),
        };
    }
    match value {
        Value::Object(_) | Value::Array(_) => Ok(value),
        _ => Err("message payload nested too deeply".to_string()),
    }
}

/// Decodes each element on its own. `None` only when `value` is not a list.
fn decode_rows<T: DeserializeOwned>(
    section: &str,
    value: Value,
    skipped: &mut Vec<WindflowError>,
) -> Option<Vec<T>> {
    let items = match value {
        Value::Array(items) => items,
        other => {
            skipped.push(WindflowError::merge(
                section,
                format!("expected list, got {}", kind_of(&other)),
            ));
            return None;
        }
    };

    let mut rows = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<T>(item) {
            Ok(row) => rows.push(row),
            Err(e) => skipped.push(WindflowError::merge(format!("{}[{}]", section, index), e)),
        }
    }
    Some(rows)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot_json(city: &str) -> Value {
        json!({
            "city": city, "dt": "2024-01-02T09:00:00Z", "temp": 29.1, "feels_like": 31.0,
            "humidity": 78.0, "wind_speed": 4.1, "wind_deg": 225.0, "dominant_condition": "Clouds"
        })
    }

    fn rollup_json(date: &str, avg: f64) -> Value {
        json!({
            "date": date, "avg_temp": avg, "max_temp": avg + 3.0, "min_temp": avg - 3.0,
            "avg_feels_like": avg, "max_feels_like": avg + 2.0, "min_feels_like": avg - 2.0,
            "avg_humidity": 70.0, "avg_wind_speed": 3.0, "avg_wind_deg": 200.0,
            "dominant_condition": "Clouds"
        })
    }

    fn envelope(kind: &str, inner: Value) -> String {
        json!({ "type": kind, "message": inner.to_string() }).to_string()
    }

    #[test]
    fn decodes_double_encoded_weather_envelope() {
        let raw = envelope(
            "weather",
            json!({
                "weather": [snapshot_json("Lagos")],
                "roll_ups": { "Lagos": [rollup_json("2024-01-02", 28.0)], "Abuja": [] },
                "alerts": [{ "type": "Temperature", "city": "Lagos", "breach": "Maximum",
                             "threshold": 28, "consecutive_updates": 3 }]
            }),
        );

        let decoded = decode(&raw);
        assert!(decoded.skipped.is_empty());
        assert_eq!(decoded.events.len(), 3);
        match &decoded.events[0] {
            StreamEvent::Weather(rows) => assert_eq!(rows[0].city, "Lagos"),
            other => panic!("expected weather, got {:?}", other),
        }
        match &decoded.events[1] {
            StreamEvent::Rollup(by_city) => {
                assert_eq!(by_city["Lagos"].len(), 1);
                assert!(by_city["Abuja"].is_empty());
            }
            other => panic!("expected rollup, got {:?}", other),
        }
        assert!(matches!(&decoded.events[2], StreamEvent::Alert(a) if a.len() == 1));
    }

    #[test]
    fn accepts_structured_message_and_alert_type() {
        let raw = json!({
            "type": "alert",
            "message": [{ "type": "Condition", "city": "Accra", "threshold": "Rain",
                          "consecutive_updates": 2 }]
        })
        .to_string();
        let decoded = decode(&raw);
        assert!(matches!(&decoded.events[..], [StreamEvent::Alert(a)] if a[0].city == "Accra"));
    }

    #[test]
    fn malformed_input_is_unrecognized() {
        assert!(decode("not json").is_unrecognized());
        assert!(decode(r#"{"type": "weather"}"#).is_unrecognized());
        assert!(decode(r#"{"type": "weather", "message": "{broken"}"#).is_unrecognized());
        assert!(decode(r#"{"type": "weather", "message": 42}"#).is_unrecognized());
        assert!(decode(&envelope("weather", json!({ "unrelated": true }))).is_unrecognized());
    }

    #[test]
    fn unknown_type_is_unrecognized() {
        let decoded = decode(&envelope("heartbeat", json!({})));
        match &decoded.events[..] {
            [StreamEvent::Unrecognized(reason)] => assert!(reason.contains("heartbeat")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_rows_are_skipped_and_rest_applies() {
        let mut missing_temp = snapshot_json("Kano");
        missing_temp.as_object_mut().unwrap().remove("temp");
        let raw = envelope(
            "weather",
            json!({
                "weather": [snapshot_json("Lagos"), missing_temp],
                "roll_ups": { "Lagos": [rollup_json("2024-13-40", 1.0), rollup_json("2024-01-03", 27.0)] }
            }),
        );

        let decoded = decode(&raw);
        assert_eq!(decoded.skipped.len(), 2);
        assert!(decoded
            .skipped
            .iter()
            .all(|e| matches!(e, WindflowError::MergeError { .. })));
        match &decoded.events[..] {
            [StreamEvent::Weather(snapshots), StreamEvent::Rollup(by_city)] => {
                assert_eq!(snapshots.len(), 1);
                assert_eq!(by_city["Lagos"].len(), 1);
                assert_eq!(by_city["Lagos"][0].date.to_string(), "2024-01-03");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn non_list_section_is_reported_not_fatal() {
        let raw = envelope("weather", json!({ "weather": {"city": "Lagos"}, "alerts": [] }));
        let decoded = decode(&raw);
        assert_eq!(decoded.skipped.len(), 1);
        assert!(matches!(&decoded.events[..], [StreamEvent::Alert(a)] if a.is_empty()));
    }
}
