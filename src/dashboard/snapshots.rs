use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Most recent reading for one city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitySnapshot {
    pub city: String,
    #[serde(rename = "dt", alias = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "temp", alias = "temperature_c", alias = "temperatureC")]
    pub temperature_c: f64,
    #[serde(rename = "feels_like", alias = "feels_like_c", alias = "feelsLikeC")]
    pub feels_like_c: f64,
    #[serde(rename = "humidity", alias = "humidity_pct", alias = "humidityPct")]
    pub humidity_pct: f64,
    #[serde(rename = "wind_speed", alias = "wind_speed_ms", alias = "windSpeedMs")]
    pub wind_speed_ms: f64,
    #[serde(rename = "wind_deg", alias = "wind_degrees", alias = "windDegrees")]
    pub wind_degrees: f64,
    #[serde(rename = "dominant_condition", alias = "condition")]
    pub condition: String,
    #[serde(rename = "clouds", default, skip_serializing_if = "Option::is_none")]
    pub clouds_pct: Option<f64>,
}

pub type SnapshotMap = Arc<BTreeMap<String, CitySnapshot>>;

#[derive(Debug, Default)]
pub struct SnapshotStore {
    latest: SnapshotMap,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces each city's snapshot wholesale and returns the resulting map.
    ///
    /// A snapshot older than the one already held for its city is ignored.
    /// Returns `None` when nothing changed.
    pub fn apply_snapshots(
        &mut self,
        events: impl IntoIterator<Item = CitySnapshot>,
    ) -> Option<SnapshotMap> {
        let mut changed = false;
        for snapshot in events {
            if let Some(current) = self.latest.get(&snapshot.city) {
                if snapshot.timestamp < current.timestamp {
                    log::debug!(
                        "Ignoring stale snapshot for {} ({} < {})",
                        snapshot.city,
                        snapshot.timestamp,
                        current.timestamp
                    );
                    continue;
                }
                if *current == snapshot {
                    continue;
                }
            }
            // Observers holding the previous Arc keep their view
            Arc::make_mut(&mut self.latest).insert(snapshot.city.clone(), snapshot);
            changed = true;
        }

        changed.then(|| Arc::clone(&self.latest))
    }

    pub fn get(&self, city: &str) -> Option<&CitySnapshot> {
        self.latest.get(city)
    }

    pub fn all(&self) -> SnapshotMap {
        Arc::clone(&self.latest)
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
