use chrono::NaiveDate;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Daily aggregate of one city's readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRow {
    pub date: NaiveDate,
    #[serde(rename = "avg_temp", alias = "avgTempC")]
    pub avg_temp_c: f64,
    #[serde(rename = "max_temp", alias = "maxTempC")]
    pub max_temp_c: f64,
    #[serde(rename = "min_temp", alias = "minTempC")]
    pub min_temp_c: f64,
    #[serde(rename = "avg_feels_like", alias = "avgFeelsLikeC")]
    pub avg_feels_like_c: f64,
    #[serde(rename = "max_feels_like", alias = "maxFeelsLikeC")]
    pub max_feels_like_c: f64,
    #[serde(rename = "min_feels_like", alias = "minFeelsLikeC")]
    pub min_feels_like_c: f64,
    #[serde(rename = "avg_humidity", alias = "avgHumidityPct")]
    pub avg_humidity_pct: f64,
    #[serde(rename = "avg_wind_speed", alias = "avgWindSpeedMs")]
    pub avg_wind_speed_ms: f64,
    #[serde(rename = "avg_wind_deg", alias = "avgWindDegrees")]
    pub avg_wind_degrees: f64,
    #[serde(rename = "avg_clouds", default, skip_serializing_if = "Option::is_none")]
    pub avg_clouds_pct: Option<f64>,
    #[serde(alias = "dominantCondition", deserialize_with = "condition_label")]
    pub dominant_condition: String,
}

/// Accepts either a plain label or the backend's ranked `[[label, count], ...]`.
fn condition_label<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Label(String),
        Ranked(Vec<(String, serde_json::Value)>),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Label(label) => Ok(label),
        Raw::Ranked(ranked) => ranked
            .into_iter()
            .next()
            .map(|(label, _)| label)
            .ok_or_else(|| de::Error::custom("dominant_condition ranking is empty")),
    }
}

/// Per-city daily series keyed by date.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RollupStore {
    series: BTreeMap<String, BTreeMap<NaiveDate, RollupRow>>,
}

impl RollupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts `rows` into `city`'s series by date and reports whether
    /// anything changed. An unseen city gets a new series; an empty batch is
    /// a no-op.
    pub fn apply_rollup_batch(
        &mut self,
        city: &str,
        rows: impl IntoIterator<Item = RollupRow>,
    ) -> bool {
        let mut rows = rows.into_iter().peekable();
        if rows.peek().is_none() {
            return false;
        }

        let series = self.series.entry(city.to_string()).or_default();
        let mut changed = false;
        for row in rows {
            match series.get(&row.date) {
                Some(existing) if *existing == row => {}
                _ => {
                    series.insert(row.date, row);
                    changed = true;
                }
            }
        }
        changed
    }

    /// Loads a full snapshot of every city through the same upsert as
    /// incremental updates. Existing rows are never cleared first.
    pub fn seed_from_full_load(
        &mut self,
        all_cities: impl IntoIterator<Item = (String, Vec<RollupRow>)>,
    ) -> Vec<String> {
        all_cities
            .into_iter()
            .filter_map(|(city, rows)| self.apply_rollup_batch(&city, rows).then_some(city))
            .collect()
    }

    /// The city's rows in ascending date order.
    pub fn series(&self, city: &str) -> Vec<RollupRow> {
        self.series
            .get(city)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn cities(&self) -> Vec<String> {
        self.series.keys().cloned().collect()
    }

    pub fn contains(&self, city: &str) -> bool {
        self.series.contains_key(city)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(date: &str, avg: f64) -> RollupRow {
        RollupRow {
            date: date.parse().unwrap(),
            avg_temp_c: avg,
            max_temp_c: avg + 4.0,
            min_temp_c: avg - 4.0,
            avg_feels_like_c: avg - 0.5,
            max_feels_like_c: avg + 3.5,
            min_feels_like_c: avg - 4.5,
            avg_humidity_pct: 70.0,
            avg_wind_speed_ms: 2.5,
            avg_wind_degrees: 180.0,
            avg_clouds_pct: None,
            dominant_condition: "Clear".to_string(),
        }
    }

    fn dates(rows: &[RollupRow]) -> Vec<String> {
        rows.iter().map(|r| r.date.to_string()).collect()
    }

    #[test]
    fn applying_same_batch_twice_is_idempotent() {
        let batch = vec![row("2024-01-01", 27.0), row("2024-01-02", 28.0)];
        let mut once = RollupStore::new();
        assert!(once.apply_rollup_batch("Lagos", batch.clone()));

        let mut twice = once.clone();
        assert!(!twice.apply_rollup_batch("Lagos", batch));
        assert_eq!(once, twice);
    }

    #[test]
    fn arrival_order_does_not_change_the_series() {
        let d1 = row("2024-01-01", 25.0);
        let d2 = row("2024-01-02", 26.0);
        let d3 = row("2024-01-03", 27.0);
        let orders = [
            [&d1, &d2, &d3],
            [&d1, &d3, &d2],
            [&d2, &d1, &d3],
            [&d2, &d3, &d1],
            [&d3, &d1, &d2],
            [&d3, &d2, &d1],
        ];

        let mut results = Vec::new();
        for order in orders {
            let mut store = RollupStore::new();
            for r in order {
                store.apply_rollup_batch("Lagos", vec![r.clone()]);
            }
            results.push(store.series("Lagos"));
        }

        for series in &results {
            assert_eq!(series, &results[0]);
            assert_eq!(dates(series), ["2024-01-01", "2024-01-02", "2024-01-03"]);
        }
    }

    #[test]
    fn existing_date_is_overwritten() {
        let mut store = RollupStore::new();
        store.seed_from_full_load(vec![(
            "Lagos".to_string(),
            vec![row("2024-01-01", 27.0), row("2024-01-02", 28.0)],
        )]);
        store.apply_rollup_batch("Lagos", vec![row("2024-01-02", 31.0), row("2024-01-03", 29.0)]);

        let series = store.series("Lagos");
        assert_eq!(dates(&series), ["2024-01-01", "2024-01-02", "2024-01-03"]);
        assert_eq!(series[1], row("2024-01-02", 31.0));
        assert_eq!(series.last(), Some(&row("2024-01-03", 29.0)));
    }

    #[test]
    fn first_update_creates_series_but_empty_batch_does_not() {
        let mut store = RollupStore::new();
        assert!(!store.apply_rollup_batch("Accra", Vec::new()));
        assert!(!store.contains("Accra"));

        assert!(store.apply_rollup_batch("Accra", vec![row("2024-02-01", 30.0)]));
        assert_eq!(store.cities(), vec!["Accra".to_string()]);
    }

    #[test]
    fn seed_after_push_keeps_pushed_rows() {
        let mut store = RollupStore::new();
        store.apply_rollup_batch("Lagos", vec![row("2024-01-03", 29.0)]);
        let changed = store.seed_from_full_load(vec![
            ("Lagos".to_string(), vec![row("2024-01-01", 27.0)]),
            ("Abuja".to_string(), Vec::new()),
        ]);

        assert_eq!(changed, vec!["Lagos".to_string()]);
        assert_eq!(dates(&store.series("Lagos")), ["2024-01-01", "2024-01-03"]);
        assert!(store.series("Abuja").is_empty());
    }

    #[test]
    fn dominant_condition_accepts_ranked_pairs() {
        let raw = r#"{"date": "2024-01-01", "avg_temp": 20.0, "max_temp": 24.0, "min_temp": 16.0,
                      "avg_feels_like": 19.5, "max_feels_like": 23.0, "min_feels_like": 15.0,
                      "avg_humidity": 55.0, "avg_wind_speed": 3.0, "avg_wind_deg": 90.0,
                      "avg_clouds": 10.0,
                      "dominant_condition": [["Rain", 5], ["Clouds", 2], ["Clear", 1]]}"#;
        let parsed: RollupRow = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.dominant_condition, "Rain");
        assert_eq!(parsed.avg_clouds_pct, Some(10.0));
    }
}
