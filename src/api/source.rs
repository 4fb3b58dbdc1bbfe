//! The bulk-load collaborator and the request types it accepts.
//!
//! The engine only depends on [`WeatherDataSource`]; how an implementation
//! reaches the backend is its own business. [`StaticSource`] keeps everything
//! in memory and can be loaded from a JSON fixture.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::dashboard::rollups::RollupRow;
use crate::dashboard::snapshots::CitySnapshot;
use crate::error::WindflowError;

pub const DEFAULT_CONSECUTIVE_UPDATES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// How often the backend polls the upstream weather API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchInterval {
    pub every: u32,
    #[serde(default = "default_period", alias = "period_unit", alias = "periodUnit")]
    pub period: String,
}

fn default_period() -> String {
    "minutes".to_string()
}

impl FetchInterval {
    pub fn minutes(every: u32) -> Result<Self, WindflowError> {
        validate_interval(every)?;
        Ok(Self {
            every,
            period: default_period(),
        })
    }
}

pub fn validate_interval(every: u32) -> Result<(), WindflowError> {
    if every < 1 {
        return Err(WindflowError::ValidationError(
            "Interval must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: bool,
    #[serde(default)]
    pub last_successful_connection: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    Temperature,
    Humidity,
    WindSpeed,
    Condition,
}

impl fmt::Display for ThresholdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ThresholdKind::Temperature => "temperature",
            ThresholdKind::Humidity => "humidity",
            ThresholdKind::WindSpeed => "wind_speed",
            ThresholdKind::Condition => "condition",
        })
    }
}

impl FromStr for ThresholdKind {
    type Err = WindflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(' ', "_").as_str() {
            "temperature" => Ok(ThresholdKind::Temperature),
            "humidity" => Ok(ThresholdKind::Humidity),
            "wind_speed" | "windspeed" => Ok(ThresholdKind::WindSpeed),
            "condition" => Ok(ThresholdKind::Condition),
            other => Err(WindflowError::ValidationError(format!(
                "unknown threshold type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeThreshold {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub min_threshold: Option<f64>,
    #[serde(default)]
    pub max_threshold: Option<f64>,
    #[serde(default = "default_consecutive_updates")]
    pub consecutive_updates: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionThreshold {
    #[serde(default)]
    pub id: Option<u64>,
    pub condition: String,
    #[serde(default = "default_consecutive_updates")]
    pub consecutive_updates: u32,
}

fn default_consecutive_updates() -> u32 {
    DEFAULT_CONSECUTIVE_UPDATES
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CityThresholds {
    #[serde(default)]
    pub temperature: Vec<RangeThreshold>,
    #[serde(default)]
    pub humidity: Vec<RangeThreshold>,
    #[serde(default)]
    pub wind_speed: Vec<RangeThreshold>,
    #[serde(default)]
    pub condition: Vec<ConditionThreshold>,
}

/// A user's threshold edit for one city. Kinds left `None` are untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRequest {
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<RangeThreshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<RangeThreshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<RangeThreshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionThreshold>,
}

impl ThresholdRequest {
    /// Local sanity checks run before anything is sent to the backend.
    pub fn validate(&self) -> Result<(), WindflowError> {
        if self.city.trim().is_empty() {
            return Err(WindflowError::ValidationError(
                "City name is required".to_string(),
            ));
        }

        let ranges = [
            (ThresholdKind::Temperature, &self.temperature),
            (ThresholdKind::Humidity, &self.humidity),
            (ThresholdKind::WindSpeed, &self.wind_speed),
        ];
        for (kind, range) in ranges {
            let Some(range) = range else { continue };
            validate_range(kind, range)?;
        }

        if let Some(condition) = &self.condition {
            if condition.condition.trim().is_empty() {
                return Err(WindflowError::ValidationError(
                    "condition threshold needs a condition name".to_string(),
                ));
            }
            validate_consecutive(ThresholdKind::Condition, condition.consecutive_updates)?;
        }

        if self.temperature.is_none()
            && self.humidity.is_none()
            && self.wind_speed.is_none()
            && self.condition.is_none()
        {
            return Err(WindflowError::ValidationError(format!(
                "no thresholds given for {}",
                self.city
            )));
        }
        Ok(())
    }
}

fn validate_range(kind: ThresholdKind, range: &RangeThreshold) -> Result<(), WindflowError> {
    match (range.min_threshold, range.max_threshold) {
        (None, None) => {
            return Err(WindflowError::ValidationError(format!(
                "{} threshold needs a minimum or a maximum",
                kind
            )))
        }
        (Some(min), Some(max)) if min >= max => {
            return Err(WindflowError::ValidationError(format!(
                "{} minimum ({}) must be below maximum ({})",
                kind, min, max
            )))
        }
        (min, max) => {
            if [min, max].into_iter().flatten().any(|v| !v.is_finite()) {
                return Err(WindflowError::ValidationError(format!(
                    "{} threshold must be a finite number",
                    kind
                )));
            }
        }
    }
    if kind == ThresholdKind::Humidity {
        let out_of_range = [range.min_threshold, range.max_threshold]
            .into_iter()
            .flatten()
            .any(|v| !(0.0..=100.0).contains(&v));
        if out_of_range {
            return Err(WindflowError::ValidationError(
                "humidity thresholds are percentages between 0 and 100".to_string(),
            ));
        }
    }
    if kind == ThresholdKind::WindSpeed && range.min_threshold.is_some_and(|v| v < 0.0) {
        return Err(WindflowError::ValidationError(
            "wind speed cannot be negative".to_string(),
        ));
    }
    validate_consecutive(kind, range.consecutive_updates)
}

fn validate_consecutive(kind: ThresholdKind, consecutive: u32) -> Result<(), WindflowError> {
    if consecutive < 1 {
        return Err(WindflowError::ValidationError(format!(
            "{} threshold needs at least one consecutive update",
            kind
        )));
    }
    Ok(())
}

/// Bulk-load and settings collaborator.
#[allow(async_fn_in_trait)]
pub trait WeatherDataSource {
    async fn get_current_weather(&self) -> Result<Vec<CitySnapshot>, WindflowError>;

    async fn get_roll_ups(&self) -> Result<BTreeMap<String, Vec<RollupRow>>, WindflowError>;

    async fn get_cities(&self) -> Result<Vec<City>, WindflowError>;

    async fn get_thresholds(&self) -> Result<BTreeMap<String, CityThresholds>, WindflowError>;

    async fn set_thresholds(
        &self,
        request: &ThresholdRequest,
    ) -> Result<CityThresholds, WindflowError>;

    async fn delete_threshold(&self, kind: ThresholdKind, id: u64) -> Result<(), WindflowError>;

    async fn get_weather_fetch_interval(&self) -> Result<FetchInterval, WindflowError>;

    async fn set_weather_fetch_interval(&self, every: u32) -> Result<FetchInterval, WindflowError>;

    async fn check_connection_status(&self) -> Result<ConnectionStatus, WindflowError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SourceState {
    #[serde(default)]
    weather: Vec<CitySnapshot>,
    #[serde(default, alias = "rollups")]
    roll_ups: BTreeMap<String, Vec<RollupRow>>,
    #[serde(default)]
    cities: Vec<City>,
    #[serde(default)]
    thresholds: BTreeMap<String, CityThresholds>,
    #[serde(default = "default_interval")]
    interval: FetchInterval,
    #[serde(default = "default_status")]
    connection: ConnectionStatus,
}

fn default_interval() -> FetchInterval {
    FetchInterval {
        every: 10,
        period: default_period(),
    }
}

fn default_status() -> ConnectionStatus {
    ConnectionStatus {
        status: true,
        last_successful_connection: None,
    }
}

impl Default for SourceState {
    fn default() -> Self {
        Self {
            weather: Vec::new(),
            roll_ups: BTreeMap::new(),
            cities: Vec::new(),
            thresholds: BTreeMap::new(),
            interval: default_interval(),
            connection: default_status(),
        }
    }
}

/// In-memory [`WeatherDataSource`], used for offline seeding and tests.
#[derive(Debug, Default)]
pub struct StaticSource {
    state: Mutex<SourceState>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a fixture with optional `weather`, `roll_ups`, `cities`,
    /// `thresholds`, `interval` and `connection` keys.
    pub fn from_json(raw: &str) -> Result<Self, WindflowError> {
        let state: SourceState = serde_json::from_str(raw)?;
        validate_interval(state.interval.every)?;
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    pub fn with_weather(self, weather: Vec<CitySnapshot>) -> Self {
        self.lock().weather = weather;
        self
    }

    pub fn with_roll_ups(self, roll_ups: BTreeMap<String, Vec<RollupRow>>) -> Self {
        self.lock().roll_ups = roll_ups;
        self
    }

    pub fn with_cities(self, cities: Vec<City>) -> Self {
        self.lock().cities = cities;
        self
    }

    pub fn set_connected(&self, connected: bool) {
        let mut state = self.lock();
        state.connection.status = connected;
        if connected {
            state.connection.last_successful_connection = Some(Utc::now());
        }
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_connected(state: &SourceState) -> Result<(), WindflowError> {
        if state.connection.status {
            Ok(())
        } else {
            Err(WindflowError::SourceError(
                "server is not connected to the weather station".to_string(),
            ))
        }
    }

    fn known_city(state: &SourceState, city: &str) -> Result<(), WindflowError> {
        if state.cities.is_empty() || state.cities.iter().any(|c| c.name == city) {
            Ok(())
        } else {
            Err(WindflowError::SourceError(format!("unknown city '{}'", city)))
        }
    }

    fn next_id(state: &SourceState) -> u64 {
        let ranges = state.thresholds.values().flat_map(|t| {
            t.temperature
                .iter()
                .chain(&t.humidity)
                .chain(&t.wind_speed)
                .filter_map(|r| r.id)
        });
        let conditions = state
            .thresholds
            .values()
            .flat_map(|t| t.condition.iter().filter_map(|c| c.id));
        ranges.chain(conditions).max().unwrap_or(0) + 1
    }
}

trait Identified {
    fn id_mut(&mut self) -> &mut Option<u64>;
}

impl Identified for RangeThreshold {
    fn id_mut(&mut self) -> &mut Option<u64> {
        &mut self.id
    }
}

impl Identified for ConditionThreshold {
    fn id_mut(&mut self) -> &mut Option<u64> {
        &mut self.id
    }
}

/// Replaces the entry for a city, keeping its id, the way the backend's
/// update-or-create does.
fn upsert<T: Identified>(slot: &mut Vec<T>, mut incoming: T, next_id: &mut u64) {
    match slot.first_mut() {
        Some(existing) => {
            *incoming.id_mut() = *existing.id_mut();
            *existing = incoming;
        }
        None => {
            *incoming.id_mut() = Some(*next_id);
            *next_id += 1;
            slot.push(incoming);
        }
    }
}

impl WeatherDataSource for StaticSource {
    async fn get_current_weather(&self) -> Result<Vec<CitySnapshot>, WindflowError> {
        let state = self.lock();
        Self::ensure_connected(&state)?;
        Ok(state.weather.clone())
    }

    async fn get_roll_ups(&self) -> Result<BTreeMap<String, Vec<RollupRow>>, WindflowError> {
        Ok(self.lock().roll_ups.clone())
    }

    async fn get_cities(&self) -> Result<Vec<City>, WindflowError> {
        Ok(self.lock().cities.clone())
    }

    async fn get_thresholds(&self) -> Result<BTreeMap<String, CityThresholds>, WindflowError> {
        Ok(self.lock().thresholds.clone())
    }

    async fn set_thresholds(
        &self,
        request: &ThresholdRequest,
    ) -> Result<CityThresholds, WindflowError> {
        let mut state = self.lock();
        Self::known_city(&state, &request.city)?;
        let mut next_id = Self::next_id(&state);

        let entry = state.thresholds.entry(request.city.clone()).or_default();
        if let Some(condition) = &request.condition {
            upsert(&mut entry.condition, condition.clone(), &mut next_id);
        }
        if let Some(range) = &request.temperature {
            upsert(&mut entry.temperature, range.clone(), &mut next_id);
        }
        if let Some(range) = &request.humidity {
            upsert(&mut entry.humidity, range.clone(), &mut next_id);
        }
        if let Some(range) = &request.wind_speed {
            upsert(&mut entry.wind_speed, range.clone(), &mut next_id);
        }
        Ok(entry.clone())
    }

    async fn delete_threshold(&self, kind: ThresholdKind, id: u64) -> Result<(), WindflowError> {
        let mut state = self.lock();
        let mut removed = false;
        for thresholds in state.thresholds.values_mut() {
            let hit = match kind {
                ThresholdKind::Temperature => retain_other(&mut thresholds.temperature, id),
                ThresholdKind::Humidity => retain_other(&mut thresholds.humidity, id),
                ThresholdKind::WindSpeed => retain_other(&mut thresholds.wind_speed, id),
                ThresholdKind::Condition => {
                    let len = thresholds.condition.len();
                    thresholds.condition.retain(|c| c.id != Some(id));
                    len != thresholds.condition.len()
                }
            };
            removed |= hit;
        }
        if removed {
            Ok(())
        } else {
            Err(WindflowError::SourceError(format!(
                "no {} threshold with id {}",
                kind, id
            )))
        }
    }

    async fn get_weather_fetch_interval(&self) -> Result<FetchInterval, WindflowError> {
        Ok(self.lock().interval.clone())
    }

    async fn set_weather_fetch_interval(&self, every: u32) -> Result<FetchInterval, WindflowError> {
        let interval = FetchInterval::minutes(every)?;
        self.lock().interval = interval.clone();
        Ok(interval)
    }

    async fn check_connection_status(&self) -> Result<ConnectionStatus, WindflowError> {
        Ok(self.lock().connection.clone())
    }
}

fn retain_other(slot: &mut Vec<RangeThreshold>, id: u64) -> bool {
    let len = slot.len();
    slot.retain(|r| r.id != Some(id));
    len != slot.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: Option<f64>, max: Option<f64>) -> RangeThreshold {
        RangeThreshold {
            id: None,
            min_threshold: min,
            max_threshold: max,
            consecutive_updates: DEFAULT_CONSECUTIVE_UPDATES,
        }
    }

    fn request(city: &str) -> ThresholdRequest {
        ThresholdRequest {
            city: city.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn rejects_inverted_or_empty_ranges() {
        let mut req = request("Lagos");
        req.temperature = Some(range(Some(30.0), Some(20.0)));
        assert!(matches!(req.validate(), Err(WindflowError::ValidationError(_))));

        req.temperature = Some(range(Some(20.0), Some(20.0)));
        assert!(req.validate().is_err());

        req.temperature = Some(range(None, None));
        assert!(req.validate().is_err());

        req.temperature = Some(range(Some(10.0), Some(35.0)));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_domain_values() {
        let mut req = request("Lagos");
        req.humidity = Some(range(None, Some(120.0)));
        assert!(req.validate().is_err());

        let mut req = request("Lagos");
        req.wind_speed = Some(range(Some(-1.0), None));
        assert!(req.validate().is_err());

        let mut req = request("Lagos");
        req.temperature = Some(RangeThreshold {
            consecutive_updates: 0,
            ..range(None, Some(40.0))
        });
        assert!(req.validate().is_err());

        let mut req = request("Lagos");
        req.temperature = Some(range(Some(f64::NAN), None));
        assert!(req.validate().is_err());
    }

    #[test]
    fn requires_city_and_at_least_one_threshold() {
        assert!(request("").validate().is_err());
        assert!(request("Lagos").validate().is_err());

        let mut req = request("Lagos");
        req.condition = Some(ConditionThreshold {
            id: None,
            condition: "  ".to_string(),
            consecutive_updates: 3,
        });
        assert!(req.validate().is_err());
    }

    #[test]
    fn interval_must_be_positive() {
        assert!(FetchInterval::minutes(0).is_err());
        let interval = FetchInterval::minutes(15).unwrap();
        assert_eq!(interval.every, 15);
        assert_eq!(interval.period, "minutes");
    }

    #[test]
    fn parses_threshold_kinds() {
        assert_eq!("Wind Speed".parse::<ThresholdKind>().unwrap(), ThresholdKind::WindSpeed);
        assert_eq!("condition".parse::<ThresholdKind>().unwrap(), ThresholdKind::Condition);
        assert!("pressure".parse::<ThresholdKind>().is_err());
    }

    #[tokio::test]
    async fn static_source_upserts_and_deletes_thresholds() {
        let source = StaticSource::new();
        let mut req = request("Lagos");
        req.temperature = Some(range(Some(15.0), Some(35.0)));
        let saved = source.set_thresholds(&req).await.unwrap();
        let id = saved.temperature[0].id.unwrap();

        req.temperature = Some(range(Some(18.0), Some(33.0)));
        let saved = source.set_thresholds(&req).await.unwrap();
        assert_eq!(saved.temperature.len(), 1);
        assert_eq!(saved.temperature[0].id, Some(id));
        assert_eq!(saved.temperature[0].max_threshold, Some(33.0));

        source
            .delete_threshold(ThresholdKind::Temperature, id)
            .await
            .unwrap();
        assert!(source.get_thresholds().await.unwrap()["Lagos"]
            .temperature
            .is_empty());
        assert!(source
            .delete_threshold(ThresholdKind::Temperature, id)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn every_new_threshold_gets_its_own_id() {
        let source = StaticSource::new();
        let mut req = request("Lagos");
        req.condition = Some(ConditionThreshold {
            id: None,
            condition: "Rain".to_string(),
            consecutive_updates: 2,
        });
        req.temperature = Some(range(None, Some(35.0)));
        req.wind_speed = Some(range(Some(0.0), Some(12.0)));
        let saved = source.set_thresholds(&req).await.unwrap();

        let mut ids = vec![
            saved.condition[0].id.unwrap(),
            saved.temperature[0].id.unwrap(),
            saved.wind_speed[0].id.unwrap(),
        ];
        let mut other = request("Accra");
        other.humidity = Some(range(Some(20.0), Some(90.0)));
        ids.push(source.set_thresholds(&other).await.unwrap().humidity[0].id.unwrap());

        let mut unique = ids.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), ids.len(), "ids collided: {:?}", ids);

        // Updating the condition keeps its id
        req.condition.as_mut().unwrap().condition = "Clouds".to_string();
        let saved_again = source.set_thresholds(&req).await.unwrap();
        assert_eq!(saved_again.condition.len(), 1);
        assert_eq!(saved_again.condition[0].id, Some(ids[0]));
        assert_eq!(saved_again.condition[0].condition, "Clouds");
    }

    #[test]
    fn fixture_with_zero_interval_is_rejected() {
        assert!(matches!(
            StaticSource::from_json(r#"{"interval": {"every": 0}}"#),
            Err(WindflowError::ValidationError(_))
        ));
        assert!(StaticSource::from_json(r#"{"interval": {"every": 1}}"#).is_ok());
    }

    #[tokio::test]
    async fn disconnected_source_refuses_current_weather() {
        let source = StaticSource::from_json(r#"{"interval": {"every": 5}}"#).unwrap();
        assert_eq!(source.get_weather_fetch_interval().await.unwrap().every, 5);

        source.set_connected(false);
        assert!(matches!(
            source.get_current_weather().await,
            Err(WindflowError::SourceError(_))
        ));
        source.set_connected(true);
        assert!(source
            .check_connection_status()
            .await
            .unwrap()
            .last_successful_connection
            .is_some());
    }
}
