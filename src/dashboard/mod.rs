pub mod core;
pub mod rollups;
pub mod snapshots;

use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

use crate::api::source::{FetchInterval, ThresholdKind, ThresholdRequest, WeatherDataSource};
use crate::api::windflow::envelope::{self, StreamEvent};
use crate::config::{StreamConfig, DEFAULT_UPDATE_CAPACITY};
use crate::error::WindflowError;
use self::core::alerts::{AlertCondition, AlertDeduplicator, Reconciliation};
use self::rollups::{RollupRow, RollupStore};
use self::snapshots::{CitySnapshot, SnapshotMap, SnapshotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
    Closed,
}

/// Change notifications for the presentation layer.
#[derive(Debug, Clone)]
pub enum DashboardUpdate {
    Snapshots(SnapshotMap),
    Rollups { city: String, series: Vec<RollupRow> },
    Alerts(Reconciliation),
    Connection(ConnectionState),
    FetchInterval(FetchInterval),
}

/// What one inbound frame did to the dashboard.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub applied: usize,
    pub skipped_rows: usize,
    pub unrecognized: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub snapshots: usize,
    pub rollup_cities: usize,
    pub fetch_interval: Option<u32>,
}

/// One session's worth of merged weather state.
///
/// Clones share the same stores; separately constructed dashboards are fully
/// independent.
#[derive(Clone)]
pub struct Dashboard {
    snapshots: Arc<Mutex<SnapshotStore>>,
    rollups: Arc<Mutex<RollupStore>>,
    alerts: Arc<Mutex<AlertDeduplicator>>,
    fetch_interval: Arc<Mutex<Option<FetchInterval>>>,
    connection: Arc<Mutex<ConnectionState>>,
    updates: broadcast::Sender<DashboardUpdate>,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Dashboard {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_UPDATE_CAPACITY)
    }

    /// Sizes the update channel from `config.update_capacity`.
    pub fn from_config(config: &StreamConfig) -> Self {
        Self::with_capacity(config.update_capacity)
    }

    pub fn with_capacity(update_capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(update_capacity.max(1));
        Self {
            snapshots: Arc::new(Mutex::new(SnapshotStore::new())),
            rollups: Arc::new(Mutex::new(RollupStore::new())),
            alerts: Arc::new(Mutex::new(AlertDeduplicator::new())),
            fetch_interval: Arc::new(Mutex::new(None)),
            connection: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardUpdate> {
        self.updates.subscribe()
    }

    fn publish(&self, update: DashboardUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    pub fn snapshots(&self) -> SnapshotMap {
        lock(&self.snapshots).all()
    }

    pub fn snapshot(&self, city: &str) -> Option<CitySnapshot> {
        lock(&self.snapshots).get(city).cloned()
    }

    pub fn rollups(&self, city: &str) -> Vec<RollupRow> {
        lock(&self.rollups).series(city)
    }

    pub fn rollup_cities(&self) -> Vec<String> {
        lock(&self.rollups).cities()
    }

    pub fn active_alerts(&self) -> Vec<String> {
        lock(&self.alerts).active().to_vec()
    }

    pub fn fetch_interval(&self) -> Option<FetchInterval> {
        lock(&self.fetch_interval).clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *lock(&self.connection)
    }

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        {
            let mut current = lock(&self.connection);
            if *current == state {
                return;
            }
            *current = state;
        }
        debug!("Connection state -> {:?}", state);
        self.publish(DashboardUpdate::Connection(state));
    }

    pub fn apply_snapshots(&self, events: Vec<CitySnapshot>) -> bool {
        let changed = lock(&self.snapshots).apply_snapshots(events);
        match changed {
            Some(map) => {
                self.publish(DashboardUpdate::Snapshots(map));
                true
            }
            None => false,
        }
    }

    pub fn apply_rollup_batch(&self, city: &str, rows: Vec<RollupRow>) -> bool {
        let series = {
            let mut store = lock(&self.rollups);
            if !store.apply_rollup_batch(city, rows) {
                return false;
            }
            store.series(city)
        };
        self.publish(DashboardUpdate::Rollups {
            city: city.to_string(),
            series,
        });
        true
    }

    /// Applies a city-keyed rollup mapping, as carried by push events and the
    /// bulk load alike. Returns the cities whose series changed.
    pub fn apply_rollups(&self, by_city: BTreeMap<String, Vec<RollupRow>>) -> Vec<String> {
        let changed: Vec<(String, Vec<RollupRow>)> = {
            let mut store = lock(&self.rollups);
            store
                .seed_from_full_load(by_city)
                .into_iter()
                .map(|city| {
                    let series = store.series(&city);
                    (city, series)
                })
                .collect()
        };

        changed
            .into_iter()
            .map(|(city, series)| {
                self.publish(DashboardUpdate::Rollups {
                    city: city.clone(),
                    series,
                });
                city
            })
            .collect()
    }

    pub fn reconcile_alerts(&self, conditions: &[AlertCondition]) -> Reconciliation {
        let result = lock(&self.alerts).reconcile(conditions);
        for message in &result.to_notify {
            info!("New alert: {}", message);
        }
        self.publish(DashboardUpdate::Alerts(result.clone()));
        result
    }

    /// Decodes one push-channel frame and merges every event it carries.
    pub fn handle_message(&self, raw: &str) -> DispatchReport {
        let decoded = envelope::decode(raw);
        let mut report = DispatchReport {
            skipped_rows: decoded.skipped.len(),
            ..Default::default()
        };

        for event in decoded.events {
            match event {
                StreamEvent::Weather(snapshots) => {
                    self.apply_snapshots(snapshots);
                }
                StreamEvent::Rollup(by_city) => {
                    self.apply_rollups(by_city);
                }
                StreamEvent::Alert(conditions) => {
                    self.reconcile_alerts(&conditions);
                }
                StreamEvent::Unrecognized(_) => {
                    report.unrecognized = true;
                    continue;
                }
            }
            report.applied += 1;
        }
        report
    }

    /// Initial full load through the same merge paths as the push channel.
    pub async fn seed_from_source<S: WeatherDataSource>(
        &self,
        source: &S,
    ) -> Result<SeedReport, WindflowError> {
        let weather = source.get_current_weather().await?;
        let roll_ups = source.get_roll_ups().await?;
        let interval = source.get_weather_fetch_interval().await?;

        let snapshots = weather.len();
        self.apply_snapshots(weather);
        let rollup_cities = self.apply_rollups(roll_ups).len();
        let fetch_interval = Some(interval.every);
        self.store_fetch_interval(interval);

        info!(
            "Seeded dashboard: {} snapshot(s), {} rollup series",
            snapshots, rollup_cities
        );
        Ok(SeedReport {
            snapshots,
            rollup_cities,
            fetch_interval,
        })
    }

    fn store_fetch_interval(&self, interval: FetchInterval) {
        *lock(&self.fetch_interval) = Some(interval.clone());
        self.publish(DashboardUpdate::FetchInterval(interval));
    }

    /// Validates locally, then asks the backend to change its polling
    /// interval. Nothing is sent when `every` is zero.
    pub async fn set_fetch_interval<S: WeatherDataSource>(
        &self,
        source: &S,
        every: u32,
    ) -> Result<FetchInterval, WindflowError> {
        crate::api::source::validate_interval(every)?;
        let interval = source.set_weather_fetch_interval(every).await?;
        self.store_fetch_interval(interval.clone());
        Ok(interval)
    }

    pub async fn submit_thresholds<S: WeatherDataSource>(
        &self,
        source: &S,
        request: &ThresholdRequest,
    ) -> Result<crate::api::source::CityThresholds, WindflowError> {
        request.validate()?;
        source.set_thresholds(request).await
    }

    pub async fn remove_threshold<S: WeatherDataSource>(
        &self,
        source: &S,
        kind: ThresholdKind,
        id: u64,
    ) -> Result<(), WindflowError> {
        source.delete_threshold(kind, id).await
    }
}
