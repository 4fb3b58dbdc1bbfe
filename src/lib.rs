pub mod api;
pub mod config;
pub mod dashboard;
pub mod error;

pub use api::source::{StaticSource, WeatherDataSource};
pub use api::windflow::ws::{StreamClient, StreamSession};
pub use config::{ReconnectPolicy, StreamConfig};
pub use dashboard::{ConnectionState, Dashboard, DashboardUpdate};
pub use error::WindflowError;
