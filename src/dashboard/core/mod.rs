pub mod alerts;
pub mod units;
