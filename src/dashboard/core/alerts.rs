use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// The weather metric an alert condition was raised for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Metric {
    Temperature,
    Humidity,
    WindSpeed,
    Condition,
    Other(String),
}

impl Metric {
    pub fn label(&self) -> &str {
        match self {
            Metric::Temperature => "Temperature",
            Metric::Humidity => "Humidity",
            Metric::WindSpeed => "Wind Speed",
            Metric::Condition => "Condition",
            Metric::Other(raw) => raw,
        }
    }

    /// Fixed display unit. Alert text is never unit-converted.
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            Metric::Temperature => Some("°C"),
            Metric::Humidity => Some("%"),
            Metric::WindSpeed => Some("m/s"),
            Metric::Condition | Metric::Other(_) => None,
        }
    }
}

impl From<String> for Metric {
    fn from(raw: String) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "temperature" | "temp" => Metric::Temperature,
            "humidity" => Metric::Humidity,
            "windspeed" => Metric::WindSpeed,
            "condition" => Metric::Condition,
            _ => Metric::Other(raw),
        }
    }
}

impl From<Metric> for String {
    fn from(metric: Metric) -> Self {
        metric.label().to_string()
    }
}

/// Which side of the threshold the readings sat on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BreachDirection {
    Above,
    Below,
    Sustained,
    Other(String),
}

impl From<String> for BreachDirection {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "above" | "maximum" | "max" => BreachDirection::Above,
            "below" | "minimum" | "min" => BreachDirection::Below,
            "sustained" => BreachDirection::Sustained,
            _ => BreachDirection::Other(raw),
        }
    }
}

impl From<BreachDirection> for String {
    fn from(breach: BreachDirection) -> Self {
        match breach {
            BreachDirection::Above => "above".to_string(),
            BreachDirection::Below => "below".to_string(),
            BreachDirection::Sustained => "sustained".to_string(),
            BreachDirection::Other(raw) => raw,
        }
    }
}

impl fmt::Display for BreachDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreachDirection::Above => f.write_str("above"),
            BreachDirection::Below => f.write_str("below"),
            BreachDirection::Sustained => f.write_str("sustained at"),
            BreachDirection::Other(raw) => f.write_str(&raw.to_lowercase()),
        }
    }
}

/// Numeric limit for range metrics, a label for condition thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdValue {
    Number(f64),
    Label(String),
}

impl fmt::Display for ThresholdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdValue::Number(value) => write!(f, "{}", value),
            ThresholdValue::Label(label) => f.write_str(label),
        }
    }
}

/// A raw breach report as sent by the backend threshold checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    #[serde(rename = "type", alias = "metric")]
    pub metric: Metric,
    pub city: String,
    #[serde(default, alias = "breachDirection", alias = "breach_direction")]
    pub breach: Option<BreachDirection>,
    #[serde(alias = "thresholdValue", alias = "threshold_value")]
    pub threshold: ThresholdValue,
    #[serde(alias = "consecutiveUpdates")]
    pub consecutive_updates: u32,
    #[serde(
        default,
        rename = "difference",
        alias = "observed_difference",
        alias = "observedDifference",
        skip_serializing_if = "Option::is_none"
    )]
    pub observed_difference: Option<f64>,
}

/// Renders the canonical message for a condition. The same condition always
/// yields the same string, which is what deduplication keys on.
pub fn format_alert(condition: &AlertCondition) -> String {
    let city = &condition.city;
    let readings = condition.consecutive_updates;

    match &condition.metric {
        Metric::Condition => format!(
            "Condition in {} has remained '{}' for the last {} readings.",
            city, condition.threshold, readings
        ),
        Metric::Other(_) => {
            let breach = condition
                .breach
                .as_ref()
                .map(|b| b.to_string())
                .unwrap_or_else(|| "reached".to_string());
            format!(
                "Alert for {}: {} threshold of {}.",
                city, breach, condition.threshold
            )
        }
        metric => {
            let unit = metric.unit().unwrap_or_default();
            let breach = condition
                .breach
                .as_ref()
                .map(|b| b.to_string())
                .unwrap_or_else(|| "beyond".to_string());
            let by = condition
                .observed_difference
                .map(|d| format!(" by {:.2}{}", d.abs(), unit))
                .unwrap_or_default();
            format!(
                "{} in {} has been {} the threshold of {}{}{} for the last {} readings.",
                metric.label(),
                city,
                breach,
                condition.threshold,
                unit,
                by,
                readings
            )
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Messages not shown in the previous batch; these alone should toast.
    pub to_notify: Vec<String>,
    /// Every message in effect after this batch.
    pub active_now: Vec<String>,
}

/// Tracks which alert messages the user has already been shown.
#[derive(Debug, Default)]
pub struct AlertDeduplicator {
    active: Vec<String>,
}

impl AlertDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active set with this batch and reports what is new.
    ///
    /// Conditions missing from the batch are dropped from the active set
    /// without any notification.
    pub fn reconcile(&mut self, conditions: &[AlertCondition]) -> Reconciliation {
        let mut seen = HashSet::new();
        let active_now: Vec<String> = conditions
            .iter()
            .map(format_alert)
            .filter(|message| seen.insert(message.clone()))
            .collect();

        let previous: HashSet<&String> = self.active.iter().collect();
        let to_notify: Vec<String> = active_now
            .iter()
            .filter(|message| !previous.contains(message))
            .cloned()
            .collect();

        self.active = active_now.clone();

        Reconciliation {
            to_notify,
            active_now,
        }
    }

    pub fn active(&self) -> &[String] {
        &self.active
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}
