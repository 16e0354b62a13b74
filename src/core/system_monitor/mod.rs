//! System monitoring core functionality.
//!
//! This module provides the business logic for sampling the host, keeping a
//! bounded history, and turning that history into alerts and predictions.

pub mod alerts;
mod collector;
mod history;
mod metrics;
pub mod temperature;
pub mod trend;

pub use alerts::{Alert, AlertKind, BreachState, MetricField, Predicate, Rule, Severity, ThresholdEngine};
pub use collector::{system_partition, CollectorConfig, Probe, SensorProbe};
pub use history::{RetentionPolicy, SampleStore};
pub use metrics::{MetricSample, PartitionMetrics, ProcessInfo, SensorReading};
pub use trend::{
    health_breakdown, health_index, HealthBreakdown, Prediction, PredictionKind, TrendAnalyzer,
    TrendReport,
};
