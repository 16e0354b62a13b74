//! Sustained-breach alerting.
//!
//! Rules are data: a predicate over sample fields plus a sustain duration.
//! The engine keeps one `BreachState` per rule and only emits an alert once
//! the predicate has held continuously for the rule's duration.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::MetricSample;
use crate::core::config::Config;

pub const TEMP_SUSTAINED: &str = "temp_sustained";
pub const RAM_SUSTAINED: &str = "ram_sustained";
pub const DISK_HIGH: &str = "disk_high";
pub const UPTIME_EXCEEDED: &str = "uptime_exceeded";
pub const COOLING: &str = "cooling";

const DEFAULT_COOLDOWN_MINUTES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    TempSustained,
    RamSustained,
    DiskHigh,
    UptimeExceeded,
    Cooling,
    Custom(String),
}

/// An individual alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub observed_value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Raised by the orchestrator when the probe keeps failing.
    pub fn probe_failure(consecutive: u32, reason: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: AlertKind::Custom("probe-failure".to_string()),
            severity: Severity::Critical,
            message: format!(
                "Metric collection failed {} times in a row: {}",
                consecutive, reason
            ),
            observed_value: consecutive as f64,
            timestamp,
        }
    }
}

/// Sample fields a predicate can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    CpuPercent,
    CpuTemp,
    RamPercent,
    DiskPercent,
    FanRpm,
    UptimeSeconds,
    ProcessCount,
    BatteryPercent,
}

impl MetricField {
    pub fn read(self, sample: &MetricSample) -> Option<f64> {
        match self {
            MetricField::CpuPercent => Some(sample.cpu_percent as f64),
            MetricField::CpuTemp => sample.temperature().map(f64::from),
            MetricField::RamPercent => Some(sample.ram_percent as f64),
            MetricField::DiskPercent => sample.disk_percent.map(f64::from),
            MetricField::FanRpm => sample.fan().map(f64::from),
            MetricField::UptimeSeconds => sample.uptime_seconds.map(|u| u as f64),
            MetricField::ProcessCount => sample.process_count.map(f64::from),
            MetricField::BatteryPercent => sample.battery_percent.map(f64::from),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Above,
    Below,
}

/// Predicate language interpreted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Compare {
        field: MetricField,
        cmp: Comparison,
        value: f64,
    },
    Any(Vec<Predicate>),
    All(Vec<Predicate>),
    /// True while the named rule is in its sustained (alerting) state.
    Sustained(String),
}

impl Predicate {
    pub fn above(field: MetricField, value: f64) -> Self {
        Predicate::Compare {
            field,
            cmp: Comparison::Above,
            value,
        }
    }

    pub fn below(field: MetricField, value: f64) -> Self {
        Predicate::Compare {
            field,
            cmp: Comparison::Below,
            value,
        }
    }

    /// Returns the observed value that made the predicate true, or `None`
    /// when it does not hold. Absent fields never satisfy a comparison.
    fn evaluate(&self, sample: &MetricSample, states: &HashMap<String, BreachState>) -> Option<f64> {
        match self {
            Predicate::Compare { field, cmp, value } => {
                let observed = field.read(sample)?;
                let holds = match cmp {
                    Comparison::Above => observed > *value,
                    Comparison::Below => observed < *value,
                };
                holds.then_some(observed)
            }
            Predicate::Any(preds) => preds.iter().find_map(|p| p.evaluate(sample, states)),
            Predicate::All(preds) => {
                let mut first = None;
                for p in preds {
                    let observed = p.evaluate(sample, states)?;
                    first.get_or_insert(observed);
                }
                first
            }
            Predicate::Sustained(name) => states
                .get(name)
                .filter(|s| s.sustained)
                .and_then(|s| s.last_observed),
        }
    }
}

/// Raise severity when an observed field crosses a second threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub field: MetricField,
    pub above: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub kind: AlertKind,
    pub predicate: Predicate,
    pub sustain: Duration,
    pub severity: Severity,
    pub cooldown: Duration,
    pub escalation: Option<Escalation>,
    pub advice: Option<String>,
}

impl Rule {
    pub fn new(name: &str, kind: AlertKind, predicate: Predicate, sustain: Duration) -> Self {
        Self {
            name: name.to_string(),
            kind,
            predicate,
            sustain,
            severity: Severity::Warning,
            cooldown: Duration::minutes(DEFAULT_COOLDOWN_MINUTES),
            escalation: None,
            advice: None,
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn escalate(mut self, field: MetricField, above: f64, severity: Severity) -> Self {
        self.escalation = Some(Escalation {
            field,
            above,
            severity,
        });
        self
    }

    pub fn advice(mut self, advice: &str) -> Self {
        self.advice = Some(advice.to_string());
        self
    }

    fn severity_for(&self, sample: &MetricSample) -> Severity {
        match &self.escalation {
            Some(esc) if esc.field.read(sample).is_some_and(|v| v > esc.above) => esc.severity,
            _ => self.severity,
        }
    }

    fn message(&self, observed: f64) -> String {
        let held = if self.sustain.is_zero() {
            String::new()
        } else {
            format!(" for {} min", self.sustain.num_minutes())
        };
        let base = match &self.kind {
            AlertKind::TempSustained => {
                format!("CPU temperature or load high{} (observed {:.1})", held, observed)
            }
            AlertKind::RamSustained => format!("Memory usage high{} ({:.1}%)", held, observed),
            AlertKind::DiskHigh => format!("Disk almost full ({:.1}%)", observed),
            AlertKind::UptimeExceeded => format!(
                "System has been running for {:.0} hours, consider a restart",
                observed / 3600.0
            ),
            AlertKind::Cooling => "Cooling system under strain".to_string(),
            AlertKind::Custom(name) => format!("{}{} (observed {:.1})", name, held, observed),
        };
        match &self.advice {
            Some(advice) => format!("{}, {}", base, advice),
            None => base,
        }
    }
}

/// Per-rule breach tracking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreachState {
    pub first_seen: Option<DateTime<Utc>>,
    pub last_emitted: Option<DateTime<Utc>>,
    pub sustained: bool,
    /// Value that satisfied the predicate on the latest sample.
    pub last_observed: Option<f64>,
}

/// Stateful detector of sustained breaches.
#[derive(Debug, Clone)]
pub struct ThresholdEngine {
    rules: Vec<Rule>,
    states: HashMap<String, BreachState>,
    delay_until: Option<DateTime<Utc>>,
    last_tick: Option<DateTime<Utc>>,
}

impl ThresholdEngine {
    /// Engine with no rules; use `register` to add them.
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            states: HashMap::new(),
            delay_until: None,
            last_tick: None,
        }
    }

    /// Built-in rule set derived from the configured thresholds.
    pub fn from_config(config: &Config) -> Self {
        let mut engine = Self::empty();
        for rule in builtin_rules(config) {
            engine.register(rule);
        }
        engine.set_delay_until(config.global.snooze_until);
        engine
    }

    /// Add a rule. Evaluation order follows registration order; a rule with
    /// an existing name replaces it in place.
    pub fn register(&mut self, rule: Rule) {
        self.states.entry(rule.name.clone()).or_default();
        match self.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn state(&self, rule: &str) -> Option<&BreachState> {
        self.states.get(rule)
    }

    /// Suppress emission until `until`; state tracking continues.
    pub fn set_delay_until(&mut self, until: Option<DateTime<Utc>>) {
        self.delay_until = until;
    }

    pub fn delay_until(&self) -> Option<DateTime<Utc>> {
        self.delay_until
    }

    /// Evaluate every rule against `sample`, using its timestamp as "now".
    ///
    /// Samples older than the last evaluated one are ignored.
    pub fn evaluate(&mut self, sample: &MetricSample) -> Vec<Alert> {
        let now = sample.timestamp;
        if self.last_tick.is_some_and(|last| now < last) {
            log::warn!("Ignoring out-of-order sample at {}", now);
            return Vec::new();
        }
        self.last_tick = Some(now);

        let snoozed = self.delay_until.is_some_and(|until| now < until);
        let mut alerts = Vec::new();

        for rule in &self.rules {
            let observed = rule.predicate.evaluate(sample, &self.states);
            let state = self.states.entry(rule.name.clone()).or_default();

            let Some(observed) = observed else {
                state.first_seen = None;
                state.sustained = false;
                state.last_observed = None;
                continue;
            };
            state.last_observed = Some(observed);

            let first_seen = *state.first_seen.get_or_insert(now);
            if now - first_seen < rule.sustain {
                continue;
            }
            state.sustained = true;

            if snoozed {
                continue;
            }
            let cooling_down = state
                .last_emitted
                .is_some_and(|last| now - last < rule.cooldown);
            if cooling_down {
                continue;
            }

            state.last_emitted = Some(now);
            alerts.push(Alert {
                kind: rule.kind.clone(),
                severity: rule.severity_for(sample),
                message: rule.message(observed),
                observed_value: observed,
                timestamp: now,
            });
        }

        alerts
    }
}

impl Default for ThresholdEngine {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

fn builtin_rules(config: &Config) -> Vec<Rule> {
    let t = &config.thresholds;

    let mut temp = Rule::new(
        TEMP_SUSTAINED,
        AlertKind::TempSustained,
        Predicate::Any(vec![
            Predicate::above(MetricField::CpuTemp, 85.0),
            Predicate::above(MetricField::CpuPercent, t.cpu_warning as f64),
        ]),
        Duration::minutes(30),
    );
    if config.global.elevated_temperature_watch {
        temp = Rule {
            sustain: Duration::minutes(15),
            ..temp
        }
        .advice("check cooling");
    }

    vec![
        temp,
        Rule::new(
            RAM_SUSTAINED,
            AlertKind::RamSustained,
            Predicate::above(MetricField::RamPercent, 90.0),
            Duration::minutes(15),
        ),
        Rule::new(
            DISK_HIGH,
            AlertKind::DiskHigh,
            Predicate::above(MetricField::DiskPercent, t.disk_warning as f64),
            Duration::zero(),
        )
        .escalate(MetricField::DiskPercent, 95.0, Severity::Critical),
        Rule::new(
            UPTIME_EXCEEDED,
            AlertKind::UptimeExceeded,
            Predicate::above(
                MetricField::UptimeSeconds,
                (t.uptime_warning_hours * 3600) as f64,
            ),
            Duration::zero(),
        )
        .severity(Severity::Info),
        Rule::new(
            COOLING,
            AlertKind::Cooling,
            Predicate::Any(vec![
                Predicate::above(MetricField::FanRpm, 4000.0),
                Predicate::Sustained(TEMP_SUSTAINED.to_string()),
            ]),
            Duration::zero(),
        ),
    ]
}
