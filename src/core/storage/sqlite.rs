use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::migrations::run_migrations;
use super::StateBackend;
use crate::core::repair::{RepairFailure, RepairRecord, RepairSubject};
use crate::core::scheduler::{MaintenanceTask, Priority, TaskCategory, TaskError, TaskStatus};
use crate::core::system_monitor::{MetricSample, PartitionMetrics, SensorReading};
use crate::error::Result;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// SQLite-backed state. One connection guarded by a mutex.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn utc_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn unknown_value(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown {} '{}'", what, value).into(),
    )
}

fn utc_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn opt_utc_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn local_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<MetricSample> {
    let cpu_temp: Option<f32> = row.get(2)?;
    let cpu_temp_synth: Option<bool> = row.get(3)?;
    let fan_rpm: Option<i64> = row.get(11)?;
    let fan_synth: Option<bool> = row.get(12)?;
    let partitions_json: String = row.get(20)?;
    let per_partition: Vec<PartitionMetrics> =
        serde_json::from_str(&partitions_json).map_err(|e| conversion_error(20, e))?;

    Ok(MetricSample {
        timestamp: utc_from_row(row, 1)?,
        cpu_temp_c: cpu_temp.map(|value| SensorReading {
            value,
            synthesized: cpu_temp_synth.unwrap_or(false),
        }),
        cpu_percent: row.get(4)?,
        ram_percent: row.get(5)?,
        ram_used_bytes: row.get::<_, i64>(6)? as u64,
        ram_total_bytes: row.get::<_, i64>(7)? as u64,
        disk_percent: row.get(8)?,
        disk_free_bytes: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
        disk_total_bytes: row.get::<_, Option<i64>>(10)?.map(|v| v as u64),
        fan_rpm: fan_rpm.map(|v| SensorReading {
            value: v as u32,
            synthesized: fan_synth.unwrap_or(false),
        }),
        net_bytes_sent: row.get::<_, Option<i64>>(13)?.map(|v| v as u64),
        net_bytes_recv: row.get::<_, Option<i64>>(14)?.map(|v| v as u64),
        battery_percent: row.get(15)?,
        battery_plugged: row.get(16)?,
        process_count: row.get::<_, Option<i64>>(17)?.map(|v| v as u32),
        boot_time: opt_utc_from_row(row, 18)?,
        uptime_seconds: row.get::<_, Option<i64>>(19)?.map(|v| v as u64),
        per_partition,
    })
}

fn repair_from_row(row: &Row<'_>) -> rusqlite::Result<RepairRecord> {
    let subject_json: String = row.get(4)?;
    let subject: RepairSubject = serde_json::from_str(&subject_json).map_err(|e| conversion_error(4, e))?;
    let result: String = row.get(5)?;
    let failure = match result.as_str() {
        "ok" => None,
        other => Some(RepairFailure::parse(other).ok_or_else(|| unknown_value(5, "repair result", other))?),
    };
    Ok(RepairRecord {
        timestamp: utc_from_row(row, 0)?,
        message: row.get(1)?,
        action: row.get(2)?,
        success: row.get(3)?,
        subject,
        failure,
        duration: Duration::from_millis(row.get::<_, i64>(6)?.max(0) as u64),
        bytes_freed: row.get::<_, i64>(7)?.max(0) as u64,
        processes_affected: row.get::<_, i64>(8)?.max(0) as u32,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<MaintenanceTask> {
    let date: String = row.get(3)?;
    let time: String = row.get(4)?;
    let date = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| conversion_error(3, e))?;
    let time = NaiveTime::parse_from_str(&time, TIME_FORMAT).map_err(|e| conversion_error(4, e))?;

    let priority: String = row.get(5)?;
    let category: String = row.get(6)?;
    let status: String = row.get(9)?;

    Ok(MaintenanceTask {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        scheduled_at: date.and_time(time),
        priority: Priority::parse(&priority).ok_or_else(|| unknown_value(5, "priority", &priority))?,
        category: TaskCategory::parse(&category).ok_or_else(|| unknown_value(6, "category", &category))?,
        auto_generated: row.get(7)?,
        completed_at: local_from_row(row, 8)?,
        status: TaskStatus::parse(&status).ok_or_else(|| unknown_value(9, "status", &status))?,
        attempts: row.get::<_, i64>(10)?.max(0) as u32,
    })
}

impl StateBackend for SqliteBackend {
    fn append_sample(&self, s: &MetricSample) -> Result<()> {
        let partitions = serde_json::to_string(&s.per_partition)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO system_samples (timestamp, cpu_temp, cpu_temp_synthesized, cpu_percent, \
             ram_percent, ram_used, ram_total, disk_percent, disk_free, disk_total, fan_rpm, \
             fan_synthesized, net_sent, net_recv, battery_percent, battery_plugged, process_count, \
             boot_time, uptime_seconds, partitions) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            params![
                utc_to_sql(&s.timestamp),
                s.cpu_temp_c.map(|r| r.value),
                s.cpu_temp_c.map(|r| r.synthesized),
                s.cpu_percent,
                s.ram_percent,
                s.ram_used_bytes as i64,
                s.ram_total_bytes as i64,
                s.disk_percent,
                s.disk_free_bytes.map(|v| v as i64),
                s.disk_total_bytes.map(|v| v as i64),
                s.fan_rpm.map(|r| r.value as i64),
                s.fan_rpm.map(|r| r.synthesized),
                s.net_bytes_sent.map(|v| v as i64),
                s.net_bytes_recv.map(|v| v as i64),
                s.battery_percent,
                s.battery_plugged,
                s.process_count.map(|v| v as i64),
                s.boot_time.as_ref().map(utc_to_sql),
                s.uptime_seconds.map(|v| v as i64),
                partitions,
            ],
        )?;
        Ok(())
    }

    fn load_samples(&self, limit: usize) -> Result<Vec<MetricSample>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM (SELECT id, timestamp, cpu_temp, cpu_temp_synthesized, cpu_percent, \
             ram_percent, ram_used, ram_total, disk_percent, disk_free, disk_total, fan_rpm, \
             fan_synthesized, net_sent, net_recv, battery_percent, battery_plugged, process_count, \
             boot_time, uptime_seconds, partitions \
             FROM system_samples ORDER BY timestamp DESC, id DESC LIMIT ?1) \
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![limit as i64], sample_from_row)?;
        let samples = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    fn trim_samples(&self, older_than: DateTime<Utc>, keep_min: usize) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM system_samples WHERE timestamp < ?1 AND id NOT IN \
             (SELECT id FROM system_samples ORDER BY timestamp DESC, id DESC LIMIT ?2)",
            params![utc_to_sql(&older_than), keep_min as i64],
        )?;
        Ok(removed)
    }

    fn append_repair(&self, record: &RepairRecord) -> Result<()> {
        let subject = serde_json::to_string(&record.subject)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO repair_history (timestamp, issue_kind, description, action, success, \
             result, subject, duration_ms, bytes_freed, processes_affected) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                utc_to_sql(&record.timestamp),
                record.subject.label(),
                record.message,
                record.action,
                record.success,
                record.reason().unwrap_or("ok"),
                subject,
                record.duration.as_millis() as i64,
                record.bytes_freed as i64,
                record.processes_affected as i64,
            ],
        )?;
        Ok(())
    }

    fn load_repairs(&self, limit: usize) -> Result<Vec<RepairRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, description, action, success, subject, result, duration_ms, \
             bytes_freed, processes_affected FROM \
             (SELECT * FROM repair_history ORDER BY id DESC LIMIT ?1) ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![limit as i64], repair_from_row)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn save_task(&self, task: &MaintenanceTask) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO scheduled_tasks (id, title, description, scheduled_date, \
             scheduled_time, priority, category, completed, auto_generated, completed_at, status, attempts) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                task.id,
                task.title,
                task.description,
                task.scheduled_at.format(DATE_FORMAT).to_string(),
                task.scheduled_at.format(TIME_FORMAT).to_string(),
                task.priority.as_str(),
                task.category.as_str(),
                task.status == TaskStatus::Completed,
                task.auto_generated,
                task.completed_at.map(|t| t.format(DATETIME_FORMAT).to_string()),
                task.status.as_str(),
                task.attempts as i64,
            ],
        )?;
        Ok(())
    }

    fn delete_task(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![id])?;
        conn.execute("DELETE FROM task_errors WHERE task_id = ?1", params![id])?;
        Ok(())
    }

    fn load_tasks(&self) -> Result<Vec<MaintenanceTask>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, description, scheduled_date, scheduled_time, priority, category, \
             auto_generated, completed_at, status, attempts FROM scheduled_tasks \
             ORDER BY scheduled_date, scheduled_time, id",
        )?;
        let rows = stmt.query_map([], task_from_row)?;
        let tasks = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn append_task_error(&self, error: &TaskError) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO task_errors (task_id, occurred_at, attempt, message) VALUES (?1, ?2, ?3, ?4)",
            params![
                error.task_id,
                error.occurred_at.format(DATETIME_FORMAT).to_string(),
                error.attempt as i64,
                error.message,
            ],
        )?;
        Ok(())
    }

    fn load_task_errors(&self, task_id: Option<i64>) -> Result<Vec<TaskError>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT task_id, occurred_at, attempt, message FROM task_errors \
             WHERE ?1 IS NULL OR task_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            Ok(TaskError {
                task_id: row.get(0)?,
                occurred_at: local_from_row(row, 1)?.ok_or_else(|| unknown_value(1, "timestamp", "NULL"))?,
                attempt: row.get::<_, i64>(2)?.max(0) as u32,
                message: row.get(3)?,
            })
        })?;
        let errors = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(errors)
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn settings(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let settings = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(settings)
    }
}
