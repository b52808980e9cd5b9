//! SQLite storage for sensor rows and frame metadata.
//!
//! Every subject gets its own append-only table, `sensor_logs_subject_<id>`,
//! created on first reference:
//!
//! ```text
//! id              INTEGER PRIMARY KEY AUTOINCREMENT
//! timestamp       TEXT NOT NULL       RFC 3339, always with a +00:00 offset
//! subject_id      INTEGER NOT NULL
//! accelerometer   TEXT                JSON array of three floats, or NULL
//! gyroscope       TEXT                  "
//! orientation     TEXT                  "
//! gravity         TEXT                  "
//! phone_placement TEXT
//! activity        TEXT
//! ```
//!
//! Frame metadata goes to a single `camera_frames` table. Each worker opens
//! its own [Connection]; the database runs in WAL mode so the writer and the
//! capture loop do not block each other.

use crate::payload::ChannelValue;
use crate::record::{FrameRecord, SensorRecord};
use crate::subject::SubjectId;
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::{borrow::Cow, collections::HashSet, fmt, path::Path, time::Duration};

/// Name of the frame-metadata table.
pub const FRAME_TABLE: &str = "camera_frames";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The table holding `subject`'s sensor rows.
pub fn subject_table(subject: SubjectId) -> String {
    format!("sensor_logs_subject_{subject}")
}

/// Everything that can go wrong talking to the database.
#[derive(Debug)]
pub enum StoreError {
    /// Returned by SQLite itself.
    Sqlite(rusqlite::Error),
    /// Returned when a channel value cannot be encoded or decoded.
    Json(serde_json::Error),
    /// Returned when a stored timestamp does not parse.
    Timestamp(chrono::ParseError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            StoreError::Sqlite(error) => Cow::from(format!("sqlite error: {error}")),
            StoreError::Json(error) => Cow::from(format!("json error: {error}")),
            StoreError::Timestamp(error) => Cow::from(format!("bad stored timestamp: {error}")),
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<chrono::ParseError> for StoreError {
    fn from(value: chrono::ParseError) -> Self {
        Self::Timestamp(value)
    }
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    debug!("Opened {} (journal_mode={mode})", path.display());
    Ok(conn)
}

fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, false)
}

fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn encode_channel(value: &Option<ChannelValue>) -> Result<Option<String>, StoreError> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(StoreError::from)
}

fn decode_channel(raw: Option<String>) -> Result<Option<Value>, StoreError> {
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(StoreError::from)
}

/// A sensor row as read back from a subject table.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct StoredSensorRow {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub subject_id: u32,
    pub accelerometer: Option<Value>,
    pub gyroscope: Option<Value>,
    pub orientation: Option<Value>,
    pub gravity: Option<Value>,
    pub phone_placement: String,
    pub activity: String,
}

/// Per-subject sensor tables, with a cache of the tables already ensured
/// through this connection.
pub struct SensorStore {
    conn: Connection,
    known_tables: HashSet<SubjectId>,
}

impl SensorStore {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            conn: open_connection(path.as_ref())?,
            known_tables: HashSet::new(),
        })
    }

    /// Creates `subject`'s table if it does not exist yet and returns its
    /// name. Safe to call any number of times.
    pub fn ensure_subject_table(&mut self, subject: SubjectId) -> Result<String, StoreError> {
        let table = subject_table(subject);
        if self.known_tables.contains(&subject) {
            return Ok(table);
        }

        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                subject_id INTEGER NOT NULL,
                accelerometer TEXT,
                gyroscope TEXT,
                orientation TEXT,
                gravity TEXT,
                phone_placement TEXT,
                activity TEXT
            );"
        ))?;
        self.known_tables.insert(subject);
        debug!("Ensured table {table}");
        Ok(table)
    }

    /// Drops `subject` from the ensured-table cache, so the next reference
    /// checks the schema again.
    pub fn forget(&mut self, subject: SubjectId) {
        self.known_tables.remove(&subject);
    }

    /// Appends `records` to `subject`'s table in a single transaction.
    /// Either every row lands or none does.
    pub fn insert_records(
        &mut self,
        subject: SubjectId,
        records: &[SensorRecord],
    ) -> Result<usize, StoreError> {
        let table = self.ensure_subject_table(subject)?;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO \"{table}\" (
                    timestamp, subject_id,
                    accelerometer, gyroscope,
                    orientation, gravity,
                    phone_placement, activity
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ))?;
            for record in records {
                stmt.execute(params![
                    encode_timestamp(&record.timestamp),
                    record.subject_id.get(),
                    encode_channel(&record.channels.accelerometer)?,
                    encode_channel(&record.channels.gyroscope)?,
                    encode_channel(&record.channels.orientation)?,
                    encode_channel(&record.channels.gravity)?,
                    record.placement.as_str(),
                    record.activity.as_str(),
                ])?;
            }
        }
        // Dropping an uncommitted transaction rolls it back.
        tx.commit()?;
        Ok(records.len())
    }

    /// Every row of `subject`'s table in insertion order. Empty if the
    /// table does not exist.
    pub fn subject_rows(&self, subject: SubjectId) -> Result<Vec<StoredSensorRow>, StoreError> {
        let table = subject_table(subject);
        if !self.table_exists(&table)? {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, timestamp, subject_id, accelerometer, gyroscope,
                    orientation, gravity, phone_placement, activity
             FROM \"{table}\" ORDER BY id ASC"
        ))?;
        let raw_rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                [
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ],
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?;

        raw_rows
            .map(|raw| -> Result<StoredSensorRow, StoreError> {
                let (id, ts, subject_id, [acc, gyro, ori, grav], placement, activity) = raw?;
                Ok(StoredSensorRow {
                    id,
                    timestamp: decode_timestamp(&ts)?,
                    subject_id,
                    accelerometer: decode_channel(acc)?,
                    gyroscope: decode_channel(gyro)?,
                    orientation: decode_channel(ori)?,
                    gravity: decode_channel(grav)?,
                    phone_placement: placement.unwrap_or_default(),
                    activity: activity.unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Names of all subject tables present in the database.
    pub fn subject_tables(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name LIKE 'sensor_logs_subject_%'
             ORDER BY name",
        )?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
        names.collect::<Result<_, _>>().map_err(StoreError::from)
    }

    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

/// Somewhere to put one metadata row per captured frame.
pub trait FrameLogger {
    /// Creates the metadata table if needed.
    fn ensure_table(&mut self) -> Result<(), StoreError>;
    /// Appends a single frame row.
    fn log_frame(&mut self, frame: &FrameRecord) -> Result<(), StoreError>;
}

/// The SQLite-backed [FrameLogger].
pub struct FrameLog {
    conn: Connection,
}

impl FrameLog {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            conn: open_connection(path.as_ref())?,
        })
    }

    /// `(frame_number, timestamp)` of every frame logged for `filename`,
    /// in insertion order.
    pub fn frames(&self, filename: &str) -> Result<Vec<(u64, DateTime<Utc>)>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT frame_number, timestamp FROM {FRAME_TABLE}
             WHERE filename = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![filename], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        rows.map(|row| -> Result<(u64, DateTime<Utc>), StoreError> {
            let (n, ts) = row?;
            Ok((n as u64, decode_timestamp(&ts)?))
        })
        .collect()
    }
}

impl FrameLogger for FrameLog {
    fn ensure_table(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {FRAME_TABLE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT,
                frame_number INTEGER,
                timestamp TEXT
            );"
        ))?;
        Ok(())
    }

    fn log_frame(&mut self, frame: &FrameRecord) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO {FRAME_TABLE} (filename, frame_number, timestamp) VALUES (?1, ?2, ?3)"
        ))?;
        stmt.execute(params![
            frame.filename,
            frame.frame_number as i64,
            encode_timestamp(&frame.timestamp),
        ])?;
        Ok(())
    }
}
