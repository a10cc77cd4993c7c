//! SQLite hot store.
//!
//! One database file holds the point registry of every site, raw samples,
//! compressed partitions and the archive ledger.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE points (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     site_name TEXT NOT NULL, name TEXT NOT NULL,
//!     unit TEXT, data_type TEXT NOT NULL DEFAULT 'analog',
//!     building TEXT, system TEXT, equipment TEXT,
//!     is_critical INTEGER NOT NULL DEFAULT 0, sample_rate_sec INTEGER,
//!     created_at INTEGER NOT NULL, updated_at INTEGER NOT NULL,
//!     UNIQUE (site_name, name)
//! );
//! CREATE TABLE timeseries (
//!     timestamp INTEGER NOT NULL, point_id INTEGER NOT NULL,
//!     value REAL NOT NULL, quality INTEGER NOT NULL DEFAULT 192, flags INTEGER NOT NULL DEFAULT 0,
//!     PRIMARY KEY (point_id, timestamp)
//! ) WITHOUT ROWID;
//! CREATE INDEX idx_timeseries_time_point ON timeseries(timestamp, point_id);
//! ```
//!
//! `WITHOUT ROWID` clusters samples on `(point_id, timestamp)`, so a point's
//! range scan and its latest sample are both single seeks. The secondary index
//! serves "all points at time T".
//!
//! Samples carry no site column; a point id belongs to exactly one site.
//! `archive_dirty` records day buckets written at or below a site's
//! watermark so the archive job can re-export them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use tracing::{debug, info, warn};

use crate::codec::{self, ChunkRow};
use crate::error::{Result, StoreError};
use crate::traits::{ArchiveLedger, HotStore, PointRegistry};
use crate::types::{
    ArchiveCompletion, ArchiveState, ArchiveStatus, DataType, DirtyRange, NamedSample,
    PartitionInfo, Point, PointId, QualitySummary, Resolution, Sample, SampleFlags, SweepOutcome,
    TimeRange, QUALITY_GOOD,
};

/// Maximum number of bound names per `IN (...)` lookup.
const NAME_LOOKUP_CHUNK: usize = 500;

/// Width of an `archive_dirty` bucket.
const DIRTY_BUCKET_MILLIS: i64 = 86_400_000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS points (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_name TEXT NOT NULL,
    name TEXT NOT NULL,
    unit TEXT,
    data_type TEXT NOT NULL DEFAULT 'analog',
    building TEXT,
    system TEXT,
    equipment TEXT,
    is_critical INTEGER NOT NULL DEFAULT 0,
    sample_rate_sec INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (site_name, name)
);
CREATE TABLE IF NOT EXISTS timeseries (
    timestamp INTEGER NOT NULL,
    point_id INTEGER NOT NULL REFERENCES points(id),
    value REAL NOT NULL,
    quality INTEGER NOT NULL DEFAULT 192,
    flags INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (point_id, timestamp)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_timeseries_time_point ON timeseries(timestamp, point_id);
CREATE TABLE IF NOT EXISTS compressed_partitions (
    partition_start INTEGER PRIMARY KEY,
    partition_end INTEGER NOT NULL,
    row_count INTEGER NOT NULL,
    raw_bytes INTEGER NOT NULL,
    compressed_bytes INTEGER NOT NULL,
    compressed_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS compressed_chunks (
    point_id INTEGER NOT NULL REFERENCES points(id),
    partition_start INTEGER NOT NULL REFERENCES compressed_partitions(partition_start),
    row_count INTEGER NOT NULL,
    min_timestamp INTEGER NOT NULL,
    max_timestamp INTEGER NOT NULL,
    payload BLOB NOT NULL,
    PRIMARY KEY (point_id, partition_start)
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS archive_state (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_name TEXT NOT NULL,
    last_archived_timestamp INTEGER NOT NULL,
    records_archived INTEGER NOT NULL DEFAULT 0,
    archive_path TEXT,
    parquet_file_size INTEGER,
    compression_ratio REAL,
    archived_at INTEGER NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_archive_state_site ON archive_state(site_name, status);
CREATE TABLE IF NOT EXISTS archive_dirty (
    site_name TEXT NOT NULL,
    bucket_start INTEGER NOT NULL,
    bucket_end INTEGER NOT NULL,
    version INTEGER NOT NULL,
    PRIMARY KEY (site_name, bucket_start)
) WITHOUT ROWID;
";

/// SQLite-backed point registry, hot store and archive ledger.
///
/// Thread-safe via an internal mutex (a SQLite `Connection` is not `Sync`).
/// Several `SqliteStore`s may open the same file; SQLite's own locking and
/// the `(point_id, timestamp)` primary key keep them consistent.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened hot store");
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

fn row_to_named(row: &Row<'_>) -> rusqlite::Result<NamedSample> {
    Ok(NamedSample {
        point_name: row.get(0)?,
        timestamp: row.get(1)?,
        value: row.get(2)?,
        quality: row.get(3)?,
        flags: SampleFlags(row.get(4)?),
    })
}

fn row_to_point(row: &Row<'_>) -> rusqlite::Result<Point> {
    let data_type: String = row.get(4)?;
    Ok(Point {
        id: row.get(0)?,
        site_name: row.get(1)?,
        name: row.get(2)?,
        unit: row.get(3)?,
        data_type: data_type.parse::<DataType>().map_err(|e| conversion_error(4, e))?,
        building: row.get(5)?,
        system: row.get(6)?,
        equipment: row.get(7)?,
        is_critical: row.get(8)?,
        sample_rate_sec: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn row_to_archive_state(row: &Row<'_>) -> rusqlite::Result<ArchiveState> {
    let status: String = row.get(8)?;
    Ok(ArchiveState {
        id: row.get(0)?,
        site_name: row.get(1)?,
        last_archived_timestamp: row.get(2)?,
        records_archived: row.get::<_, i64>(3)? as u64,
        archive_path: row.get(4)?,
        parquet_file_size: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
        compression_ratio: row.get(6)?,
        archived_at: row.get(7)?,
        status: status.parse::<ArchiveStatus>().map_err(|e| conversion_error(8, e))?,
        error_message: row.get(9)?,
    })
}

fn row_to_partition(row: &Row<'_>) -> rusqlite::Result<PartitionInfo> {
    Ok(PartitionInfo {
        range: TimeRange {
            start: row.get(0)?,
            end: row.get(1)?,
        },
        row_count: row.get::<_, i64>(2)? as u64,
        raw_bytes: row.get::<_, i64>(3)? as u64,
        compressed_bytes: row.get::<_, i64>(4)? as u64,
        compressed_at: row.get(5)?,
    })
}

/// Fails if any sample falls inside a compressed partition.
fn ensure_mutable(tx: &Transaction<'_>, samples: &[Sample]) -> Result<()> {
    let mut stmt =
        tx.prepare_cached("SELECT partition_start, partition_end FROM compressed_partitions")?;
    let partitions = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if partitions.is_empty() {
        return Ok(());
    }
    for sample in samples {
        if let Some((start, _)) = partitions
            .iter()
            .find(|(start, end)| sample.timestamp >= *start && sample.timestamp < *end)
        {
            return Err(StoreError::ImmutablePartition {
                partition_start: *start,
            });
        }
    }
    Ok(())
}

/// Marks the day bucket of every sample at or below its site's watermark.
///
/// Runs inside the write transaction, so a rolled-back batch marks nothing.
fn mark_dirty(tx: &Transaction<'_>, samples: &[Sample]) -> Result<usize> {
    let mut watermarks: HashMap<PointId, Option<(String, i64)>> = HashMap::new();
    let mut buckets: BTreeSet<(String, i64)> = BTreeSet::new();
    {
        let mut site_of = tx.prepare_cached("SELECT site_name FROM points WHERE id = ?1")?;
        for s in samples {
            if !watermarks.contains_key(&s.point_id) {
                let site: Option<String> = site_of
                    .query_row([s.point_id], |row| row.get(0))
                    .optional()?;
                let entry = match site {
                    Some(site) => current_watermark(tx, &site)?.map(|wm| (site, wm)),
                    None => None,
                };
                watermarks.insert(s.point_id, entry);
            }
            if let Some(Some((site, watermark))) = watermarks.get(&s.point_id) {
                if s.timestamp <= *watermark {
                    buckets.insert((site.clone(), s.timestamp.div_euclid(DIRTY_BUCKET_MILLIS)));
                }
            }
        }
    }
    if buckets.is_empty() {
        return Ok(0);
    }

    let mut stmt = tx.prepare_cached(
        "INSERT INTO archive_dirty (site_name, bucket_start, bucket_end, version)
         VALUES (?1, ?2, ?3, 1)
         ON CONFLICT(site_name, bucket_start) DO UPDATE SET version = version + 1",
    )?;
    for (site, bucket) in &buckets {
        let start = bucket * DIRTY_BUCKET_MILLIS;
        stmt.execute(params![site, start, start + DIRTY_BUCKET_MILLIS])?;
    }
    debug!(buckets = buckets.len(), "marked archived buckets dirty");
    Ok(buckets.len())
}

/// Reads raw and compressed samples of `site` in `range`, optionally
/// restricted to `names`.
fn collect_range(
    conn: &Connection,
    site: &str,
    names: Option<&[String]>,
    range: TimeRange,
) -> Result<Vec<NamedSample>> {
    if range.is_empty() {
        return Ok(Vec::new());
    }

    let mut name_clause = "p.site_name = ? AND ".to_string();
    let mut bound: Vec<Value> = vec![Value::Text(site.to_string())];
    if let Some(names) = names {
        name_clause.push_str(&format!("p.name IN ({}) AND ", placeholders(names.len())));
        bound.extend(names.iter().map(|n| Value::Text(n.clone())));
    }

    let raw_sql = format!(
        "SELECT p.name, t.timestamp, t.value, t.quality, t.flags
         FROM timeseries t JOIN points p ON p.id = t.point_id
         WHERE {name_clause}t.timestamp >= ? AND t.timestamp < ?"
    );
    let mut raw_params = bound.clone();
    raw_params.push(Value::Integer(range.start));
    raw_params.push(Value::Integer(range.end));

    let mut stmt = conn.prepare(&raw_sql)?;
    let mut samples = stmt
        .query_map(params_from_iter(raw_params.iter()), row_to_named)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let chunk_sql = format!(
        "SELECT p.name, c.payload
         FROM compressed_chunks c JOIN points p ON p.id = c.point_id
         WHERE {name_clause}c.min_timestamp < ? AND c.max_timestamp >= ?"
    );
    let mut chunk_params = bound;
    chunk_params.push(Value::Integer(range.end));
    chunk_params.push(Value::Integer(range.start));

    let mut stmt = conn.prepare(&chunk_sql)?;
    let chunks = stmt
        .query_map(params_from_iter(chunk_params.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (name, payload) in chunks {
        samples.extend(
            codec::decode(&payload)?
                .into_iter()
                .filter(|r| range.contains(r.timestamp))
                .map(|r| NamedSample {
                    point_name: name.clone(),
                    timestamp: r.timestamp,
                    value: r.value,
                    quality: r.quality,
                    flags: r.flags,
                }),
        );
    }

    samples.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.point_name.cmp(&b.point_name))
    });
    Ok(samples)
}

fn find_ids(conn: &Connection, site: &str, names: &[String]) -> Result<HashMap<String, PointId>> {
    let mut found = HashMap::with_capacity(names.len());
    for chunk in names.chunks(NAME_LOOKUP_CHUNK) {
        let sql = format!(
            "SELECT name, id FROM points WHERE site_name = ? AND name IN ({})",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let bound = std::iter::once(site).chain(chunk.iter().map(String::as_str));
        let rows = stmt.query_map(params_from_iter(bound), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, PointId>(1)?))
        })?;
        for row in rows {
            let (name, id) = row?;
            found.insert(name, id);
        }
    }
    Ok(found)
}

fn create_point(conn: &Connection, site: &str, name: &str, now: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO points (site_name, name, data_type, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(site_name, name) DO NOTHING",
        params![site, name, DataType::default().as_str(), now],
    )
}

fn validate_name(site: &str, name: &str) -> Result<()> {
    if site.trim().is_empty() {
        return Err(StoreError::InvalidPointName("site name cannot be empty".to_string()));
    }
    if name.trim().is_empty() {
        return Err(StoreError::InvalidPointName("point name cannot be empty".to_string()));
    }
    Ok(())
}

impl PointRegistry for SqliteStore {
    fn resolve(&self, site: &str, name: &str) -> Result<PointId> {
        validate_name(site, name)?;
        let conn = self.conn.lock();
        let lookup = |conn: &Connection| -> Result<Option<PointId>> {
            Ok(conn
                .query_row(
                    "SELECT id FROM points WHERE site_name = ?1 AND name = ?2",
                    [site, name],
                    |row| row.get(0),
                )
                .optional()?)
        };

        if let Some(id) = lookup(&conn)? {
            return Ok(id);
        }
        // A racing writer may create the name between lookup and insert; the
        // insert is then a no-op and the re-fetch returns its id.
        create_point(&conn, site, name, Self::now_millis())?;
        lookup(&conn)?.ok_or_else(|| {
            StoreError::Unavailable(format!("point {site}/{name} missing after insert"))
        })
    }

    fn bulk_resolve(&self, site: &str, names: &[String]) -> Result<Resolution> {
        if site.trim().is_empty() {
            return Err(StoreError::InvalidPointName("site name cannot be empty".to_string()));
        }
        let unique: Vec<String> = names
            .iter()
            .filter(|n| !n.trim().is_empty())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(Resolution::default());
        }

        let mut conn = self.conn.lock();
        let mut resolved = find_ids(&conn, site, &unique)?;
        let missing: Vec<String> = unique
            .into_iter()
            .filter(|n| !resolved.contains_key(n))
            .collect();
        if missing.is_empty() {
            return Ok(Resolution {
                ids: resolved,
                created: 0,
            });
        }

        let now = Self::now_millis();
        let tx = conn.transaction()?;
        let mut created = 0usize;
        for name in &missing {
            match create_point(&tx, site, name, now) {
                Ok(n) => created += n,
                Err(e) => warn!(point = %name, error = %e, "failed to create point"),
            }
        }
        tx.commit()?;

        resolved.extend(find_ids(&conn, site, &missing)?);
        debug!(
            site,
            requested = names.len(),
            created,
            resolved = resolved.len(),
            "bulk resolved points"
        );
        Ok(Resolution {
            ids: resolved,
            created,
        })
    }

    fn point(&self, site: &str, name: &str) -> Result<Option<Point>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT id, site_name, name, unit, data_type, building, system, equipment,
                        is_critical, sample_rate_sec, created_at, updated_at
                 FROM points WHERE site_name = ?1 AND name = ?2",
                [site, name],
                row_to_point,
            )
            .optional()?)
    }

    fn point_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM points", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl HotStore for SqliteStore {
    fn insert_samples(&self, samples: &[Sample]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        ensure_mutable(&tx, samples)?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO timeseries (timestamp, point_id, value, quality, flags)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for s in samples {
                match stmt.execute(params![s.timestamp, s.point_id, s.value, s.quality, s.flags.bits()]) {
                    Ok(_) => {}
                    Err(e) if is_unique_violation(&e) => {
                        return Err(StoreError::Conflict(format!(
                            "point {} at {}",
                            s.point_id, s.timestamp
                        )));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        mark_dirty(&tx, samples)?;
        tx.commit()?;
        Ok(samples.len())
    }

    fn upsert_samples(&self, samples: &[Sample]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        ensure_mutable(&tx, samples)?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO timeseries (timestamp, point_id, value, quality, flags)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(point_id, timestamp) DO UPDATE SET
                     value = excluded.value,
                     quality = excluded.quality,
                     flags = excluded.flags",
            )?;
            for s in samples {
                stmt.execute(params![s.timestamp, s.point_id, s.value, s.quality, s.flags.bits()])?;
            }
        }
        mark_dirty(&tx, samples)?;
        tx.commit()?;
        Ok(samples.len())
    }

    fn query_range(&self, site: &str, names: &[String], range: TimeRange) -> Result<Vec<NamedSample>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let mut out = Vec::new();
        for chunk in names.chunks(NAME_LOOKUP_CHUNK) {
            out.extend(collect_range(&conn, site, Some(chunk), range)?);
        }
        if names.len() > NAME_LOOKUP_CHUNK {
            out.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.point_name.cmp(&b.point_name))
            });
        }
        Ok(out)
    }

    fn scan_range(&self, site: &str, range: TimeRange) -> Result<Vec<NamedSample>> {
        let conn = self.conn.lock();
        collect_range(&conn, site, None, range)
    }

    fn latest(&self, site: &str, names: &[String]) -> Result<Vec<NamedSample>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let mut latest: BTreeMap<String, NamedSample> = BTreeMap::new();

        for chunk in names.chunks(NAME_LOOKUP_CHUNK) {
            let in_clause = placeholders(chunk.len());
            let bound: Vec<&str> = std::iter::once(site)
                .chain(chunk.iter().map(String::as_str))
                .collect();

            let raw_sql = format!(
                "SELECT p.name, t.timestamp, t.value, t.quality, t.flags
                 FROM points p JOIN timeseries t ON t.point_id = p.id
                 WHERE p.site_name = ? AND p.name IN ({in_clause})
                   AND t.timestamp = (SELECT MAX(timestamp) FROM timeseries WHERE point_id = p.id)"
            );
            let mut stmt = conn.prepare(&raw_sql)?;
            for row in stmt.query_map(params_from_iter(bound.iter()), row_to_named)? {
                let sample = row?;
                latest.insert(sample.point_name.clone(), sample);
            }

            let chunk_sql = format!(
                "SELECT p.name, c.payload
                 FROM points p JOIN compressed_chunks c ON c.point_id = p.id
                 WHERE p.site_name = ? AND p.name IN ({in_clause})
                   AND c.max_timestamp = (SELECT MAX(max_timestamp) FROM compressed_chunks WHERE point_id = p.id)"
            );
            let mut stmt = conn.prepare(&chunk_sql)?;
            let chunks = stmt
                .query_map(params_from_iter(bound.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (name, payload) in chunks {
                // Chunks decode newest first.
                let Some(newest) = codec::decode(&payload)?.into_iter().next() else {
                    continue;
                };
                let newer = latest
                    .get(&name)
                    .is_none_or(|current| current.timestamp < newest.timestamp);
                if newer {
                    latest.insert(
                        name.clone(),
                        NamedSample {
                            point_name: name,
                            timestamp: newest.timestamp,
                            value: newest.value,
                            quality: newest.quality,
                            flags: newest.flags,
                        },
                    );
                }
            }
        }

        Ok(latest.into_values().collect())
    }

    fn quality_summary(
        &self,
        site: &str,
        names: &[String],
        range: TimeRange,
    ) -> Result<Vec<QualitySummary>> {
        let samples = self.query_range(site, names, range)?;
        let mut by_point: BTreeMap<&str, QualitySummary> = BTreeMap::new();
        for s in &samples {
            let entry = by_point
                .entry(s.point_name.as_str())
                .or_insert_with(|| QualitySummary {
                    point_name: s.point_name.clone(),
                    sample_count: 0,
                    good_count: 0,
                    flagged_count: 0,
                    min: f64::INFINITY,
                    max: f64::NEG_INFINITY,
                    avg: 0.0,
                });
            entry.sample_count += 1;
            if s.quality == QUALITY_GOOD {
                entry.good_count += 1;
            }
            if !s.flags.is_empty() {
                entry.flagged_count += 1;
            }
            entry.min = entry.min.min(s.value);
            entry.max = entry.max.max(s.value);
            // Running mean; avoids overflow on long ranges.
            entry.avg += (s.value - entry.avg) / entry.sample_count as f64;
        }
        Ok(by_point.into_values().collect())
    }

    fn earliest_timestamp(&self, site: Option<&str>) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let raw: Option<i64> = conn.query_row(
            "SELECT MIN(t.timestamp) FROM timeseries t JOIN points p ON p.id = t.point_id
             WHERE ?1 IS NULL OR p.site_name = ?1",
            [site],
            |row| row.get(0),
        )?;
        let compressed: Option<i64> = conn.query_row(
            "SELECT MIN(c.min_timestamp) FROM compressed_chunks c JOIN points p ON p.id = c.point_id
             WHERE ?1 IS NULL OR p.site_name = ?1",
            [site],
            |row| row.get(0),
        )?;
        Ok(match (raw, compressed) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        })
    }

    fn sample_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let raw: i64 = conn.query_row("SELECT COUNT(*) FROM timeseries", [], |row| row.get(0))?;
        let compressed: i64 = conn.query_row(
            "SELECT COALESCE(SUM(row_count), 0) FROM compressed_partitions",
            [],
            |row| row.get(0),
        )?;
        Ok((raw + compressed) as u64)
    }

    fn delete_before(&self, cutoff: i64) -> Result<SweepOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let rows_deleted = tx.execute("DELETE FROM timeseries WHERE timestamp < ?1", [cutoff])?;
        tx.execute(
            "DELETE FROM compressed_chunks WHERE partition_start IN
                 (SELECT partition_start FROM compressed_partitions WHERE partition_end <= ?1)",
            [cutoff],
        )?;
        let partitions_deleted = tx.execute(
            "DELETE FROM compressed_partitions WHERE partition_end <= ?1",
            [cutoff],
        )?;
        tx.commit()?;

        Ok(SweepOutcome {
            cutoff,
            rows_deleted: rows_deleted as u64,
            partitions_deleted: partitions_deleted as u64,
        })
    }

    fn raw_partitions_before(&self, cutoff: i64, width_millis: i64) -> Result<Vec<TimeRange>> {
        if width_millis <= 0 {
            return Err(StoreError::InvalidTimeRange {
                start: 0,
                end: width_millis,
            });
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT timestamp / ?1 AS bucket FROM timeseries
             WHERE timestamp < ?2 AND timestamp >= 0
             ORDER BY bucket",
        )?;
        let buckets = stmt
            .query_map(params![width_millis, cutoff], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(buckets
            .into_iter()
            .map(|b| TimeRange {
                start: b * width_millis,
                end: (b + 1) * width_millis,
            })
            .filter(|r| r.end <= cutoff)
            .collect())
    }

    fn compress_partition(&self, partition: TimeRange) -> Result<Option<PartitionInfo>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let overlapping: Option<i64> = tx
            .query_row(
                "SELECT partition_start FROM compressed_partitions
                 WHERE partition_start < ?1 AND partition_end > ?2",
                params![partition.end, partition.start],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(partition_start) = overlapping {
            return Err(StoreError::ImmutablePartition { partition_start });
        }

        let mut by_point: BTreeMap<PointId, Vec<ChunkRow>> = BTreeMap::new();
        {
            let mut stmt = tx.prepare(
                "SELECT point_id, timestamp, value, quality, flags FROM timeseries
                 WHERE timestamp >= ?1 AND timestamp < ?2",
            )?;
            let rows = stmt.query_map(params![partition.start, partition.end], |row| {
                Ok((
                    row.get::<_, PointId>(0)?,
                    ChunkRow {
                        timestamp: row.get(1)?,
                        value: row.get(2)?,
                        quality: row.get(3)?,
                        flags: SampleFlags(row.get(4)?),
                    },
                ))
            })?;
            for row in rows {
                let (point_id, chunk_row) = row?;
                by_point.entry(point_id).or_default().push(chunk_row);
            }
        }
        if by_point.is_empty() {
            return Ok(None);
        }

        let compressed_at = Self::now_millis();
        let mut row_count = 0u64;
        let mut raw_bytes = 0u64;
        let mut compressed_bytes = 0u64;
        {
            let mut insert = tx.prepare(
                "INSERT INTO compressed_chunks
                     (point_id, partition_start, row_count, min_timestamp, max_timestamp, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (point_id, rows) in &by_point {
                let min_ts = rows.iter().map(|r| r.timestamp).min().unwrap_or(partition.start);
                let max_ts = rows.iter().map(|r| r.timestamp).max().unwrap_or(partition.start);
                let encoded = codec::encode(rows)?;
                insert.execute(params![
                    point_id,
                    partition.start,
                    rows.len() as i64,
                    min_ts,
                    max_ts,
                    encoded.payload,
                ])?;
                row_count += rows.len() as u64;
                raw_bytes += encoded.raw_bytes as u64;
                compressed_bytes += encoded.payload.len() as u64;
            }
        }

        tx.execute(
            "INSERT INTO compressed_partitions
                 (partition_start, partition_end, row_count, raw_bytes, compressed_bytes, compressed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                partition.start,
                partition.end,
                row_count as i64,
                raw_bytes as i64,
                compressed_bytes as i64,
                compressed_at
            ],
        )?;
        tx.execute(
            "DELETE FROM timeseries WHERE timestamp >= ?1 AND timestamp < ?2",
            params![partition.start, partition.end],
        )?;
        tx.commit()?;

        let info = PartitionInfo {
            range: partition,
            row_count,
            raw_bytes,
            compressed_bytes,
            compressed_at,
        };
        info!(
            partition = %partition,
            rows = row_count,
            points = by_point.len(),
            ratio = info.compression_ratio(),
            "compressed partition"
        );
        Ok(Some(info))
    }

    fn compressed_partitions(&self) -> Result<Vec<PartitionInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT partition_start, partition_end, row_count, raw_bytes, compressed_bytes, compressed_at
             FROM compressed_partitions ORDER BY partition_start",
        )?;
        let partitions = stmt
            .query_map([], row_to_partition)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(partitions)
    }
}

fn current_watermark(conn: &Connection, site: &str) -> Result<Option<i64>> {
    Ok(conn.query_row(
        "SELECT MAX(last_archived_timestamp) FROM archive_state
         WHERE site_name = ?1 AND status = 'completed'",
        [site],
        |row| row.get(0),
    )?)
}

impl ArchiveLedger for SqliteStore {
    fn begin_run(&self, site: &str, archived_at: i64) -> Result<i64> {
        let conn = self.conn.lock();
        let watermark = current_watermark(&conn, site)?.unwrap_or(0);
        conn.execute(
            "INSERT INTO archive_state (site_name, last_archived_timestamp, records_archived, archived_at, status)
             VALUES (?1, ?2, 0, ?3, ?4)",
            params![site, watermark, archived_at, ArchiveStatus::InProgress.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn complete_run(&self, id: i64, completion: &ArchiveCompletion, archived_at: i64) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE archive_state SET
                 last_archived_timestamp = ?1,
                 records_archived = ?2,
                 archive_path = ?3,
                 parquet_file_size = ?4,
                 compression_ratio = ?5,
                 archived_at = ?6,
                 status = ?7,
                 error_message = NULL
             WHERE id = ?8",
            params![
                completion.watermark,
                completion.records as i64,
                completion.archive_path,
                completion.file_size as i64,
                completion.compression_ratio,
                archived_at,
                ArchiveStatus::Completed.as_str(),
                id
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::RunNotFound(id));
        }
        Ok(())
    }

    fn fail_run(&self, id: i64, error: &str, archived_at: i64) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE archive_state SET status = ?1, error_message = ?2, archived_at = ?3 WHERE id = ?4",
            params![ArchiveStatus::Failed.as_str(), error, archived_at, id],
        )?;
        if updated == 0 {
            return Err(StoreError::RunNotFound(id));
        }
        Ok(())
    }

    fn watermark(&self, site: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        current_watermark(&conn, site)
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<ArchiveState>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, site_name, last_archived_timestamp, records_archived, archive_path, parquet_file_size,
                    compression_ratio, archived_at, status, error_message
             FROM archive_state ORDER BY id DESC LIMIT ?1",
        )?;
        let runs = stmt
            .query_map([limit as i64], row_to_archive_state)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn dirty_ranges(&self, site: &str) -> Result<Vec<DirtyRange>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT bucket_start, bucket_end, version FROM archive_dirty
             WHERE site_name = ?1 ORDER BY bucket_start",
        )?;
        let dirty = stmt
            .query_map([site], |row| {
                Ok(DirtyRange {
                    range: TimeRange {
                        start: row.get(0)?,
                        end: row.get(1)?,
                    },
                    version: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(dirty)
    }

    fn clear_dirty(&self, site: &str, dirty: &DirtyRange) -> Result<bool> {
        let conn = self.conn.lock();
        let cleared = conn.execute(
            "DELETE FROM archive_dirty WHERE site_name = ?1 AND bucket_start = ?2 AND version = ?3",
            params![site, dirty.range.start, dirty.version],
        )?;
        Ok(cleared > 0)
    }
}
