//! Cold storage of archived samples.
//!
//! A segment holds every sample of one site inside one contiguous time range.
//! [`ParquetColdStore`] keeps segments as zstd-compressed Parquet files at
//! `{root}/{site}/{start}_{end}.parquet`; [`MemoryColdStore`] keeps them in a
//! map for tests.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray, UInt8Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use tracing::{debug, info, warn};
use vitals_store::{NamedSample, SampleFlags, TimeRange};

use crate::error::{ArchiveError, Result};

const ZSTD_LEVEL: i32 = 3;
const SEGMENT_EXT: &str = "parquet";

/// Bytes per sample before compression, excluding the point name.
const FIXED_ROW_BYTES: u64 = 8 + 8 + 1 + 1;

/// Metadata of one cold segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentInfo {
    /// Range `[start, end)` the segment covers.
    pub range: TimeRange,
    /// Location of the segment.
    pub path: String,
    /// Number of samples.
    pub rows: u64,
    /// Stored size in bytes.
    pub file_size: u64,
    /// Estimated uncompressed size in bytes.
    pub raw_bytes: u64,
}

impl SegmentInfo {
    /// Returns the raw-to-stored size ratio.
    #[must_use]
    pub fn compression_ratio(&self) -> f64 {
        if self.file_size == 0 {
            return 0.0;
        }
        self.raw_bytes as f64 / self.file_size as f64
    }
}

/// Samples read from cold storage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColdRead {
    /// Matching samples, ordered by timestamp then point name.
    pub samples: Vec<NamedSample>,
    /// Segments that were opened.
    pub file_count: usize,
}

/// Append-only storage of archived segments.
pub trait ColdStore: Send + Sync {
    /// Writes `samples` as the segment covering `range`.
    ///
    /// Writing the same range again replaces the segment, so a retried run
    /// converges on the same content.
    fn write_segment(&self, site: &str, range: TimeRange, samples: &[NamedSample]) -> Result<SegmentInfo>;

    /// Reads samples of `names` within `range`.
    fn read_range(&self, site: &str, names: &[String], range: TimeRange) -> Result<ColdRead>;

    /// Lists a site's segments, oldest first.
    fn segments(&self, site: &str) -> Result<Vec<SegmentInfo>>;

    /// Reads every sample of the segment keyed by exactly `range`.
    ///
    /// Returns an empty list if no such segment exists.
    fn read_segment(&self, site: &str, range: TimeRange) -> Result<Vec<NamedSample>>;
}

fn raw_size(samples: &[NamedSample]) -> u64 {
    samples
        .iter()
        .map(|s| FIXED_ROW_BYTES + s.point_name.len() as u64)
        .sum()
}

fn sort_samples(samples: &mut [NamedSample]) {
    samples.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.point_name.cmp(&b.point_name))
    });
}

fn validate_site(site: &str) -> Result<()> {
    let ok = !site.is_empty()
        && site != "."
        && site != ".."
        && !site.contains(['/', '\\'])
        && !site.contains('\0');
    if ok {
        Ok(())
    } else {
        Err(ArchiveError::InvalidSegment(format!("unusable site name: {site:?}")))
    }
}

/// Parses `{start}_{end}.parquet`.
fn parse_segment_name(name: &str) -> Option<TimeRange> {
    let stem = name.strip_suffix(".parquet")?;
    let (start, end) = stem.split_once('_')?;
    TimeRange::new(start.parse().ok()?, end.parse().ok()?).ok()
}

fn segment_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("point_name", DataType::Utf8, false),
        Field::new("timestamp", DataType::Int64, false),
        Field::new("value", DataType::Float64, false),
        Field::new("quality", DataType::UInt8, false),
        Field::new("flags", DataType::UInt8, false),
    ]))
}

fn to_record_batch(samples: &[NamedSample]) -> Result<RecordBatch> {
    let names = StringArray::from(samples.iter().map(|s| s.point_name.as_str()).collect::<Vec<_>>());
    let timestamps = Int64Array::from(samples.iter().map(|s| s.timestamp).collect::<Vec<_>>());
    let values = Float64Array::from(samples.iter().map(|s| s.value).collect::<Vec<_>>());
    let quality = UInt8Array::from(samples.iter().map(|s| s.quality).collect::<Vec<_>>());
    let flags = UInt8Array::from(samples.iter().map(|s| s.flags.bits()).collect::<Vec<_>>());

    let columns: Vec<ArrayRef> = vec![
        Arc::new(names),
        Arc::new(timestamps),
        Arc::new(values),
        Arc::new(quality),
        Arc::new(flags),
    ];
    Ok(RecordBatch::try_new(segment_schema(), columns)?)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<T>())
        .ok_or_else(|| ArchiveError::InvalidSegment(format!("invalid {name} column")))
}

fn from_record_batch(batch: &RecordBatch) -> Result<Vec<NamedSample>> {
    let names = column::<StringArray>(batch, "point_name")?;
    let timestamps = column::<Int64Array>(batch, "timestamp")?;
    let values = column::<Float64Array>(batch, "value")?;
    let quality = column::<UInt8Array>(batch, "quality")?;
    let flags = column::<UInt8Array>(batch, "flags")?;

    Ok((0..batch.num_rows())
        .map(|i| NamedSample {
            point_name: names.value(i).to_string(),
            timestamp: timestamps.value(i),
            value: values.value(i),
            quality: quality.value(i),
            flags: SampleFlags(flags.value(i)),
        })
        .collect())
}

/// Parquet segments on the local filesystem.
#[derive(Debug, Clone)]
pub struct ParquetColdStore {
    root: PathBuf,
}

impl ParquetColdStore {
    /// Creates a store rooted at `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn site_dir(&self, site: &str) -> Result<PathBuf> {
        validate_site(site)?;
        Ok(self.root.join(site))
    }

    fn segment_path(&self, site: &str, range: TimeRange) -> Result<PathBuf> {
        Ok(self
            .site_dir(site)?
            .join(format!("{}_{}.{SEGMENT_EXT}", range.start, range.end)))
    }

    fn read_file(path: &Path) -> Result<Vec<NamedSample>> {
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        let mut samples = Vec::new();
        for batch in reader {
            samples.extend(from_record_batch(&batch?)?);
        }
        Ok(samples)
    }

    fn list(&self, site: &str) -> Result<Vec<(TimeRange, PathBuf)>> {
        let dir = self.site_dir(site)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut segments = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(range) = parse_segment_name(name) {
                segments.push((range, entry.path()));
            }
        }
        segments.sort_by_key(|(range, _)| (range.start, range.end));
        Ok(segments)
    }
}

impl ColdStore for ParquetColdStore {
    fn write_segment(&self, site: &str, range: TimeRange, samples: &[NamedSample]) -> Result<SegmentInfo> {
        let path = self.segment_path(site, range)?;
        let dir = self.site_dir(site)?;
        fs::create_dir_all(&dir)?;

        let tmp = dir.join(format!(".{}_{}.{SEGMENT_EXT}.tmp", range.start, range.end));
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::try_new(ZSTD_LEVEL)?))
            .build();
        let batch = to_record_batch(samples)?;

        let write = || -> Result<()> {
            let file = File::create(&tmp)?;
            let mut writer = ArrowWriter::try_new(file, segment_schema(), Some(props))?;
            writer.write(&batch)?;
            writer.close()?;
            Ok(())
        };
        if let Err(err) = write() {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                debug!(path = %tmp.display(), error = %cleanup, "no temporary segment to clean up");
            }
            return Err(err);
        }
        fs::rename(&tmp, &path)?;

        let info = SegmentInfo {
            range,
            path: path.display().to_string(),
            rows: samples.len() as u64,
            file_size: fs::metadata(&path)?.len(),
            raw_bytes: raw_size(samples),
        };
        info!(
            site,
            range = %range,
            rows = info.rows,
            bytes = info.file_size,
            ratio = info.compression_ratio(),
            "wrote cold segment"
        );
        Ok(info)
    }

    fn read_range(&self, site: &str, names: &[String], range: TimeRange) -> Result<ColdRead> {
        let mut read = ColdRead::default();
        if names.is_empty() || range.is_empty() {
            return Ok(read);
        }
        for (segment, path) in self.list(site)? {
            if !segment.overlaps(&range) {
                continue;
            }
            read.file_count += 1;
            read.samples.extend(
                Self::read_file(&path)?
                    .into_iter()
                    .filter(|s| range.contains(s.timestamp) && names.contains(&s.point_name)),
            );
        }
        sort_samples(&mut read.samples);
        debug!(site, range = %range, files = read.file_count, rows = read.samples.len(), "cold read");
        Ok(read)
    }

    fn segments(&self, site: &str) -> Result<Vec<SegmentInfo>> {
        let mut infos = Vec::new();
        for (range, path) in self.list(site)? {
            let file = File::open(&path)?;
            let builder = match ParquetRecordBatchReaderBuilder::try_new(file) {
                Ok(builder) => builder,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable segment");
                    continue;
                }
            };
            let rows = builder.metadata().file_metadata().num_rows().max(0) as u64;
            infos.push(SegmentInfo {
                range,
                path: path.display().to_string(),
                rows,
                file_size: fs::metadata(&path)?.len(),
                raw_bytes: 0,
            });
        }
        Ok(infos)
    }

    fn read_segment(&self, site: &str, range: TimeRange) -> Result<Vec<NamedSample>> {
        let path = self.segment_path(site, range)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut samples = Self::read_file(&path)?;
        sort_samples(&mut samples);
        Ok(samples)
    }
}

/// In-memory cold store.
#[derive(Debug, Default)]
pub struct MemoryColdStore {
    segments: Mutex<BTreeMap<(String, i64, i64), Vec<NamedSample>>>,
    unavailable: AtomicBool,
}

impl MemoryColdStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ArchiveError::Unavailable("memory cold store switched off".into()));
        }
        Ok(())
    }
}

impl ColdStore for MemoryColdStore {
    fn write_segment(&self, site: &str, range: TimeRange, samples: &[NamedSample]) -> Result<SegmentInfo> {
        self.check()?;
        validate_site(site)?;
        let mut stored = samples.to_vec();
        sort_samples(&mut stored);
        self.segments
            .lock()
            .insert((site.to_string(), range.start, range.end), stored);
        Ok(SegmentInfo {
            range,
            path: format!("memory://{site}/{}_{}", range.start, range.end),
            rows: samples.len() as u64,
            file_size: raw_size(samples),
            raw_bytes: raw_size(samples),
        })
    }

    fn read_range(&self, site: &str, names: &[String], range: TimeRange) -> Result<ColdRead> {
        self.check()?;
        let segments = self.segments.lock();
        let mut read = ColdRead::default();
        for ((segment_site, start, end), samples) in segments.iter() {
            let segment = TimeRange { start: *start, end: *end };
            if segment_site != site || !segment.overlaps(&range) {
                continue;
            }
            read.file_count += 1;
            read.samples.extend(
                samples
                    .iter()
                    .filter(|s| range.contains(s.timestamp) && names.contains(&s.point_name))
                    .cloned(),
            );
        }
        sort_samples(&mut read.samples);
        Ok(read)
    }

    fn segments(&self, site: &str) -> Result<Vec<SegmentInfo>> {
        self.check()?;
        Ok(self
            .segments
            .lock()
            .iter()
            .filter(|((s, _, _), _)| s == site)
            .map(|((s, start, end), samples)| SegmentInfo {
                range: TimeRange { start: *start, end: *end },
                path: format!("memory://{s}/{start}_{end}"),
                rows: samples.len() as u64,
                file_size: raw_size(samples),
                raw_bytes: raw_size(samples),
            })
            .collect())
    }

    fn read_segment(&self, site: &str, range: TimeRange) -> Result<Vec<NamedSample>> {
        self.check()?;
        Ok(self
            .segments
            .lock()
            .get(&(site.to_string(), range.start, range.end))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn sample(name: &str, ts: i64, value: f64) -> NamedSample {
        NamedSample::new(name, ts, value)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test_case("100_200.parquet", Some((100, 200)) ; "valid")]
    #[test_case(".100_200.parquet.tmp", None ; "temporary file")]
    #[test_case("200_100.parquet", None ; "inverted")]
    #[test_case("notes.txt", None ; "foreign file")]
    fn segment_names(name: &str, expected: Option<(i64, i64)>) {
        assert_eq!(parse_segment_name(name).map(|r| (r.start, r.end)), expected);
    }

    #[test]
    fn parquet_segment_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetColdStore::new(dir.path());
        let range = TimeRange::new(0, 1_000).unwrap();
        let mut flagged = sample("B", 500, -3.5);
        flagged.quality = 0;
        flagged.flags = SampleFlags::SENSOR_FAULT;
        let samples = vec![sample("A", 100, 1.0), flagged.clone(), sample("A", 900, 2.0)];

        let info = store.write_segment("S1", range, &samples).unwrap();
        assert_eq!(info.rows, 3);
        assert!(info.file_size > 0);
        assert!(info.path.ends_with("S1/0_1000.parquet"));

        let read = store.read_range("S1", &names(&["A", "B"]), range).unwrap();
        assert_eq!(read.file_count, 1);
        assert_eq!(read.samples.len(), 3);
        assert_eq!(read.samples[1], flagged);

        let only_a = store
            .read_range("S1", &names(&["A"]), TimeRange::new(0, 900).unwrap())
            .unwrap();
        assert_eq!(only_a.samples, vec![sample("A", 100, 1.0)]);
    }

    #[test]
    fn read_skips_non_overlapping_segments() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetColdStore::new(dir.path());
        store
            .write_segment("S1", TimeRange::new(0, 100).unwrap(), &[sample("A", 50, 1.0)])
            .unwrap();
        store
            .write_segment("S1", TimeRange::new(100, 200).unwrap(), &[sample("A", 150, 2.0)])
            .unwrap();

        let read = store
            .read_range("S1", &names(&["A"]), TimeRange::new(120, 180).unwrap())
            .unwrap();
        assert_eq!(read.file_count, 1);
        assert_eq!(read.samples.len(), 1);

        let segments = store.segments("S1").unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].range, TimeRange::new(0, 100).unwrap());
        assert_eq!(segments[1].rows, 1);
        assert!(store.segments("other").unwrap().is_empty());
    }

    #[test]
    fn rewrite_replaces_segment() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetColdStore::new(dir.path());
        let range = TimeRange::new(0, 100).unwrap();
        store.write_segment("S1", range, &[sample("A", 1, 1.0)]).unwrap();
        store
            .write_segment("S1", range, &[sample("A", 1, 1.0), sample("A", 2, 2.0)])
            .unwrap();

        let read = store.read_range("S1", &names(&["A"]), range).unwrap();
        assert_eq!(read.samples.len(), 2);
        assert_eq!(store.segments("S1").unwrap().len(), 1);
    }

    #[test]
    fn read_segment_returns_whole_segment() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetColdStore::new(dir.path());
        let range = TimeRange::new(0, 100).unwrap();
        store
            .write_segment("S1", range, &[sample("B", 5, 2.0), sample("A", 5, 1.0)])
            .unwrap();

        let all = store.read_segment("S1", range).unwrap();
        assert_eq!(all, vec![sample("A", 5, 1.0), sample("B", 5, 2.0)]);
        assert!(store.read_segment("S1", TimeRange::new(0, 50).unwrap()).unwrap().is_empty());

        let memory = MemoryColdStore::new();
        memory.write_segment("S1", range, &[sample("A", 5, 1.0)]).unwrap();
        assert_eq!(memory.read_segment("S1", range).unwrap().len(), 1);
        assert!(memory.read_segment("S2", range).unwrap().is_empty());
    }

    #[test]
    fn repetitive_segment_compresses() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetColdStore::new(dir.path());
        let samples: Vec<NamedSample> = (0..20_000)
            .map(|i| sample("AHU-1.SupplyAirTemp", i * 60_000, 21.5))
            .collect();
        let info = store
            .write_segment("S1", TimeRange::new(0, 20_000 * 60_000).unwrap(), &samples)
            .unwrap();
        assert!(info.compression_ratio() > 3.0, "ratio {}", info.compression_ratio());
    }

    #[test]
    fn rejects_path_like_sites() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetColdStore::new(dir.path());
        let range = TimeRange::new(0, 1).unwrap();
        assert!(store.write_segment("../escape", range, &[]).is_err());
        assert!(store.write_segment("..", range, &[]).is_err());
    }

    #[test]
    fn memory_store_can_be_switched_off() {
        let store = MemoryColdStore::new();
        let range = TimeRange::new(0, 100).unwrap();
        store.write_segment("S1", range, &[sample("A", 10, 1.0)]).unwrap();
        assert_eq!(store.read_range("S1", &names(&["A"]), range).unwrap().samples.len(), 1);

        store.set_unavailable(true);
        assert!(matches!(
            store.read_range("S1", &names(&["A"]), range),
            Err(ArchiveError::Unavailable(_))
        ));
    }
}
