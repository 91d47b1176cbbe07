//! Daily CSV partitions of OHLCV candles.
//!
//! One file per UTC calendar day, append-only. Reads and writes to a given
//! partition are mutually exclusive through an advisory lock on a sidecar
//! `.lock` file, so a reader never observes a partially-written partition.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use fs2::FileExt;

use crate::models::Candle;

pub struct CandleStore {
    data_dir: PathBuf,
}

impl CandleStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> crate::Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn partition_path(&self, day: NaiveDate) -> PathBuf {
        self.data_dir
            .join(format!("ohlcv_{}.csv", day.format("%Y-%m-%d")))
    }

    fn open_lock(path: &Path) -> crate::Result<File> {
        let lock_path = path.with_extension("csv.lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(lock_path)?;
        Ok(file)
    }

    /// Append candles, fanned out into their UTC-day partitions. Each
    /// partition is written under its exclusive lock.
    pub fn append(&self, candles: &[Candle]) -> crate::Result<()> {
        let mut by_day: BTreeMap<NaiveDate, Vec<&Candle>> = BTreeMap::new();
        for candle in candles {
            by_day
                .entry(candle.timestamp.date_naive())
                .or_default()
                .push(candle);
        }

        for (day, rows) in by_day {
            let path = self.partition_path(day);
            let lock = Self::open_lock(&path)?;
            lock.lock_exclusive()?;
            let result = Self::append_locked(&path, &rows);
            let _ = FileExt::unlock(&lock);
            result?;
            tracing::debug!(day = %day, count = rows.len(), "appended candles to partition");
        }

        Ok(())
    }

    fn append_locked(path: &Path, rows: &[&Candle]) -> crate::Result<()> {
        let needs_header = !path.exists() || std::fs::metadata(path)?.len() == 0;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load one day's partition. Missing partitions are empty, not errors.
    pub fn load_day(&self, day: NaiveDate) -> crate::Result<Vec<Candle>> {
        let path = self.partition_path(day);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let lock = Self::open_lock(&path)?;
        lock.lock_shared()?;
        let result = Self::load_locked(&path);
        let _ = FileExt::unlock(&lock);
        result
    }

    fn load_locked(path: &Path) -> crate::Result<Vec<Candle>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut candles = Vec::new();
        for row in reader.deserialize() {
            candles.push(row?);
        }
        Ok(candles)
    }

    /// Load the trailing `days` partitions (including today), oldest first.
    pub fn load_recent(&self, days: u32) -> crate::Result<Vec<Candle>> {
        let today = Utc::now().date_naive();
        let mut all = Vec::new();
        for offset in (0..days as i64).rev() {
            let day = today - chrono::Duration::days(offset);
            all.extend(self.load_day(day)?);
        }
        Ok(all)
    }
}
