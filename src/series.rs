//! Fixed-capacity round-robin time series for the three speed channels.
//!
//! The store holds one consolidated row per `step`-second interval, at most
//! `capacity_rows` of them (a fixed one-week window). Multiple raw samples
//! landing inside one interval consolidate via MAX. Intervals that never
//! received a sample stay unknown, so a stalled
//! sampler produces gaps in the graphs, never false zeros.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store already exists at {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("timestamp {timestamp} is not after the last stored timestamp {last}")]
    OutOfOrder { timestamp: i64, last: i64 },
    #[error("malformed store file: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One measured metric, with its own bound, colors, and reference lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Download,
    Upload,
    Ping,
}

impl Channel {
    /// Fixed rendering and compositing order.
    pub const ALL: [Channel; 3] = [Channel::Download, Channel::Upload, Channel::Ping];

    pub fn name(self) -> &'static str {
        match self {
            Channel::Download => "download",
            Channel::Upload => "upload",
            Channel::Ping => "ping",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Channel::Download => "Download",
            Channel::Upload => "Upload",
            Channel::Ping => "Ping",
        }
    }
}

/// One measurement run. All three channel values share one timestamp and
/// are written as a single record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Seconds since epoch, local time.
    pub timestamp: i64,
    pub download: f64,
    pub upload: f64,
    pub ping: f64,
}

impl Sample {
    pub fn value(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Download => self.download,
            Channel::Upload => self.upload,
            Channel::Ping => self.ping,
        }
    }
}

/// Inclusive gauge bound; writes outside it are clamped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
}

impl Bound {
    fn clamp(self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }
}

/// Per-channel gauge bounds, fixed at creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bounds {
    pub download: Bound,
    pub upload: Bound,
    pub ping: Bound,
}

impl Bounds {
    fn clamped(&self, sample: Sample) -> Sample {
        Sample {
            timestamp: sample.timestamp,
            download: self.download.clamp(sample.download),
            upload: self.upload.clamp(sample.upload),
            ping: self.ping.clamp(sample.ping),
        }
    }
}

/// Creation-time parameters. Immutable once the store exists; recreate the
/// store to change them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingSpec {
    /// Sampling interval in seconds; also the span of one consolidated row.
    pub step: i64,
    /// Maximum gap after which a sample no longer covers skipped rows.
    pub heartbeat: i64,
    /// Number of retained consolidated rows.
    pub capacity_rows: usize,
    pub bounds: Bounds,
}

impl RingSpec {
    fn row_start(&self, timestamp: i64) -> i64 {
        timestamp - timestamp.rem_euclid(self.step)
    }
}

/// One consolidated interval. A `None` channel value is unknown, not zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Row {
    /// Step-aligned start of the interval this row covers.
    pub start: i64,
    pub download: Option<f64>,
    pub upload: Option<f64>,
    pub ping: Option<f64>,
}

impl Row {
    fn filled(start: i64, sample: &Sample) -> Self {
        let mut row = Row {
            start,
            download: None,
            upload: None,
            ping: None,
        };
        row.absorb(sample);
        row
    }

    /// MAX consolidation of a clamped sample into this row.
    fn absorb(&mut self, sample: &Sample) {
        for channel in Channel::ALL {
            let value = sample.value(channel);
            let slot = self.slot_mut(channel);
            *slot = Some(slot.map_or(value, |current| current.max(value)));
        }
    }

    fn slot_mut(&mut self, channel: Channel) -> &mut Option<f64> {
        match channel {
            Channel::Download => &mut self.download,
            Channel::Upload => &mut self.upload,
            Channel::Ping => &mut self.ping,
        }
    }

    pub fn value(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Download => self.download,
            Channel::Upload => self.upload,
            Channel::Ping => self.ping,
        }
    }
}

/// The on-disk round-robin store. Exactly one writer at a time; external
/// mutual exclusion across invocations is assumed.
#[derive(Debug)]
pub struct RingStore {
    spec: RingSpec,
    last_timestamp: Option<i64>,
    rows: VecDeque<Row>,
    path: PathBuf,
}

impl RingStore {
    /// Creates a new store file. Fails with [`StoreError::AlreadyExists`]
    /// rather than overwriting; callers check existence first and `open`.
    pub fn create(path: &Path, spec: RingSpec) -> Result<Self, StoreError> {
        storage::create(path, &spec)?;
        Ok(RingStore {
            spec,
            last_timestamp: None,
            rows: VecDeque::new(),
            path: path.to_owned(),
        })
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let (spec, last_timestamp, rows) = storage::load(path)?;
        Ok(RingStore {
            spec,
            last_timestamp,
            rows,
            path: path.to_owned(),
        })
    }

    pub fn spec(&self) -> &RingSpec {
        &self.spec
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    /// Records one sample and persists the store.
    ///
    /// Timestamps must be strictly increasing across appends. Channel
    /// values are clamped into their bound. When the gap since the previous
    /// append is within the heartbeat the sample also covers the skipped
    /// intervals; beyond it they stay unknown.
    pub fn append(&mut self, sample: Sample) -> Result<(), StoreError> {
        if let Some(last) = self.last_timestamp {
            if sample.timestamp <= last {
                return Err(StoreError::OutOfOrder {
                    timestamp: sample.timestamp,
                    last,
                });
            }
        }

        let clamped = self.spec.bounds.clamped(sample);
        let start = self.spec.row_start(clamped.timestamp);
        let within_heartbeat = self
            .last_timestamp
            .is_some_and(|last| clamped.timestamp - last <= self.spec.heartbeat);

        match self.rows.back_mut() {
            Some(newest) if newest.start == start => newest.absorb(&clamped),
            _ => {
                if within_heartbeat {
                    let mut cursor = self
                        .rows
                        .back()
                        .map_or(start, |row| row.start + self.spec.step);
                    while cursor < start {
                        self.rows.push_back(Row::filled(cursor, &clamped));
                        cursor += self.spec.step;
                    }
                }
                self.rows.push_back(Row::filled(start, &clamped));
            }
        }

        self.last_timestamp = Some(clamped.timestamp);
        while self.rows.len() > self.spec.capacity_rows {
            self.rows.pop_front();
        }

        storage::rewrite(&self.path, &self.spec, self.last_timestamp, self.rows.iter())
    }

    /// Consolidated MAX-per-row values intersecting `window`, oldest first.
    /// Unknown intervals yield no point. Recomputed fresh on every call.
    pub fn query(
        &self,
        channel: Channel,
        window: (i64, i64),
    ) -> impl Iterator<Item = (i64, f64)> + '_ {
        let step = self.spec.step;
        let (from, to) = window;
        self.rows
            .iter()
            .filter(move |row| row.start + step > from && row.start <= to)
            .filter_map(move |row| row.value(channel).map(|value| (row.start, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(step: i64, capacity_rows: usize) -> RingSpec {
        let bound = |max| Bound { min: 0.0, max };
        RingSpec {
            step,
            heartbeat: step * 3,
            capacity_rows,
            bounds: Bounds {
                download: bound(600.0),
                upload: bound(60.0),
                ping: bound(100.0),
            },
        }
    }

    fn sample(timestamp: i64, download: f64) -> Sample {
        Sample {
            timestamp,
            download,
            upload: 10.0,
            ping: 20.0,
        }
    }

    fn store(step: i64, capacity_rows: usize) -> (tempfile::TempDir, RingStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RingStore::create(&dir.path().join("speed.series"), spec(step, capacity_rows))
            .unwrap();
        (dir, store)
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speed.series");
        RingStore::create(&path, spec(300, 10)).unwrap();
        let err = RingStore::create(&path, spec(300, 10)).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn append_rejects_non_increasing_timestamps() {
        let (_dir, mut store) = store(300, 10);
        store.append(sample(1_000, 50.0)).unwrap();
        assert!(matches!(
            store.append(sample(1_000, 60.0)),
            Err(StoreError::OutOfOrder {
                timestamp: 1_000,
                last: 1_000
            })
        ));
        assert!(matches!(
            store.append(sample(999, 60.0)),
            Err(StoreError::OutOfOrder { .. })
        ));
        store.append(sample(1_001, 60.0)).unwrap();
    }

    #[test]
    fn out_of_range_values_are_clamped_to_the_bound() {
        let (_dir, mut store) = store(300, 10);
        store
            .append(Sample {
                timestamp: 600,
                download: 900.0,
                upload: -5.0,
                ping: 20.0,
            })
            .unwrap();
        let window = (0, 1_000);
        assert_eq!(
            store.query(Channel::Download, window).collect::<Vec<_>>(),
            vec![(600, 600.0)]
        );
        assert_eq!(
            store.query(Channel::Upload, window).collect::<Vec<_>>(),
            vec![(600, 0.0)]
        );
    }

    #[test]
    fn samples_within_one_interval_consolidate_to_the_maximum() {
        let (_dir, mut store) = store(300, 10);
        store.append(sample(600, 10.0)).unwrap();
        store.append(sample(700, 25.0)).unwrap();
        store.append(sample(800, 15.0)).unwrap();
        let points: Vec<_> = store.query(Channel::Download, (0, 1_000)).collect();
        assert_eq!(points, vec![(600, 25.0)]);
    }

    #[test]
    fn oldest_rows_fall_out_once_capacity_is_reached() {
        let (_dir, mut store) = store(300, 3);
        for i in 0..5 {
            store.append(sample(300 * (i + 1), 10.0 * (i + 1) as f64)).unwrap();
        }
        let points: Vec<_> = store.query(Channel::Download, (0, 10_000)).collect();
        assert_eq!(points, vec![(900, 30.0), (1_200, 40.0), (1_500, 50.0)]);
    }

    #[test]
    fn five_minute_round_trip_returns_the_stored_values() {
        let (_dir, mut store) = store(300, 2016);
        let t0 = 1_600_000_000;
        store
            .append(Sample {
                timestamp: t0,
                download: 123.45,
                upload: 23.4,
                ping: 18.0,
            })
            .unwrap();
        let row_start = t0 - t0 % 300;
        let window = (t0 - 600, t0 + 600);
        assert_eq!(
            store.query(Channel::Download, window).collect::<Vec<_>>(),
            vec![(row_start, 123.45)]
        );
        assert_eq!(
            store.query(Channel::Upload, window).collect::<Vec<_>>(),
            vec![(row_start, 23.4)]
        );
        assert_eq!(
            store.query(Channel::Ping, window).collect::<Vec<_>>(),
            vec![(row_start, 18.0)]
        );
    }

    #[test]
    fn short_gaps_backfill_skipped_intervals() {
        let (_dir, mut store) = store(300, 10);
        store.append(sample(300, 10.0)).unwrap();
        // gap of 600s <= heartbeat of 900s: the skipped interval at 600
        // takes the new reading
        store.append(sample(900, 40.0)).unwrap();
        let points: Vec<_> = store.query(Channel::Download, (0, 2_000)).collect();
        assert_eq!(points, vec![(300, 10.0), (600, 40.0), (900, 40.0)]);
    }

    #[test]
    fn long_gaps_leave_unknown_intervals() {
        let (_dir, mut store) = store(300, 10);
        store.append(sample(300, 10.0)).unwrap();
        // gap of 2200s > heartbeat of 900s: nothing between the two rows
        store.append(sample(2_500, 40.0)).unwrap();
        let points: Vec<_> = store.query(Channel::Download, (0, 5_000)).collect();
        assert_eq!(points, vec![(300, 10.0), (2_400, 40.0)]);
    }

    #[test]
    fn query_is_restartable_and_window_bounded() {
        let (_dir, mut store) = store(300, 10);
        store.append(sample(300, 10.0)).unwrap();
        store.append(sample(600, 20.0)).unwrap();
        store.append(sample(900, 30.0)).unwrap();
        let window = (550, 900);
        let first: Vec<_> = store.query(Channel::Download, window).collect();
        let second: Vec<_> = store.query(Channel::Download, window).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![(600, 20.0), (900, 30.0)]);
    }

    #[test]
    fn reopened_store_sees_persisted_rows_and_spec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speed.series");
        {
            let mut store = RingStore::create(&path, spec(300, 10)).unwrap();
            store.append(sample(600, 50.0)).unwrap();
        }
        let store = RingStore::open(&path).unwrap();
        assert_eq!(store.spec().step, 300);
        assert_eq!(store.spec().heartbeat, 900);
        assert_eq!(store.last_timestamp(), Some(600));
        let points: Vec<_> = store.query(Channel::Download, (0, 1_000)).collect();
        assert_eq!(points, vec![(600, 50.0)]);
        // ordering survives a reopen too
        let mut store = store;
        assert!(matches!(
            store.append(sample(600, 10.0)),
            Err(StoreError::OutOfOrder { .. })
        ));
    }
}
