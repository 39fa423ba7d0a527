//! Static GTFS schedule data used to cross-reference realtime feeds.
//!
//! [`TripPatterns`] is the queryable stop ordering per trip, loaded once per
//! schedule version from `stop_times.txt`. [`ScheduleHandle`] shares one
//! dataset across all concurrently polling sources and supports swapping in
//! a new schedule version without an in-flight validation observing a
//! partial dataset: each cycle grabs an `Arc` to the current dataset at
//! cycle start and keeps it until the cycle finishes.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

/// Lookup interface the rules use to compare realtime data against the
/// static schedule. Read-only during validation.
pub trait ScheduleIndex: Send + Sync {
    /// Returns the stop id the static schedule assigns to `stop_sequence`
    /// on `trip_id`, or `None` if the trip or sequence is unknown.
    fn lookup(&self, trip_id: &str, stop_sequence: u32) -> Option<&str>;

    /// Returns `true` if the static schedule contains `trip_id` at all.
    fn has_trip(&self, trip_id: &str) -> bool;
}

/// Per-trip mapping from stop sequence number to stop id.
///
/// Sequence numbers come from the static schedule and are strictly
/// increasing but not necessarily contiguous, hence the map rather than a
/// positional vector.
#[derive(Debug, Default, Clone)]
pub struct TripPatterns {
    trips: HashMap<String, BTreeMap<u32, String>>,
}

#[derive(Debug, Deserialize)]
struct StopTimeRow {
    trip_id: String,
    stop_id: String,
    stop_sequence: u32,
}

impl TripPatterns {
    /// Builds the index from CSV data in GTFS `stop_times.txt` form.
    /// Columns other than `trip_id`, `stop_id` and `stop_sequence` are
    /// ignored.
    pub fn from_stop_times_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut trips: HashMap<String, BTreeMap<u32, String>> = HashMap::new();

        for result in rdr.deserialize() {
            let row: StopTimeRow = result.context("malformed stop_times row")?;
            trips
                .entry(row.trip_id)
                .or_default()
                .insert(row.stop_sequence, row.stop_id);
        }

        Ok(Self { trips })
    }

    /// Loads the index from a `stop_times.txt` file on disk.
    pub fn from_stop_times_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening stop_times file {}", path.display()))?;
        let patterns = Self::from_stop_times_reader(file)?;
        info!(
            path = %path.display(),
            trips = patterns.trip_count(),
            "Static schedule loaded"
        );
        Ok(patterns)
    }

    /// Inserts one `(trip, sequence) -> stop` entry. Mainly useful for
    /// building fixtures.
    pub fn insert(&mut self, trip_id: &str, stop_sequence: u32, stop_id: &str) {
        self.trips
            .entry(trip_id.to_string())
            .or_default()
            .insert(stop_sequence, stop_id.to_string());
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }
}

impl ScheduleIndex for TripPatterns {
    fn lookup(&self, trip_id: &str, stop_sequence: u32) -> Option<&str> {
        self.trips
            .get(trip_id)
            .and_then(|pattern| pattern.get(&stop_sequence))
            .map(String::as_str)
    }

    fn has_trip(&self, trip_id: &str) -> bool {
        self.trips.contains_key(trip_id)
    }
}

/// Descriptive metadata for a loaded schedule dataset.
#[derive(Debug, Clone)]
pub struct ScheduleMetadata {
    /// Producer-assigned dataset version, when one is known.
    pub version: Option<String>,
    pub loaded_at: DateTime<Utc>,
}

impl Default for ScheduleMetadata {
    fn default() -> Self {
        Self {
            version: None,
            loaded_at: Utc::now(),
        }
    }
}

/// One loaded schedule version: the queryable patterns plus metadata.
#[derive(Debug, Default)]
pub struct StaticSchedule {
    pub patterns: TripPatterns,
    pub metadata: ScheduleMetadata,
}

/// Shared, swappable reference to the current schedule dataset.
///
/// `current` is cheap (one lock acquisition, one `Arc` clone) and is called
/// once per poll cycle; `replace` installs a new schedule version for
/// cycles that start after the call.
#[derive(Clone, Default)]
pub struct ScheduleHandle {
    inner: Arc<RwLock<Arc<StaticSchedule>>>,
}

impl ScheduleHandle {
    pub fn new(schedule: StaticSchedule) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(schedule))),
        }
    }

    pub fn current(&self) -> Arc<StaticSchedule> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, schedule: StaticSchedule) {
        let mut slot = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Arc::new(schedule);
    }
}
