//! Data models.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ImportError;

/// Number of fields in one data row of an input file.
pub const FIELDS_PER_ROW: usize = 5;

/// Vessel identifier
///
/// Input files carry it as an unsigned integer; storage keeps it in a
/// signed 64-bit column, so values above `i64::MAX` are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VesselId(i64);

impl TryFrom<u64> for VesselId {
    type Error = ImportError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        i64::try_from(value)
            .map(Self)
            .map_err(|_| ImportError::InvalidVesselId(value.to_string()))
    }
}

impl TryFrom<&str> for VesselId {
    type Error = ImportError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let parsed = value
            .parse::<u64>()
            .map_err(|_| ImportError::InvalidVesselId(value.to_string()))?;
        Self::try_from(parsed)
    }
}

impl VesselId {
    /// Get the raw identifier value
    pub fn value(&self) -> i64 {
        self.0
    }
}

/// One data line of an input file, fields kept as text.
///
/// Field order: unix timestamp (seconds), longitude, latitude, vessel id,
/// vessel name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRow {
    pub timestamp: String,
    pub longitude: String,
    pub latitude: String,
    pub vessel_id: String,
    pub vessel_name: String,
}

impl RawRow {
    /// Build a row from a CSV record, `None` if the field count is wrong.
    pub fn from_record(record: &StringRecord) -> Option<Self> {
        if record.len() != FIELDS_PER_ROW {
            return None;
        }
        Some(Self {
            timestamp: record[0].to_string(),
            longitude: record[1].to_string(),
            latitude: record[2].to_string(),
            vessel_id: record[3].to_string(),
            vessel_name: record[4].to_string(),
        })
    }
}

/// A bounded batch of rows from a single file, committed as one unit.
///
/// Never empty. Every page of a file has exactly `page_size` rows except
/// possibly the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// File the rows were read from
    pub source: Arc<Path>,
    pub rows: Vec<RawRow>,
}

impl Page {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A parsed row, ready to be written as a track and a vessel.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    pub vessel_id: VesselId,
    pub vessel_name: String,
    pub time: DateTime<Utc>,
    pub lon: f64,
    pub lat: f64,
}

impl TryFrom<&RawRow> for TrackPoint {
    type Error = ImportError;

    /// Parse a raw row.
    ///
    /// A bad timestamp is tolerated: it is logged and the Unix epoch is used
    /// instead. A bad vessel id or coordinate is an error.
    fn try_from(row: &RawRow) -> Result<Self, Self::Error> {
        let time = match row.timestamp.parse::<i64>() {
            Ok(secs) => DateTime::from_timestamp(secs, 0).unwrap_or_else(|| {
                warn!("Timestamp out of range: {}", row.timestamp);
                DateTime::<Utc>::UNIX_EPOCH
            }),
            Err(e) => {
                warn!("Invalid timestamp {:?}: {}", row.timestamp, e);
                DateTime::<Utc>::UNIX_EPOCH
            }
        };
        let vessel_id = VesselId::try_from(row.vessel_id.as_str())?;

        Ok(Self {
            vessel_id,
            vessel_name: row.vessel_name.clone(),
            time,
            lon: parse_coordinate(&row.longitude)?,
            lat: parse_coordinate(&row.latitude)?,
        })
    }
}

fn parse_coordinate(value: &str) -> Result<f64, ImportError> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ImportError::InvalidCoordinate(value.to_string())),
    }
}

impl TrackPoint {
    /// Location as well-known text, `POINT(lon lat)`
    pub fn wkt(&self) -> String {
        format!("POINT({} {})", self.lon, self.lat)
    }
}

/// Outcome of one import run, returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ImportResult {
    /// Directory entries present when discovery ran
    pub files_discovered: u64,
    /// Rows whose page transaction committed
    pub rows_committed: u64,
}

/// Outcome of the post-load fixup.
///
/// Fixup is best-effort, so failures are collected here instead of being
/// returned as errors.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FixupReport {
    /// Vessels whose creation time was recomputed
    pub vessels_updated: Option<u64>,
    /// Next value the vessel id generator will hand out
    pub next_vessel_id: Option<i64>,
    pub failures: Vec<String>,
}

impl FixupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Pipeline topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Reader workers feed paired writer workers, one transaction per page
    #[default]
    Paged,
    /// One transaction per file, concurrent files capped by a gate
    PerFile,
}
