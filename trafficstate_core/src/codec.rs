//! JSON wire format.
//!
//! Input payloads carry NGSIM-style records (either one object or an array of
//! them). A record with a missing required field becomes a
//! [`DataQualityIssue::MissingField`] for that record alone; only malformed
//! JSON fails the whole payload.
//!
//! Output is a `(key, value)` pair per closed window:
//! key `{"window": {"id", "start_ms", "end_ms"}}`, value the stacked
//! `[lane][section][velocity, density, acceleration]` grid.

use crate::error::DataQualityIssue;
use crate::matrix::TrafficStateMatrix;
use crate::types::TrajectoryPoint;
use serde::{Deserialize, Serialize};

/// One record as it appears on the bus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTrajectoryRecord {
    #[serde(rename = "Vehicle_ID")]
    pub vehicle_id: Option<i64>,
    #[serde(rename = "Global_Time")]
    pub global_time: Option<i64>,
    #[serde(rename = "ElapsedTime", default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<i64>,
    #[serde(rename = "Local_X")]
    pub local_x: Option<f64>,
    #[serde(rename = "Local_Y")]
    pub local_y: Option<f64>,
    #[serde(rename = "Global_X", default, skip_serializing_if = "Option::is_none")]
    pub global_x: Option<f64>,
    #[serde(rename = "Global_Y", default, skip_serializing_if = "Option::is_none")]
    pub global_y: Option<f64>,
    #[serde(rename = "v_Vel")]
    pub velocity: Option<f64>,
    #[serde(rename = "v_Acc")]
    pub acceleration: Option<f64>,
    #[serde(rename = "Lane_ID")]
    pub lane_id: Option<i32>,
    #[serde(rename = "Location")]
    pub location: Option<String>,
}

impl TryFrom<RawTrajectoryRecord> for TrajectoryPoint {
    type Error = DataQualityIssue;

    fn try_from(raw: RawTrajectoryRecord) -> Result<Self, Self::Error> {
        Ok(TrajectoryPoint {
            vehicle_id: raw.vehicle_id.ok_or(DataQualityIssue::MissingField("Vehicle_ID"))?,
            timestamp_ms: raw.global_time.ok_or(DataQualityIssue::MissingField("Global_Time"))?,
            local_x: raw.local_x.ok_or(DataQualityIssue::MissingField("Local_X"))?,
            local_y: raw.local_y.ok_or(DataQualityIssue::MissingField("Local_Y"))?,
            lane_id: raw.lane_id.ok_or(DataQualityIssue::MissingField("Lane_ID"))?,
            velocity: raw.velocity.ok_or(DataQualityIssue::MissingField("v_Vel"))?,
            acceleration: raw.acceleration.ok_or(DataQualityIssue::MissingField("v_Acc"))?,
            location: raw.location.ok_or(DataQualityIssue::MissingField("Location"))?,
        })
    }
}

impl From<&TrajectoryPoint> for RawTrajectoryRecord {
    fn from(point: &TrajectoryPoint) -> Self {
        Self {
            vehicle_id: Some(point.vehicle_id),
            global_time: Some(point.timestamp_ms),
            elapsed_time: None,
            local_x: Some(point.local_x),
            local_y: Some(point.local_y),
            global_x: None,
            global_y: None,
            velocity: Some(point.velocity),
            acceleration: Some(point.acceleration),
            lane_id: Some(point.lane_id),
            location: Some(point.location.clone()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Many(Vec<RawTrajectoryRecord>),
    One(RawTrajectoryRecord),
}

/// Decodes one bus payload into per-record results.
pub fn decode_points(payload: &[u8]) -> Result<Vec<Result<TrajectoryPoint, DataQualityIssue>>, serde_json::Error> {
    let records = match serde_json::from_slice::<Payload>(payload)? {
        Payload::Many(records) => records,
        Payload::One(record) => vec![record],
    };
    Ok(records.into_iter().map(TrajectoryPoint::try_from).collect())
}

/// Encodes points as one array payload.
pub fn encode_points(points: &[TrajectoryPoint]) -> Result<Vec<u8>, serde_json::Error> {
    let records: Vec<RawTrajectoryRecord> = points.iter().map(RawTrajectoryRecord::from).collect();
    serde_json::to_vec(&records)
}

/// Bounds of an emitted window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub id: i64,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Output message key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub window: WindowBounds,
}

/// Encodes a rendered window as `(key, value)` bytes.
pub fn encode_snapshot(
    bounds: WindowBounds,
    matrix: &TrafficStateMatrix,
) -> Result<(Vec<u8>, Vec<u8>), serde_json::Error> {
    let key = serde_json::to_vec(&SnapshotKey { window: bounds })?;
    let value = serde_json::to_vec(&matrix.channels())?;
    Ok((key, value))
}

/// Decodes a snapshot key.
pub fn decode_snapshot_key(key: &[u8]) -> Result<SnapshotKey, serde_json::Error> {
    serde_json::from_slice(key)
}

/// Decodes a snapshot value into its stacked grid.
pub fn decode_snapshot_value(value: &[u8]) -> Result<Vec<Vec<[f64; 3]>>, serde_json::Error> {
    serde_json::from_slice(value)
}
