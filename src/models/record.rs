// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Health records fetched from WHOOP and their storage shape.
//!
//! Remote JSON is decoded once, at the fetch boundary, into a
//! [`HealthRecord`] carrying a typed [`RecordData`] plus the raw payload.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time_utils::{format_utc_rfc3339, parse_utc};

/// Remote resource categories that are synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Cycle,
    Sleep,
    Workout,
    Recovery,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Cycle,
        Category::Sleep,
        Category::Workout,
        Category::Recovery,
    ];

    /// Path of the paged collection endpoint, relative to the API base URL.
    pub fn path(self) -> &'static str {
        match self {
            Category::Cycle => "/v1/cycle",
            Category::Sleep => "/v1/activity/sleep",
            Category::Workout => "/v1/activity/workout",
            Category::Recovery => "/v1/recovery",
        }
    }

    /// Firestore collection holding records of this category.
    pub fn collection(self) -> &'static str {
        match self {
            Category::Cycle => "cycles",
            Category::Sleep => "sleeps",
            Category::Workout => "workouts",
            Category::Recovery => "recoveries",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Cycle => "cycle",
            Category::Sleep => "sleep",
            Category::Workout => "workout",
            Category::Recovery => "recovery",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category '{}'", s))
    }
}

/// One stored record, keyed by `key` within its category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    /// External ID, or `"{cycle_id}_{sleep_id}"` for recoveries
    pub key: String,
    /// Local user the record was fetched for
    pub user_id: String,
    pub category: Category,
    /// RFC 3339, UTC
    pub created_at: String,
    /// RFC 3339, UTC. Drives last-modified-wins merging.
    pub updated_at: String,
    pub data: RecordData,
    /// Remote JSON as received
    pub raw_payload: String,
}

impl HealthRecord {
    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_utc(&self.updated_at)
    }
}

/// Typed payload, one variant per category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordData {
    Cycle(CycleData),
    Sleep(SleepData),
    Workout(WorkoutData),
    Recovery(RecoveryData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleData {
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub timezone_offset: Option<String>,
    pub score_state: String,
    #[serde(default)]
    pub score: Option<CycleScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleScore {
    pub strain: Option<f64>,
    pub kilojoule: Option<f64>,
    pub average_heart_rate: Option<i64>,
    pub max_heart_rate: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepData {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub timezone_offset: Option<String>,
    #[serde(default)]
    pub nap: bool,
    pub score_state: String,
    #[serde(default)]
    pub score: Option<SleepScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepScore {
    pub respiratory_rate: Option<f64>,
    pub sleep_performance_percentage: Option<f64>,
    pub sleep_consistency_percentage: Option<f64>,
    pub sleep_efficiency_percentage: Option<f64>,
    pub stage_summary: Option<SleepStageSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepStageSummary {
    pub total_in_bed_time_milli: Option<i64>,
    pub total_awake_time_milli: Option<i64>,
    pub total_no_data_time_milli: Option<i64>,
    pub total_light_sleep_time_milli: Option<i64>,
    pub total_slow_wave_sleep_time_milli: Option<i64>,
    pub total_rem_sleep_time_milli: Option<i64>,
    pub sleep_cycle_count: Option<i64>,
    pub disturbance_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutData {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub timezone_offset: Option<String>,
    #[serde(default)]
    pub sport_id: Option<i64>,
    pub score_state: String,
    #[serde(default)]
    pub score: Option<WorkoutScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutScore {
    pub strain: Option<f64>,
    pub average_heart_rate: Option<i64>,
    pub max_heart_rate: Option<i64>,
    pub kilojoule: Option<f64>,
    pub percent_recorded: Option<f64>,
    pub distance_meter: Option<f64>,
    pub altitude_gain_meter: Option<f64>,
    pub altitude_change_meter: Option<f64>,
    pub zone_duration: Option<ZoneDurations>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDurations {
    pub zone_zero_milli: Option<i64>,
    pub zone_one_milli: Option<i64>,
    pub zone_two_milli: Option<i64>,
    pub zone_three_milli: Option<i64>,
    pub zone_four_milli: Option<i64>,
    pub zone_five_milli: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryData {
    pub cycle_id: String,
    pub sleep_id: String,
    pub score_state: String,
    pub score: Option<RecoveryScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryScore {
    pub user_calibrating: Option<bool>,
    pub recovery_score: Option<f64>,
    pub resting_heart_rate: Option<f64>,
    pub hrv_rmssd_milli: Option<f64>,
    pub spo2_percentage: Option<f64>,
    pub skin_temp_celsius: Option<f64>,
}

/// Why a remote record could not be decoded. The record is skipped.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not a valid timestamp: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("unexpected record shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// WHOOP IDs are integers for most resources and UUID strings for some.
#[derive(Deserialize)]
#[serde(untagged)]
enum RemoteId {
    Int(i64),
    Text(String),
}

impl RemoteId {
    fn into_key(self) -> String {
        match self {
            RemoteId::Int(id) => id.to_string(),
            RemoteId::Text(id) => id,
        }
    }
}

/// Fields shared by every resource.
#[derive(Deserialize)]
struct RemoteHeader {
    id: Option<RemoteId>,
    cycle_id: Option<RemoteId>,
    sleep_id: Option<RemoteId>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

#[derive(Deserialize)]
struct RemoteRecoveryBody {
    score_state: String,
    #[serde(default)]
    score: Option<RecoveryScore>,
}

impl HealthRecord {
    /// Decode one raw remote record.
    pub fn decode(user_id: &str, category: Category, raw: &Value) -> Result<Self, DecodeError> {
        let header: RemoteHeader = serde_json::from_value(raw.clone())?;

        let updated_at = normalize_timestamp(
            "updated_at",
            header.updated_at.ok_or(DecodeError::MissingField("updated_at"))?,
        )?;
        let created_at = match header.created_at {
            Some(value) => normalize_timestamp("created_at", value)?,
            None => updated_at.clone(),
        };

        let (key, data) = match category {
            Category::Cycle => (
                required_id(header.id, "id")?,
                RecordData::Cycle(serde_json::from_value(raw.clone())?),
            ),
            Category::Sleep => (
                required_id(header.id, "id")?,
                RecordData::Sleep(serde_json::from_value(raw.clone())?),
            ),
            Category::Workout => (
                required_id(header.id, "id")?,
                RecordData::Workout(serde_json::from_value(raw.clone())?),
            ),
            Category::Recovery => {
                let cycle_id = required_id(header.cycle_id, "cycle_id")?;
                let sleep_id = required_id(header.sleep_id, "sleep_id")?;
                let body: RemoteRecoveryBody = serde_json::from_value(raw.clone())?;
                (
                    format!("{}_{}", cycle_id, sleep_id),
                    RecordData::Recovery(RecoveryData {
                        cycle_id,
                        sleep_id,
                        score_state: body.score_state,
                        score: body.score,
                    }),
                )
            }
        };

        Ok(Self {
            key,
            user_id: user_id.to_string(),
            category,
            created_at,
            updated_at,
            data,
            raw_payload: raw.to_string(),
        })
    }
}

fn required_id(id: Option<RemoteId>, field: &'static str) -> Result<String, DecodeError> {
    id.map(RemoteId::into_key)
        .filter(|key| !key.is_empty())
        .ok_or(DecodeError::MissingField(field))
}

fn normalize_timestamp(field: &'static str, value: String) -> Result<String, DecodeError> {
    match parse_utc(&value) {
        Some(parsed) => Ok(format_utc_rfc3339(parsed)),
        None => Err(DecodeError::InvalidTimestamp { field, value }),
    }
}
