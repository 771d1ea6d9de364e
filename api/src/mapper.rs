//! Mapping of raw export elements onto [`ListeningRecord`]s.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::{ListeningRecord, RawPlayEvent};

// Spotify extended streaming history keys
const TRACK_NAME: &str = "master_metadata_track_name";
const ARTIST_NAME: &str = "master_metadata_album_artist_name";
const ALBUM_NAME: &str = "master_metadata_album_album_name";
const PLAYED_AT: &str = "ts";
const MS_PLAYED: &str = "ms_played";
const PLATFORM: &str = "platform";
const TRACK_URI: &str = "spotify_track_uri";

/// Why a play event was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("missing track_name")]
    MissingTrackName,

    /// The value is present but its JSON type does not fit the column.
    #[error("{field} has an unexpected type")]
    InvalidField { field: &'static str },
}

/// Map one raw event to a record, copying fields by name without coercion.
///
/// Only the track name is required. Timestamps and durations are passed
/// through as given, malformed or negative values included.
pub fn map(raw: &RawPlayEvent) -> Result<ListeningRecord, RejectReason> {
    let track_name = match raw.get(TRACK_NAME) {
        None | Some(Value::Null) => return Err(RejectReason::MissingTrackName),
        Some(Value::String(name)) if name.is_empty() => {
            return Err(RejectReason::MissingTrackName)
        }
        Some(Value::String(name)) => name.clone(),
        Some(_) => return Err(RejectReason::InvalidField { field: "track_name" }),
    };

    Ok(ListeningRecord {
        track_name,
        artist_name: text_field(raw, ARTIST_NAME, "artist_name")?,
        album_name: text_field(raw, ALBUM_NAME, "album_name")?,
        played_at: text_field(raw, PLAYED_AT, "played_at")?,
        ms_played: integer_field(raw, MS_PLAYED, "ms_played")?,
        platform: text_field(raw, PLATFORM, "platform")?,
        track_uri: text_field(raw, TRACK_URI, "track_uri")?,
    })
}

fn text_field(
    raw: &RawPlayEvent,
    key: &str,
    field: &'static str,
) -> Result<Option<String>, RejectReason> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(RejectReason::InvalidField { field }),
    }
}

fn integer_field(
    raw: &RawPlayEvent,
    key: &str,
    field: &'static str,
) -> Result<Option<i64>, RejectReason> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(value)) => value
            .as_i64()
            .map(Some)
            .ok_or(RejectReason::InvalidField { field }),
        Some(_) => Err(RejectReason::InvalidField { field }),
    }
}
