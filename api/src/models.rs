use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// One element of an uploaded listening-history export.
///
/// Kept as raw JSON: nothing about the shape of an element is trusted until
/// the mapper has looked at it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RawPlayEvent(Value);

impl RawPlayEvent {
    /// Look up a source key. Non-object elements have no fields.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl From<Value> for RawPlayEvent {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// A normalized play, as stored in `listening_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct ListeningRecord {
    pub track_name: String,
    pub artist_name: Option<String>,
    pub album_name: Option<String>,
    pub played_at: Option<String>, // source string, parsed by the store
    pub ms_played: Option<i64>,
    pub platform: Option<String>,
    pub track_uri: Option<String>,
}
