use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::Pool;

const TOP_ARTISTS: &str = r#"
    SELECT
        artist_name,
        COUNT(*) AS play_count,
        CAST(SUM(ms_played) AS BIGINT) AS total_time_played
    FROM listening_history
    GROUP BY artist_name
    ORDER BY play_count DESC, artist_name ASC
    LIMIT 10
"#;

const PG_TIME_PATTERNS: &str = r#"
    SELECT
        CAST(EXTRACT(HOUR FROM played_at AT TIME ZONE 'UTC') AS BIGINT) AS hour,
        COUNT(*) AS play_count
    FROM listening_history
    GROUP BY CAST(EXTRACT(HOUR FROM played_at AT TIME ZONE 'UTC') AS BIGINT)
    ORDER BY hour ASC NULLS LAST
"#;

const SQLITE_TIME_PATTERNS: &str = r#"
    SELECT
        CAST(strftime('%H', played_at) AS INTEGER) AS hour,
        COUNT(*) AS play_count
    FROM listening_history
    GROUP BY CAST(strftime('%H', played_at) AS INTEGER)
    ORDER BY hour ASC NULLS LAST
"#;

const TOTALS: &str = r#"
    SELECT
        COUNT(*) AS total_plays,
        CAST(SUM(ms_played) AS BIGINT) AS total_ms_played,
        COUNT(DISTINCT artist_name) AS unique_artists,
        COUNT(DISTINCT track_name) AS unique_tracks
    FROM listening_history
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TopArtist {
    pub artist_name: Option<String>,
    pub play_count: i64,
    pub total_time_played: Option<i64>, // ms
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct HourlyPlays {
    pub hour: Option<i64>, // UTC, none for plays without a timestamp
    pub play_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct HistoryTotals {
    pub total_plays: i64,
    pub total_ms_played: Option<i64>,
    pub unique_artists: i64,
    pub unique_tracks: i64,
}

/// The ten most played artists, most plays first.
pub async fn top_artists(pool: &Pool) -> Result<Vec<TopArtist>, sqlx::Error> {
    match pool {
        Pool::Postgres(pool) => {
            sqlx::query_as::<_, TopArtist>(TOP_ARTISTS)
                .fetch_all(pool)
                .await
        }
        Pool::Sqlite(pool) => {
            sqlx::query_as::<_, TopArtist>(TOP_ARTISTS)
                .fetch_all(pool)
                .await
        }
    }
}

/// Play counts per hour of day, ascending by hour.
pub async fn time_patterns(pool: &Pool) -> Result<Vec<HourlyPlays>, sqlx::Error> {
    match pool {
        Pool::Postgres(pool) => {
            sqlx::query_as::<_, HourlyPlays>(PG_TIME_PATTERNS)
                .fetch_all(pool)
                .await
        }
        Pool::Sqlite(pool) => {
            sqlx::query_as::<_, HourlyPlays>(SQLITE_TIME_PATTERNS)
                .fetch_all(pool)
                .await
        }
    }
}

pub async fn totals(pool: &Pool) -> Result<HistoryTotals, sqlx::Error> {
    match pool {
        Pool::Postgres(pool) => {
            sqlx::query_as::<_, HistoryTotals>(TOTALS)
                .fetch_one(pool)
                .await
        }
        Pool::Sqlite(pool) => {
            sqlx::query_as::<_, HistoryTotals>(TOTALS)
                .fetch_one(pool)
                .await
        }
    }
}

/// Spread time-pattern rows over a 24 slot array, dropping untimed plays.
pub fn hourly_distribution(patterns: &[HourlyPlays]) -> [i64; 24] {
    let mut distribution = [0i64; 24];
    for row in patterns {
        if let Some(hour) = row.hour.filter(|h| (0..24).contains(h)) {
            distribution[hour as usize] += row.play_count;
        }
    }
    distribution
}

/// Hour with the most plays; the earliest wins a tie.
pub fn busiest_hour(patterns: &[HourlyPlays]) -> Option<u8> {
    hourly_distribution(patterns)
        .iter()
        .enumerate()
        .filter(|(_, &count)| count > 0)
        .max_by(|(a_hour, a), (b_hour, b)| a.cmp(b).then(b_hour.cmp(a_hour)))
        .map(|(hour, _)| hour as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest;
    use crate::models::RawPlayEvent;
    use serde_json::json;

    fn play(artist: Option<&str>, ts: Option<&str>, ms_played: i64) -> RawPlayEvent {
        RawPlayEvent::from(json!({
            "master_metadata_track_name": "some track",
            "master_metadata_album_artist_name": artist,
            "ts": ts,
            "ms_played": ms_played
        }))
    }

    async fn store_with(events: &[RawPlayEvent]) -> Pool {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        ingest(&pool, events, 1000).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn top_artists_orders_by_play_count() {
        let pool = store_with(&[
            play(Some("Y"), None, 500),
            play(Some("X"), None, 1000),
            play(Some("X"), None, 2000),
            play(Some("X"), None, 3000),
        ])
        .await;

        let artists = top_artists(&pool).await.unwrap();

        assert_eq!(
            artists,
            vec![
                TopArtist {
                    artist_name: Some("X".to_string()),
                    play_count: 3,
                    total_time_played: Some(6000),
                },
                TopArtist {
                    artist_name: Some("Y".to_string()),
                    play_count: 1,
                    total_time_played: Some(500),
                },
            ]
        );
    }

    #[tokio::test]
    async fn top_artists_is_limited_to_ten() {
        let events: Vec<RawPlayEvent> = (0..12)
            .flat_map(|i| {
                let artist = format!("artist {:02}", i);
                (0..=i).map(move |_| play(Some(&artist), None, 100))
            })
            .collect();
        let pool = store_with(&events).await;

        let artists = top_artists(&pool).await.unwrap();

        assert_eq!(artists.len(), 10);
        assert_eq!(artists[0].artist_name.as_deref(), Some("artist 11"));
        assert_eq!(artists[0].play_count, 12);
        assert_eq!(artists[9].artist_name.as_deref(), Some("artist 02"));
    }

    #[tokio::test]
    async fn top_artists_groups_missing_artist() {
        let pool = store_with(&[play(None, None, 10), play(None, None, 20)]).await;

        let artists = top_artists(&pool).await.unwrap();

        assert_eq!(artists.len(), 1);
        assert_eq!(artists[0].artist_name, None);
        assert_eq!(artists[0].play_count, 2);
        assert_eq!(artists[0].total_time_played, Some(30));
    }

    #[tokio::test]
    async fn time_patterns_counts_per_hour() {
        let pool = store_with(&[
            play(Some("X"), Some("2024-05-01T22:10:00Z"), 1),
            play(Some("X"), Some("2024-05-02T07:59:59Z"), 1),
            play(Some("X"), Some("2024-05-03T22:45:00Z"), 1),
            play(Some("X"), None, 1),
        ])
        .await;

        let patterns = time_patterns(&pool).await.unwrap();

        assert_eq!(
            patterns,
            vec![
                HourlyPlays {
                    hour: Some(7),
                    play_count: 1
                },
                HourlyPlays {
                    hour: Some(22),
                    play_count: 2
                },
                HourlyPlays {
                    hour: None,
                    play_count: 1
                },
            ]
        );
        assert_eq!(busiest_hour(&patterns), Some(22));
    }

    #[tokio::test]
    async fn time_patterns_bucket_offset_timestamps_by_utc_hour() {
        let pool = store_with(&[
            play(Some("X"), Some("2024-01-01T23:30:00+02:00"), 1),
            play(Some("X"), Some("2024-01-01T21:05:00Z"), 1),
        ])
        .await;

        let patterns = time_patterns(&pool).await.unwrap();

        assert_eq!(
            patterns,
            vec![HourlyPlays {
                hour: Some(21),
                play_count: 2
            }]
        );
    }

    #[test]
    fn postgres_hours_ignore_session_time_zone() {
        let utc_hour = "EXTRACT(HOUR FROM played_at AT TIME ZONE 'UTC')";
        assert_eq!(PG_TIME_PATTERNS.matches(utc_hour).count(), 2);
        assert!(!PG_TIME_PATTERNS.contains("EXTRACT(HOUR FROM played_at)"));
    }

    #[tokio::test]
    async fn totals_summarise_the_table() {
        let pool = store_with(&[
            play(Some("X"), None, 1000),
            play(Some("Y"), None, 2000),
            play(Some("Y"), None, 3000),
        ])
        .await;

        let totals = totals(&pool).await.unwrap();

        assert_eq!(
            totals,
            HistoryTotals {
                total_plays: 3,
                total_ms_played: Some(6000),
                unique_artists: 2,
                unique_tracks: 1,
            }
        );
    }

    #[tokio::test]
    async fn empty_store_has_no_stats() {
        let pool = Pool::sqlite_in_memory().await.unwrap();

        assert!(top_artists(&pool).await.unwrap().is_empty());
        assert!(time_patterns(&pool).await.unwrap().is_empty());
        assert_eq!(totals(&pool).await.unwrap().total_ms_played, None);
    }

    #[test]
    fn busiest_hour_prefers_earliest_on_tie() {
        let patterns = vec![
            HourlyPlays {
                hour: Some(9),
                play_count: 4,
            },
            HourlyPlays {
                hour: Some(3),
                play_count: 4,
            },
            HourlyPlays {
                hour: None,
                play_count: 50,
            },
        ];

        assert_eq!(busiest_hour(&patterns), Some(3));
        assert_eq!(busiest_hour(&[]), None);
        assert_eq!(hourly_distribution(&patterns)[9], 4);
    }
}
