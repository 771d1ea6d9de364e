//! Chunked, transactional ingestion of listening-history exports.
//!
//! The export is split into fixed-size chunks which are written one after
//! another, each inside its own transaction. Events the mapper rejects are
//! skipped and recorded; the first store error rolls back the current chunk
//! and stops the whole ingestion, leaving earlier chunks committed.

use serde::Serialize;
use thiserror::Error;

use crate::db::{ChunkTransaction, Pool};
use crate::mapper::{self, RejectReason};
use crate::models::RawPlayEvent;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// A skipped event and its position in the uploaded array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub index: usize,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Rows committed to the store.
    pub inserted: u64,
    /// Events rejected by the mapper.
    pub skipped: u64,
    /// Accepted events discarded when their chunk was rolled back.
    pub rolled_back: u64,
    pub chunks_committed: usize,
    pub rejections: Vec<Rejection>,
    /// First hard error, if the ingestion was aborted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestSummary {
    /// Events looked at before the ingestion finished or aborted.
    pub fn processed(&self) -> u64 {
        self.inserted + self.skipped + self.rolled_back
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("upload is not a JSON array: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    /// The chunk was rolled back; `summary` covers the work done before it.
    #[error("store error in chunk {chunk}: {source}")]
    Store {
        chunk: usize,
        summary: Box<IngestSummary>,
        #[source]
        source: sqlx::Error,
    },
}

/// Parse an uploaded file into play events.
pub fn parse_events(bytes: &[u8]) -> Result<Vec<RawPlayEvent>, IngestError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Parse `bytes` as a JSON array and ingest it.
pub async fn ingest_json(
    pool: &Pool,
    bytes: &[u8],
    chunk_size: usize,
) -> Result<IngestSummary, IngestError> {
    let events = parse_events(bytes)?;
    ingest(pool, &events, chunk_size).await
}

/// Write `events` to the store in sequential chunks of `chunk_size`.
pub async fn ingest(
    pool: &Pool,
    events: &[RawPlayEvent],
    chunk_size: usize,
) -> Result<IngestSummary, IngestError> {
    if chunk_size == 0 {
        return Err(IngestError::InvalidChunkSize);
    }

    let total_chunks = events.len().div_ceil(chunk_size);
    tracing::info!(
        "ingesting {} play events in {} chunks of up to {}",
        events.len(),
        total_chunks,
        chunk_size
    );

    let mut summary = IngestSummary::default();

    for (chunk, records) in events.chunks(chunk_size).enumerate() {
        let offset = chunk * chunk_size;
        match insert_chunk(pool, records, offset, &mut summary).await {
            Ok(inserted) => {
                summary.inserted += inserted;
                summary.chunks_committed += 1;
                tracing::debug!(
                    "committed chunk {}/{} ({} rows)",
                    chunk + 1,
                    total_chunks,
                    inserted
                );
            }
            Err(e) => {
                tracing::error!(
                    "chunk {}/{} rolled back, aborting ingestion: {}",
                    chunk + 1,
                    total_chunks,
                    e
                );
                summary.error = Some(e.to_string());
                return Err(IngestError::Store {
                    chunk,
                    summary: Box::new(summary),
                    source: e,
                });
            }
        }
    }

    if summary.skipped > 0 {
        tracing::warn!(
            "skipped {} of {} play events",
            summary.skipped,
            events.len()
        );
    }
    tracing::info!(
        "ingestion complete: {} inserted, {} skipped",
        summary.inserted,
        summary.skipped
    );

    Ok(summary)
}

/// Insert one chunk inside a single transaction, returning the committed row count.
async fn insert_chunk(
    pool: &Pool,
    events: &[RawPlayEvent],
    offset: usize,
    summary: &mut IngestSummary,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut accepted = 0u64;

    for (position, event) in events.iter().enumerate() {
        let index = offset + position;
        let record = match mapper::map(event) {
            Ok(record) => record,
            Err(reason) => {
                tracing::debug!("skipping play event {}: {}", index, reason);
                summary.skipped += 1;
                summary.rejections.push(Rejection { index, reason });
                continue;
            }
        };

        let inserted = tx.insert(&record).await;
        if let Err(e) = inserted {
            tracing::error!("failed to insert play event {}: {}", index, e);
            // the failing event was accepted too
            summary.rolled_back += accepted + 1;
            rollback(tx).await;
            return Err(e);
        }
        accepted += 1;
    }

    if let Err(e) = tx.commit().await {
        tracing::error!("failed to commit transaction: {}", e);
        summary.rolled_back += accepted;
        return Err(e);
    }

    Ok(accepted)
}

async fn rollback(tx: ChunkTransaction) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!("failed to roll back transaction: {}", e);
    }
}
