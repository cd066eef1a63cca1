//! Durable storage for queued mutations.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;

use super::QueuedMutation;
use crate::cache::SqliteStorage;
use crate::http::Headers;

/// FIFO storage of failed mutations, partitioned by queue tag.
pub trait QueueStorage: Send + Sync {
  /// Append a record; returns its sequence number.
  fn enqueue(&self, record: &QueuedMutation) -> Result<i64>;

  /// Records for a tag, oldest first.
  fn pending(&self, tag: &str) -> Result<Vec<QueuedMutation>>;

  /// Drop a record after its confirmed resend.
  fn remove(&self, seq: i64) -> Result<()>;

  /// Note a failed resend attempt.
  fn record_attempt(&self, seq: i64, error: &str) -> Result<()>;
}

impl QueueStorage for SqliteStorage {
  fn enqueue(&self, record: &QueuedMutation) -> Result<i64> {
    let conn = self.conn()?;
    let headers = serde_json::to_string(&record.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT INTO mutation_queue (queue_tag, replay_id, method, url, headers, body, enqueued_at, attempts, last_error)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          record.tag,
          record.replay_id,
          record.method,
          record.url,
          headers,
          record.body,
          record.enqueued_at.timestamp_millis(),
          record.attempts,
          record.last_error
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue mutation: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn pending(&self, tag: &str) -> Result<Vec<QueuedMutation>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT seq, queue_tag, replay_id, method, url, headers, body, enqueued_at, attempts, last_error
         FROM mutation_queue WHERE queue_tag = ? ORDER BY seq",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![tag], |row| {
        Ok(Row {
          seq: row.get(0)?,
          tag: row.get(1)?,
          replay_id: row.get(2)?,
          method: row.get(3)?,
          url: row.get(4)?,
          headers: row.get(5)?,
          body: row.get(6)?,
          enqueued_at: row.get(7)?,
          attempts: row.get(8)?,
          last_error: row.get(9)?,
        })
      })
      .map_err(|e| eyre!("Failed to query mutation queue: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read queued mutation: {}", e))?;

    rows.into_iter().map(Row::into_record).collect()
  }

  fn remove(&self, seq: i64) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM mutation_queue WHERE seq = ?", params![seq])
      .map_err(|e| eyre!("Failed to dequeue mutation {}: {}", seq, e))?;
    Ok(())
  }

  fn record_attempt(&self, seq: i64, error: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "UPDATE mutation_queue SET attempts = attempts + 1, last_error = ? WHERE seq = ?",
        params![error, seq],
      )
      .map_err(|e| eyre!("Failed to update mutation {}: {}", seq, e))?;
    Ok(())
  }
}

struct Row {
  seq: i64,
  tag: String,
  replay_id: String,
  method: String,
  url: String,
  headers: String,
  body: Vec<u8>,
  enqueued_at: i64,
  attempts: u32,
  last_error: Option<String>,
}

impl Row {
  fn into_record(self) -> Result<QueuedMutation> {
    let headers: Headers = serde_json::from_str(&self.headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

    Ok(QueuedMutation {
      seq: self.seq,
      tag: self.tag,
      replay_id: self.replay_id,
      method: self.method,
      url: self.url,
      headers,
      body: self.body,
      enqueued_at: from_millis(self.enqueued_at)?,
      attempts: self.attempts,
      last_error: self.last_error,
    })
  }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
  Utc
    .timestamp_millis_opt(ms)
    .single()
    .ok_or_else(|| eyre!("Invalid enqueue timestamp {}", ms))
}
