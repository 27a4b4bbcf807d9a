use libsql::{Row, params};
use pulse::{EndpointId, Log, LogStore, NewLog, StoreError};
use serde::Deserialize;

use crate::error::{Result, StorageError};
use crate::pool::LibsqlPool;
use crate::{from_micros, to_micros};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOrder {
    Asc,
    #[default]
    Desc,
}

fn log_from_row(row: &Row) -> Result<Log> {
    let status_code = row
        .get::<Option<i64>>(2)?
        .map(u16::try_from)
        .transpose()
        .map_err(|err| StorageError::Corrupt(format!("status_code: {err}")))?;

    Ok(Log {
        id: row.get(0)?,
        endpoint_id: row.get(1)?,
        status_code,
        success: row.get::<i64>(3)? != 0,
        latency_ms: row.get(4)?,
        error_message: row.get(5)?,
        created_at: from_micros(row.get(6)?)?,
    })
}

/// Append-only health log
#[derive(Clone)]
pub struct LogRepository {
    pool: LibsqlPool,
}

impl LogRepository {
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, log: NewLog) -> Result<Log> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO health_logs
                (endpoint_id, status_code, success, latency_ms, error_message, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                log.endpoint_id,
                log.status_code.map(i64::from),
                i64::from(log.success),
                log.latency_ms,
                log.error_message.clone(),
                to_micros(log.created_at)
            ],
        )
        .await?;

        let id = conn.last_insert_rowid();
        Ok(NewLog { created_at: from_micros(to_micros(log.created_at))?, ..log }.with_id(id))
    }

    /// The `limit` most recent logs of an endpoint, in the requested order
    pub async fn recent(&self, endpoint_id: EndpointId, limit: usize, order: LogOrder) -> Result<Vec<Log>> {
        let conn = self.pool.get().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let newest_first = "SELECT id, endpoint_id, status_code, success, latency_ms, error_message, created_at
             FROM health_logs WHERE endpoint_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?";

        let sql = match order {
            LogOrder::Desc => newest_first.to_string(),
            LogOrder::Asc => format!("SELECT * FROM ({newest_first}) ORDER BY created_at ASC, id ASC"),
        };

        let mut rows = conn.query(&sql, params![endpoint_id, limit]).await?;
        let mut logs = Vec::new();
        while let Some(row) = rows.next().await? {
            logs.push(log_from_row(&row)?);
        }
        Ok(logs)
    }

    pub async fn count(&self, endpoint_id: EndpointId) -> Result<u64> {
        let conn = self.pool.get().await?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM health_logs WHERE endpoint_id = ?", params![endpoint_id])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0) as u64),
            None => Ok(0),
        }
    }
}

#[async_trait::async_trait]
impl LogStore for LogRepository {
    async fn append(&self, log: NewLog) -> std::result::Result<Log, StoreError> {
        Ok(self.insert(log).await?)
    }
}
