use chrono::{DateTime, Utc};
use libsql::{Connection, Row, params};
use pulse::{
    Cursor, Endpoint, EndpointId, HttpMethod, Registry, RegistryChange, RegistryEvent, StoreError,
    UserId,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::pool::LibsqlPool;
use crate::{from_micros, to_micros};

const ENDPOINT_COLUMNS: &str =
    "id, user_id, name, url, method, expected_status, interval_seconds, is_active, created_at";

fn default_expected_status() -> u16 {
    200
}

fn default_interval() -> u32 {
    60
}

fn default_active() -> bool {
    true
}

/// Fields a user supplies when creating an endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewEndpoint {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    #[serde(default = "default_interval")]
    pub interval_seconds: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// Partial update; absent fields keep their value
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EndpointPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<HttpMethod>,
    pub expected_status: Option<u16>,
    pub interval_seconds: Option<u32>,
    pub is_active: Option<bool>,
}

impl EndpointPatch {
    pub fn apply(&self, endpoint: &mut Endpoint) {
        if let Some(name) = &self.name {
            endpoint.name = name.clone();
        }
        if let Some(url) = &self.url {
            endpoint.url = url.clone();
        }
        if let Some(method) = self.method {
            endpoint.method = method;
        }
        if let Some(expected_status) = self.expected_status {
            endpoint.expected_status = expected_status;
        }
        if let Some(interval_seconds) = self.interval_seconds {
            endpoint.interval_seconds = interval_seconds;
        }
        if let Some(is_active) = self.is_active {
            endpoint.is_active = is_active;
        }
    }
}

fn endpoint_from_row(row: &Row) -> Result<Endpoint> {
    let method: String = row.get(4)?;
    let method = method
        .parse::<HttpMethod>()
        .map_err(|err| StorageError::Corrupt(err.to_string()))?;

    Ok(Endpoint {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        method,
        expected_status: u16::try_from(row.get::<i64>(5)?)
            .map_err(|err| StorageError::Corrupt(format!("expected_status: {err}")))?,
        interval_seconds: u32::try_from(row.get::<i64>(6)?)
            .map_err(|err| StorageError::Corrupt(format!("interval_seconds: {err}")))?,
        is_active: row.get::<i64>(7)? != 0,
        created_at: from_micros(row.get(8)?)?,
    })
}

/// Append a change to the feed; call inside the transaction that made it
async fn record_event(conn: &Connection, event: &RegistryEvent, at: DateTime<Utc>) -> Result<Cursor> {
    let payload = serde_json::to_string(event)?;
    conn.execute(
        "INSERT INTO endpoint_events (endpoint_id, kind, payload, created_at) VALUES (?, ?, ?, ?)",
        params![event.endpoint_id(), event.kind(), payload, to_micros(at)],
    )
    .await?;
    Ok(conn.last_insert_rowid())
}

async fn fetch_owned(conn: &Connection, user_id: UserId, id: EndpointId) -> Result<Option<Endpoint>> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {ENDPOINT_COLUMNS} FROM endpoints
                 WHERE id = ? AND user_id = ? AND deleted_at IS NULL"
            ),
            params![id, user_id],
        )
        .await?;

    match rows.next().await? {
        Some(row) => Ok(Some(endpoint_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Endpoint configuration, scoped to its owner, plus the change feed
#[derive(Clone)]
pub struct EndpointRepository {
    pool: LibsqlPool,
}

impl EndpointRepository {
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, user_id: UserId, new: NewEndpoint) -> Result<Endpoint> {
        let conn = self.pool.get().await?;
        let now = Utc::now();
        let tx = conn.transaction().await?;

        tx.execute(
            "INSERT INTO endpoints
                (user_id, name, url, method, expected_status, interval_seconds, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                user_id,
                new.name.clone(),
                new.url.clone(),
                new.method.as_str(),
                i64::from(new.expected_status),
                i64::from(new.interval_seconds),
                i64::from(new.is_active),
                to_micros(now),
                to_micros(now)
            ],
        )
        .await?;

        let endpoint = Endpoint {
            id: tx.last_insert_rowid(),
            user_id,
            name: new.name,
            url: new.url,
            method: new.method,
            expected_status: new.expected_status,
            interval_seconds: new.interval_seconds,
            is_active: new.is_active,
            created_at: from_micros(to_micros(now))?,
        };
        record_event(&tx, &RegistryEvent::Created(endpoint.clone()), now).await?;
        tx.commit().await?;

        info!(endpoint_id = endpoint.id, user_id, "endpoint created");
        Ok(endpoint)
    }

    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Endpoint>> {
        let conn = self.pool.get().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ENDPOINT_COLUMNS} FROM endpoints
                     WHERE user_id = ? AND deleted_at IS NULL ORDER BY id"
                ),
                params![user_id],
            )
            .await?;

        let mut endpoints = Vec::new();
        while let Some(row) = rows.next().await? {
            endpoints.push(endpoint_from_row(&row)?);
        }
        Ok(endpoints)
    }

    pub async fn get_for_user(&self, user_id: UserId, id: EndpointId) -> Result<Option<Endpoint>> {
        let conn = self.pool.get().await?;
        fetch_owned(&conn, user_id, id).await
    }

    /// Apply `patch` to an owned endpoint. `None` when it does not exist for this user.
    ///
    /// `validate` sees the merged record before anything is written.
    pub async fn update<E>(
        &self,
        user_id: UserId,
        id: EndpointId,
        patch: &EndpointPatch,
        validate: impl FnOnce(&Endpoint) -> std::result::Result<(), E>,
    ) -> Result<Option<std::result::Result<Endpoint, E>>> {
        let conn = self.pool.get().await?;
        let tx = conn.transaction().await?;

        let Some(current) = fetch_owned(&tx, user_id, id).await? else {
            return Ok(None);
        };
        let mut updated = current.clone();
        patch.apply(&mut updated);
        if let Err(err) = validate(&updated) {
            return Ok(Some(Err(err)));
        }

        let now = Utc::now();
        tx.execute(
            "UPDATE endpoints
             SET name = ?, url = ?, method = ?, expected_status = ?, interval_seconds = ?,
                 is_active = ?, updated_at = ?
             WHERE id = ?",
            params![
                updated.name.clone(),
                updated.url.clone(),
                updated.method.as_str(),
                i64::from(updated.expected_status),
                i64::from(updated.interval_seconds),
                i64::from(updated.is_active),
                to_micros(now),
                id
            ],
        )
        .await?;

        let event = match (current.is_active, updated.is_active) {
            (false, true) => RegistryEvent::Activated(updated.clone()),
            (true, false) => RegistryEvent::Deactivated(updated.clone()),
            _ => RegistryEvent::Updated(updated.clone()),
        };
        record_event(&tx, &event, now).await?;
        tx.commit().await?;

        info!(endpoint_id = id, kind = event.kind(), "endpoint updated");
        Ok(Some(Ok(updated)))
    }

    /// Soft delete; logs stay readable. Returns false when nothing was deleted.
    pub async fn delete(&self, user_id: UserId, id: EndpointId) -> Result<bool> {
        let conn = self.pool.get().await?;
        let now = Utc::now();
        let tx = conn.transaction().await?;

        let affected = tx
            .execute(
                "UPDATE endpoints SET deleted_at = ?, is_active = 0, updated_at = ?
                 WHERE id = ? AND user_id = ? AND deleted_at IS NULL",
                params![to_micros(now), to_micros(now), id, user_id],
            )
            .await?;
        if affected == 0 {
            return Ok(false);
        }

        record_event(&tx, &RegistryEvent::Deleted(id), now).await?;
        tx.commit().await?;

        info!(endpoint_id = id, user_id, "endpoint deleted");
        Ok(true)
    }

    /// Whether `id` ever existed for this user, deleted or not
    pub async fn is_owned_by(&self, user_id: UserId, id: EndpointId) -> Result<bool> {
        let conn = self.pool.get().await?;
        let mut rows = conn
            .query("SELECT 1 FROM endpoints WHERE id = ? AND user_id = ?", params![id, user_id])
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// Drop feed entries older than `before`; returns how many were removed
    pub async fn prune_events(&self, before: DateTime<Utc>) -> Result<u64> {
        let conn = self.pool.get().await?;
        let removed = conn
            .execute("DELETE FROM endpoint_events WHERE created_at < ?", params![to_micros(before)])
            .await?;
        if removed > 0 {
            debug!(removed, "pruned endpoint events");
        }
        Ok(removed)
    }

    async fn active(&self) -> Result<Vec<Endpoint>> {
        let conn = self.pool.get().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ENDPOINT_COLUMNS} FROM endpoints
                     WHERE is_active = 1 AND deleted_at IS NULL ORDER BY id"
                ),
                (),
            )
            .await?;

        let mut endpoints = Vec::new();
        while let Some(row) = rows.next().await? {
            endpoints.push(endpoint_from_row(&row)?);
        }
        Ok(endpoints)
    }

    async fn cursor(&self) -> Result<Cursor> {
        let conn = self.pool.get().await?;
        let mut rows = conn.query("SELECT COALESCE(MAX(id), 0) FROM endpoint_events", ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    async fn changes(&self, cursor: Cursor, limit: usize) -> Result<Vec<RegistryChange>> {
        let conn = self.pool.get().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = conn
            .query(
                "SELECT id, payload FROM endpoint_events WHERE id > ? ORDER BY id LIMIT ?",
                params![cursor, limit],
            )
            .await?;

        let mut changes = Vec::new();
        while let Some(row) = rows.next().await? {
            let payload: String = row.get(1)?;
            changes.push(RegistryChange { cursor: row.get(0)?, event: serde_json::from_str(&payload)? });
        }
        Ok(changes)
    }
}

#[async_trait::async_trait]
impl Registry for EndpointRepository {
    async fn load_active(&self) -> std::result::Result<Vec<Endpoint>, StoreError> {
        Ok(self.active().await?)
    }

    async fn latest_cursor(&self) -> std::result::Result<Cursor, StoreError> {
        Ok(self.cursor().await?)
    }

    async fn changes_since(
        &self,
        cursor: Cursor,
        limit: usize,
    ) -> std::result::Result<Vec<RegistryChange>, StoreError> {
        Ok(self.changes(cursor, limit).await?)
    }
}
