use chrono::{DateTime, Utc};
use libsql::{Row, params};
use pulse::UserId;
use tracing::info;

use crate::error::{Result, StorageError};
use crate::pool::LibsqlPool;
use crate::{from_micros, to_micros};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub hashed_password: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            hashed_password: row.get(2)?,
            created_at: from_micros(row.get(3)?)?,
        })
    }
}

const USER_COLUMNS: &str = "id, email, hashed_password, created_at";

#[derive(Clone)]
pub struct UserRepository {
    pool: LibsqlPool,
}

impl UserRepository {
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Fails with `Conflict` when the email is already registered
    pub async fn create(&self, email: &str, hashed_password: &str) -> Result<User> {
        let conn = self.pool.get().await?;
        let created_at = Utc::now();

        let inserted = conn
            .execute(
                "INSERT INTO users (email, hashed_password, created_at) VALUES (?, ?, ?)",
                params![email, hashed_password, to_micros(created_at)],
            )
            .await;
        match inserted {
            Ok(_) => {}
            Err(err) if err.to_string().contains("UNIQUE constraint failed") => {
                return Err(StorageError::Conflict("Email already registered".to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        let id = conn.last_insert_rowid();
        info!(user_id = id, "user created");
        Ok(User {
            id,
            email: email.to_string(),
            hashed_password: hashed_password.to_string(),
            created_at: from_micros(to_micros(created_at))?,
        })
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.pool.get().await?;
        let mut rows = conn
            .query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"), params![email])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(User::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get(&self, id: UserId) -> Result<Option<User>> {
        let conn = self.pool.get().await?;
        let mut rows = conn
            .query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"), params![id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(User::from_row(&row)?)),
            None => Ok(None),
        }
    }
}
