pub mod directory;

use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, Pool, Sqlite,
};

use crate::models::{NodeRecord, OperatingSystem, UpdateNode, UserRecord};

pub use directory::{DirectoryError, NodeDirectory};

pub type DbPool = Pool<Sqlite>;

#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

#[derive(FromRow)]
struct NodeRow {
    id: String,
    name: String,
    operating_system: String,
    tunnel_address: String,
    created_at: String,
    updated_at: String,
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    username: String,
    password_hash: String,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    // ==================== Nodes ====================

    pub async fn insert_node(&self, node: &NodeRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO nodes (id, name, operating_system, tunnel_address, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&node.id)
        .bind(&node.name)
        .bind(node.operating_system.to_string())
        .bind(&node.tunnel_address)
        .bind(node.created_at.to_rfc3339())
        .bind(node.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a node by ID
    pub async fn get_node(&self, id: &str) -> Result<Option<NodeRecord>, sqlx::Error> {
        let row: Option<NodeRow> = sqlx::query_as(
            "SELECT id, name, operating_system, tunnel_address, created_at, updated_at FROM nodes WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_node).transpose()
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeRecord>, sqlx::Error> {
        let rows: Vec<NodeRow> = sqlx::query_as(
            "SELECT id, name, operating_system, tunnel_address, created_at, updated_at FROM nodes ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_node).collect()
    }

    pub async fn count_nodes(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM nodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Update name and operating system; `None` when the node does not exist
    pub async fn update_node(
        &self,
        id: &str,
        update: &UpdateNode,
    ) -> Result<Option<NodeRecord>, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE nodes SET name = ?, operating_system = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&update.name)
        .bind(update.operating_system.to_string())
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_node(id).await
    }

    // ==================== Users ====================

    pub async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, username, password_hash FROM users WHERE username = ? LIMIT 1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|row| UserRecord {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
        }))
    }

    /// Replace every stored user with `user`
    pub async fn replace_users(&self, user: &UserRecord) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM users").execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    fn row_to_node(row: NodeRow) -> Result<NodeRecord, sqlx::Error> {
        let operating_system = row
            .operating_system
            .parse::<OperatingSystem>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(NodeRecord {
            id: row.id,
            name: row.name,
            operating_system,
            tunnel_address: row.tunnel_address,
            created_at: row
                .created_at
                .parse::<DateTime<Utc>>()
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            updated_at: row
                .updated_at
                .parse::<DateTime<Utc>>()
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        })
    }
}
