use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, QueryBuilder, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{ItemId, ItemKind, ListId, SessionId, UserId},
    protocol::{
        ItemSnapshot, ItemUpdate, ItemsFilter, ListDetails, ListStats, ListSummary, NewItem, SortBy,
        SortOrder, UserIdentity,
    },
};

const MEMORY_DATABASE_URL: &str = "sqlite::memory:";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to an in-memory database is its own database.
        let max_connections = if database_url == MEMORY_DATABASE_URL { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, name: &str, email: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (id, name, email, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(email) DO UPDATE SET name=excluded.name
             RETURNING id",
        )
        .bind(UserId::generate().as_str())
        .bind(name)
        .bind(email)
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<String, _>(0)))
    }

    pub async fn create_session(
        &self,
        user_id: &UserId,
        valid_until: DateTime<Utc>,
    ) -> Result<SessionId> {
        let session_id = SessionId::generate();
        sqlx::query("INSERT INTO sessions (id, user_id, valid_until, created_at) VALUES (?, ?, ?, ?)")
            .bind(session_id.as_str())
            .bind(user_id.as_str())
            .bind(valid_until.timestamp_millis())
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to create session for user {user_id}"))?;
        Ok(session_id)
    }

    /// Resolves a session token to the owning user, or `None` when the session
    /// is unknown or expired.
    pub async fn valid_user_session(&self, session_id: &SessionId) -> Result<Option<UserIdentity>> {
        let row = sqlx::query(
            "SELECT u.id, u.name, u.email, s.valid_until
             FROM sessions s
             INNER JOIN users u ON u.id = s.user_id
             WHERE s.id = ?",
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        if row.get::<i64, _>(3) <= Utc::now().timestamp_millis() {
            return Ok(None);
        }
        Ok(Some(UserIdentity {
            id: UserId(row.get::<String, _>(0)),
            name: row.get::<String, _>(1),
            email: row.get::<String, _>(2),
        }))
    }

    pub async fn create_list(&self, name: &str, owner: &UserId) -> Result<ListId> {
        let list_id = ListId::generate();
        sqlx::query("INSERT INTO lists (id, name, created_at) VALUES (?, ?, ?)")
            .bind(list_id.as_str())
            .bind(name)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        self.grant_list_access(&list_id, owner).await?;
        Ok(list_id)
    }

    /// Lists the user can open, oldest first.
    pub async fn lists_for_user(&self, user_id: &UserId) -> Result<Vec<ListSummary>> {
        let rows = sqlx::query(
            "SELECT l.id, l.name
             FROM lists l
             INNER JOIN users_to_lists ul ON ul.list_id = l.id
             WHERE ul.user_id = ?
             ORDER BY l.created_at ASC, l.rowid ASC",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(ListSummary {
                    id: ListId(row.try_get("id")?),
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    pub async fn rename_list(&self, list_id: &ListId, name: &str) -> Result<Option<ListSummary>> {
        let row = sqlx::query("UPDATE lists SET name = ? WHERE id = ? RETURNING id, name")
            .bind(name)
            .bind(list_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to rename list {list_id}"))?;
        row.map(|row| {
            Ok(ListSummary {
                id: ListId(row.try_get("id")?),
                name: row.try_get("name")?,
            })
        })
        .transpose()
    }

    /// The list with its members and item statistics, or `None` when it does
    /// not exist.
    pub async fn list_details(&self, list_id: &ListId) -> Result<Option<ListDetails>> {
        let Some(list) = sqlx::query("SELECT id, name, created_at FROM lists WHERE id = ?")
            .bind(list_id.as_str())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let users = sqlx::query(
            "SELECT u.id, u.name, u.email
             FROM users u
             INNER JOIN users_to_lists ul ON ul.user_id = u.id
             WHERE ul.list_id = ?
             ORDER BY u.name ASC, u.id ASC",
        )
        .bind(list_id.as_str())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(UserIdentity {
                id: UserId(row.try_get("id")?),
                name: row.try_get("name")?,
                email: row.try_get("email")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let stats = sqlx::query(
            "SELECT COUNT(id) AS item_count,
                    COUNT(watched_at) AS watched_count,
                    COALESCE(SUM(duration), 0) AS total_duration,
                    COALESCE(SUM(CASE WHEN watched_at IS NOT NULL THEN duration ELSE 0 END), 0)
                        AS watched_duration,
                    AVG(rating) AS average_rating
             FROM list_items
             WHERE list_id = ?",
        )
        .bind(list_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(ListDetails {
            id: ListId(list.try_get("id")?),
            name: list.try_get("name")?,
            created_at: millis_to_datetime(list.try_get("created_at")?)?,
            users,
            stats: ListStats {
                count: stats.try_get("item_count")?,
                watched_count: stats.try_get("watched_count")?,
                total_duration: stats.try_get("total_duration")?,
                watched_duration: stats.try_get("watched_duration")?,
                average_rating: stats.try_get("average_rating")?,
            },
        }))
    }

    pub async fn grant_list_access(&self, list_id: &ListId, user_id: &UserId) -> Result<()> {
        sqlx::query(
            "INSERT INTO users_to_lists (user_id, list_id) VALUES (?, ?)
             ON CONFLICT(user_id, list_id) DO NOTHING",
        )
        .bind(user_id.as_str())
        .bind(list_id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to grant user {user_id} access to list {list_id}"))?;
        Ok(())
    }

    pub async fn has_list_access(&self, list_id: &ListId, user_id: &UserId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM users_to_lists WHERE user_id = ? AND list_id = ? LIMIT 1")
            .bind(user_id.as_str())
            .bind(list_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn insert_item(&self, list_id: &ListId, item: &NewItem) -> Result<ItemSnapshot> {
        let item_id = ItemId::generate();
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO list_items (
                id, list_id, kind, external_id, title, overview, duration, episode_count,
                rating, release_date, poster_url, watched_at, priority, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)",
        )
        .bind(item_id.as_str())
        .bind(list_id.as_str())
        .bind(item.kind.as_str())
        .bind(item.external_id)
        .bind(&item.title)
        .bind(&item.overview)
        .bind(item.duration)
        .bind(item.episode_count)
        .bind(item.rating)
        .bind(item.release_date.map(|d| d.timestamp_millis()))
        .bind(&item.poster_url)
        .bind(item.priority)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert item into list {list_id}"))?;

        self.load_item(list_id, &item_id)
            .await?
            .ok_or_else(|| anyhow!("item {item_id} vanished after insert"))
    }

    pub async fn load_item(&self, list_id: &ListId, item_id: &ItemId) -> Result<Option<ItemSnapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM list_items WHERE list_id = ? AND id = ?"
        ))
        .bind(list_id.as_str())
        .bind(item_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    /// Applies a partial edit and returns the committed item, or `None` when the
    /// item does not belong to the list. Only the columns present in `update`
    /// are written, in a single statement.
    pub async fn update_item(
        &self,
        list_id: &ListId,
        item_id: &ItemId,
        update: &ItemUpdate,
    ) -> Result<Option<ItemSnapshot>> {
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE list_items SET updated_at = ");
        query.push_bind(Utc::now().timestamp_millis());
        if let Some(title) = &update.title {
            query.push(", title = ").push_bind(title.clone());
        }
        if let Some(overview) = &update.overview {
            query.push(", overview = ").push_bind(overview.clone());
        }
        if let Some(kind) = update.kind {
            query.push(", kind = ").push_bind(kind.as_str());
        }
        if let Some(duration) = update.duration {
            query.push(", duration = ").push_bind(duration);
        }
        if let Some(episode_count) = update.episode_count {
            query.push(", episode_count = ").push_bind(episode_count);
        }
        if let Some(priority) = update.priority {
            query.push(", priority = ").push_bind(priority);
        }
        if let Some(watched_at) = update.watched_at {
            query
                .push(", watched_at = ")
                .push_bind(watched_at.map(|d| d.timestamp_millis()));
        }
        query
            .push(" WHERE list_id = ")
            .push_bind(list_id.as_str())
            .push(" AND id = ")
            .push_bind(item_id.as_str())
            .push(format!(" RETURNING {ITEM_COLUMNS}"));

        let row = query
            .build()
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to update item {item_id}"))?;
        row.as_ref().map(item_from_row).transpose()
    }

    pub async fn set_watched_at(
        &self,
        list_id: &ListId,
        item_id: &ItemId,
        watched_at: Option<DateTime<Utc>>,
    ) -> Result<Option<ItemSnapshot>> {
        let row = sqlx::query(&format!(
            "UPDATE list_items SET watched_at = ?, updated_at = ?
             WHERE list_id = ? AND id = ?
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(watched_at.map(|d| d.timestamp_millis()))
        .bind(Utc::now().timestamp_millis())
        .bind(list_id.as_str())
        .bind(item_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to set watch state of item {item_id}"))?;
        row.as_ref().map(item_from_row).transpose()
    }

    pub async fn remove_item(&self, list_id: &ListId, item_id: &ItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM list_items WHERE list_id = ? AND id = ?")
            .bind(list_id.as_str())
            .bind(item_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lists items with unwatched entries first, then by the requested column,
    /// then most recently watched.
    pub async fn list_items(&self, list_id: &ListId, filter: &ItemsFilter) -> Result<Vec<ItemSnapshot>> {
        let column = match filter.sort_by {
            SortBy::Duration => "duration",
            SortBy::Rating => "rating",
            SortBy::DateAdded => "created_at",
            SortBy::Priority => "priority",
        };
        let direction = match filter.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS}
             FROM list_items
             WHERE list_id = ?
             ORDER BY CASE WHEN watched_at IS NOT NULL THEN 1 ELSE 0 END,
                      {column} {direction},
                      watched_at DESC,
                      created_at ASC"
        ))
        .bind(list_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }
}

const ITEM_COLUMNS: &str = "id, kind, external_id, title, overview, duration, episode_count, \
     rating, release_date, poster_url, watched_at, priority, created_at";

fn item_from_row(row: &SqliteRow) -> Result<ItemSnapshot> {
    Ok(ItemSnapshot {
        id: ItemId(row.try_get("id")?),
        kind: item_kind(&row.try_get::<String, _>("kind")?)?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        overview: row.try_get("overview")?,
        duration: row.try_get("duration")?,
        episode_count: row.try_get("episode_count")?,
        rating: row.try_get("rating")?,
        release_date: optional_millis(row.try_get("release_date")?)?,
        poster_url: row.try_get("poster_url")?,
        watched_at: optional_millis(row.try_get("watched_at")?)?,
        priority: row.try_get("priority")?,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
    })
}

fn item_kind(raw: &str) -> Result<ItemKind> {
    ItemKind::parse(raw).ok_or_else(|| anyhow!("unknown item kind '{raw}'"))
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| anyhow!("timestamp out of range: {millis}"))
}

fn optional_millis(millis: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    millis.map(millis_to_datetime).transpose()
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == MEMORY_DATABASE_URL || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
