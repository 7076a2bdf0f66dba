//! SQLite-backed media repository.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, Row};

use crate::models::WorkItem;

use super::{DisplayFields, FieldPropagation, MediaRepository, RepositoryError, SliceQuery};

/// Open a database connection with proper concurrency settings.
fn open_db(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 30000;
    "#,
    )?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS media_items (
            id INTEGER PRIMARY KEY,
            url TEXT,
            payload BLOB,
            alt_text TEXT,
            parent_id INTEGER,
            parent_title TEXT,
            mime_type TEXT NOT NULL,
            file_size INTEGER,
            width INTEGER,
            height INTEGER,
            language TEXT,
            link_group INTEGER,
            categories TEXT NOT NULL DEFAULT '[]',
            keywords_meta TEXT NOT NULL DEFAULT '[]',
            attached INTEGER NOT NULL DEFAULT 0,
            title TEXT,
            caption TEXT,
            description TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_media_link_group ON media_items(link_group);

        CREATE TABLE IF NOT EXISTS asset_mappings (
            item_id INTEGER PRIMARY KEY,
            asset_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS selection_sets (
            token TEXT NOT NULL,
            item_id INTEGER NOT NULL,
            PRIMARY KEY (token, item_id)
        );
    "#,
    )?;
    Ok(())
}

/// Media repository over a single SQLite database file.
pub struct SqliteMediaRepository {
    conn: Mutex<Connection>,
}

impl SqliteMediaRepository {
    /// Open (and initialize) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, RepositoryError> {
        let conn = open_db(db_path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by init checks and tests.
    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RepositoryError> {
        self.conn.lock().map_err(|_| RepositoryError::Poisoned)
    }
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<WorkItem> {
    let categories: String = row.get("categories")?;
    let keywords_meta: String = row.get("keywords_meta")?;
    Ok(WorkItem {
        id: row.get::<_, i64>("id")? as u64,
        url: row.get("url")?,
        payload: row.get("payload")?,
        alt_text: row.get("alt_text")?,
        parent_id: row.get::<_, Option<i64>>("parent_id")?.map(|v| v as u64),
        parent_title: row.get("parent_title")?,
        mime_type: row.get("mime_type")?,
        file_size: row.get::<_, Option<i64>>("file_size")?.map(|v| v as u64),
        width: row.get::<_, Option<i64>>("width")?.map(|v| v as u32),
        height: row.get::<_, Option<i64>>("height")?.map(|v| v as u32),
        language: row.get("language")?,
        link_group: row.get::<_, Option<i64>>("link_group")?.map(|v| v as u64),
        categories: serde_json::from_str(&categories).unwrap_or_default(),
        keywords_meta: serde_json::from_str(&keywords_meta).unwrap_or_default(),
        attached: row.get::<_, i64>("attached")? != 0,
    })
}

/// Build the WHERE clause for a slice query. Category matching goes through
/// the JSON-encoded categories column, so the parameter is the quoted JSON
/// fragment.
fn slice_conditions(query: &SliceQuery) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if query.missing_only {
        conditions.push("(alt_text IS NULL OR TRIM(alt_text) = '')".to_string());
    }
    if query.attached_only {
        conditions.push("attached = 1".to_string());
    }
    if query.unprocessed_only {
        conditions.push("id NOT IN (SELECT item_id FROM asset_mappings)".to_string());
    }
    if let Some(category) = &query.category {
        conditions.push("categories LIKE '%' || ? || '%'".to_string());
        params.push(Box::new(format!("\"{}\"", category)));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" AND {}", conditions.join(" AND "))
    };
    (clause, params)
}

#[async_trait]
impl MediaRepository for SqliteMediaRepository {
    async fn next_slice(
        &self,
        cursor: u64,
        query: &SliceQuery,
        limit: u32,
    ) -> Result<Vec<WorkItem>, RepositoryError> {
        let conn = self.lock()?;
        let (clause, extra) = slice_conditions(query);
        let sql = format!(
            "SELECT * FROM media_items WHERE id > ?{} ORDER BY id ASC LIMIT ?",
            clause
        );
        let mut stmt = conn.prepare(&sql)?;

        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(cursor as i64)];
        bound.extend(extra);
        bound.push(Box::new(limit as i64));
        let refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();

        let rows = stmt.query_map(refs.as_slice(), row_to_item)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    async fn get(&self, id: u64) -> Result<Option<WorkItem>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM media_items WHERE id = ?")?;
        let mut rows = stmt.query_map(params![id as i64], row_to_item)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    async fn derivatives_of(&self, item: &WorkItem) -> Result<Vec<WorkItem>, RepositoryError> {
        let Some(group) = item.link_group else {
            return Ok(Vec::new());
        };
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM media_items WHERE link_group = ? AND id != ? ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![group as i64, item.id as i64], row_to_item)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    async fn update_alt_text(
        &self,
        id: u64,
        alt_text: &str,
        propagate: &FieldPropagation,
    ) -> Result<(), RepositoryError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE media_items SET alt_text = ? WHERE id = ?",
            params![alt_text, id as i64],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        if propagate.title {
            conn.execute(
                "UPDATE media_items SET title = ? WHERE id = ?",
                params![alt_text, id as i64],
            )?;
        }
        if propagate.caption {
            conn.execute(
                "UPDATE media_items SET caption = ? WHERE id = ?",
                params![alt_text, id as i64],
            )?;
        }
        if propagate.description {
            conn.execute(
                "UPDATE media_items SET description = ? WHERE id = ?",
                params![alt_text, id as i64],
            )?;
        }
        Ok(())
    }

    async fn record_asset_mapping(&self, id: u64, asset_id: &str) -> Result<(), RepositoryError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO asset_mappings (item_id, asset_id) VALUES (?, ?)",
            params![id as i64, asset_id],
        )?;
        Ok(())
    }

    async fn has_asset_mapping(&self, id: u64) -> Result<bool, RepositoryError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM asset_mappings WHERE item_id = ?",
            params![id as i64],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn display_fields(&self, id: u64) -> Result<Option<DisplayFields>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT title, caption, description FROM media_items WHERE id = ?")?;
        let mut rows = stmt.query_map(params![id as i64], |row| {
            Ok(DisplayFields {
                title: row.get(0)?,
                caption: row.get(1)?,
                description: row.get(2)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    async fn selection_create(&self, token: &str, ids: &[u64]) -> Result<(), RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM selection_sets WHERE token = ?", params![token])?;
        for id in ids {
            tx.execute(
                "INSERT OR IGNORE INTO selection_sets (token, item_id) VALUES (?, ?)",
                params![token, *id as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn selection_peek(&self, token: &str, limit: u32) -> Result<Vec<u64>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT item_id FROM selection_sets WHERE token = ? ORDER BY item_id ASC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![token, limit as i64], |row| {
            row.get::<_, i64>(0).map(|v| v as u64)
        })?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    async fn selection_remove(&self, token: &str, ids: &[u64]) -> Result<(), RepositoryError> {
        let conn = self.lock()?;
        for id in ids {
            conn.execute(
                "DELETE FROM selection_sets WHERE token = ? AND item_id = ?",
                params![token, *id as i64],
            )?;
        }
        Ok(())
    }

    async fn selection_len(&self, token: &str) -> Result<u64, RepositoryError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM selection_sets WHERE token = ?",
            params![token],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn count_matching(&self, query: &SliceQuery) -> Result<u64, RepositoryError> {
        let conn = self.lock()?;
        let (clause, extra) = slice_conditions(query);
        let sql = format!(
            "SELECT COUNT(*) FROM media_items WHERE id > 0{}",
            clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::ToSql> = extra.iter().map(|b| b.as_ref()).collect();
        let count: i64 = stmt.query_row(refs.as_slice(), |row| row.get(0))?;
        Ok(count as u64)
    }

    async fn upsert_item(&self, item: &WorkItem) -> Result<(), RepositoryError> {
        let conn = self.lock()?;
        conn.execute(
            r#"INSERT OR REPLACE INTO media_items
               (id, url, payload, alt_text, parent_id, parent_title, mime_type,
                file_size, width, height, language, link_group, categories,
                keywords_meta, attached)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                item.id as i64,
                item.url,
                item.payload,
                item.alt_text,
                item.parent_id.map(|v| v as i64),
                item.parent_title,
                item.mime_type,
                item.file_size.map(|v| v as i64),
                item.width.map(|v| v as i64),
                item.height.map(|v| v as i64),
                item.language,
                item.link_group.map(|v| v as i64),
                serde_json::to_string(&item.categories)?,
                serde_json::to_string(&item.keywords_meta)?,
                item.attached as i64,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64, alt: Option<&str>) -> WorkItem {
        WorkItem {
            id,
            url: Some(format!("https://cdn.example/{}.jpg", id)),
            payload: None,
            alt_text: alt.map(String::from),
            parent_id: None,
            parent_title: None,
            mime_type: "image/jpeg".to_string(),
            file_size: Some(1000),
            width: Some(640),
            height: Some(480),
            language: None,
            link_group: None,
            categories: Vec::new(),
            keywords_meta: Vec::new(),
            attached: false,
        }
    }

    #[tokio::test]
    async fn slice_respects_cursor_and_limit() {
        let repo = SqliteMediaRepository::open_in_memory().unwrap();
        for id in 1..=6 {
            repo.upsert_item(&item(id, None)).await.unwrap();
        }
        let slice = repo
            .next_slice(2, &SliceQuery::default(), 3)
            .await
            .unwrap();
        let ids: Vec<u64> = slice.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn missing_only_skips_annotated_in_query() {
        let repo = SqliteMediaRepository::open_in_memory().unwrap();
        repo.upsert_item(&item(1, None)).await.unwrap();
        repo.upsert_item(&item(2, Some("x"))).await.unwrap();
        repo.upsert_item(&item(3, Some("   "))).await.unwrap();
        let query = SliceQuery {
            missing_only: true,
            ..SliceQuery::default()
        };
        let slice = repo.next_slice(0, &query, 10).await.unwrap();
        let ids: Vec<u64> = slice.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn derivatives_share_link_group() {
        let repo = SqliteMediaRepository::open_in_memory().unwrap();
        let mut primary = item(10, None);
        primary.link_group = Some(7);
        let mut translated = item(110, None);
        translated.link_group = Some(7);
        let unrelated = item(20, None);
        repo.upsert_item(&primary).await.unwrap();
        repo.upsert_item(&translated).await.unwrap();
        repo.upsert_item(&unrelated).await.unwrap();

        let derived = repo.derivatives_of(&primary).await.unwrap();
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].id, 110);
        assert!(repo.derivatives_of(&unrelated).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn alt_text_propagates_into_display_fields() {
        let repo = SqliteMediaRepository::open_in_memory().unwrap();
        repo.upsert_item(&item(1, None)).await.unwrap();
        repo.update_alt_text(
            1,
            "a red bicycle",
            &FieldPropagation {
                title: true,
                caption: false,
                description: true,
            },
        )
        .await
        .unwrap();

        let fields = repo.display_fields(1).await.unwrap().unwrap();
        assert_eq!(fields.title.as_deref(), Some("a red bicycle"));
        assert_eq!(fields.caption, None);
        assert_eq!(fields.description.as_deref(), Some("a red bicycle"));
    }

    #[tokio::test]
    async fn selection_set_pops_down_to_empty() {
        let repo = SqliteMediaRepository::open_in_memory().unwrap();
        repo.selection_create("sel-1", &[5, 3, 9]).await.unwrap();
        assert_eq!(repo.selection_len("sel-1").await.unwrap(), 3);
        assert_eq!(
            repo.selection_peek("sel-1", 2).await.unwrap(),
            vec![3, 5]
        );
        repo.selection_remove("sel-1", &[3, 5]).await.unwrap();
        assert_eq!(repo.selection_peek("sel-1", 5).await.unwrap(), vec![9]);
        repo.selection_remove("sel-1", &[9]).await.unwrap();
        assert_eq!(repo.selection_len("sel-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unprocessed_only_excludes_mapped_items() {
        let repo = SqliteMediaRepository::open_in_memory().unwrap();
        repo.upsert_item(&item(1, None)).await.unwrap();
        repo.upsert_item(&item(2, None)).await.unwrap();
        repo.record_asset_mapping(1, "asset-abc").await.unwrap();
        assert!(repo.has_asset_mapping(1).await.unwrap());

        let query = SliceQuery {
            unprocessed_only: true,
            ..SliceQuery::default()
        };
        let slice = repo.next_slice(0, &query, 10).await.unwrap();
        let ids: Vec<u64> = slice.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2]);
    }
}
