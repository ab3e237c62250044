//! SQLite metadata store adapter
//!
//! Typed operations over the relational schema: access keys, buckets,
//! objects, multipart uploads and parts. Statements are short and the
//! connection sits behind a mutex; handlers perform a small number of
//! queries per request. Multi-row state transitions (multipart complete,
//! access-key deletion) run inside a single transaction.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Metadata store errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Conflict(String),
}

/// Bucket access policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketAcl {
    Private,
    PublicRead,
}

impl BucketAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketAcl::Private => "private",
            BucketAcl::PublicRead => "public-read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(BucketAcl::Private),
            "public-read" => Some(BucketAcl::PublicRead),
            _ => None,
        }
    }
}

/// A credential pair. The secret is persisted; the admin API returns it
/// exactly once, on creation.
#[derive(Debug, Clone)]
pub struct AccessKey {
    pub id: i64,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub display_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A bucket row
#[derive(Debug, Clone)]
pub struct Bucket {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub region: String,
    pub acl: BucketAcl,
    pub max_size: u64,
    pub created_at: DateTime<Utc>,
}

/// An object row. `storage_path` is advisory; readers derive the real
/// filesystem location from (bucket, key).
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub id: i64,
    pub bucket_id: i64,
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
    pub storage_path: String,
    pub metadata: HashMap<String, String>,
    pub last_modified: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// An in-progress multipart upload row
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub id: i64,
    pub upload_id: String,
    pub bucket_id: i64,
    pub key: String,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
    pub initiated_at: DateTime<Utc>,
}

/// A staged multipart part row
#[derive(Debug, Clone)]
pub struct PartRecord {
    pub id: i64,
    pub upload_id: String,
    pub part_number: u32,
    pub size: u64,
    pub etag: String,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS access_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    access_key_id TEXT NOT NULL UNIQUE,
    secret_access_key TEXT NOT NULL,
    display_name TEXT NOT NULL DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS buckets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    owner_id INTEGER NOT NULL REFERENCES access_keys(id),
    region TEXT NOT NULL,
    acl TEXT NOT NULL DEFAULT 'private' CHECK (acl IN ('private', 'public-read')),
    max_size INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bucket_id INTEGER NOT NULL REFERENCES buckets(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    size INTEGER NOT NULL,
    etag TEXT NOT NULL,
    content_type TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    last_modified TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (bucket_id, key)
);

CREATE INDEX IF NOT EXISTS idx_objects_bucket_key ON objects (bucket_id, key);

CREATE TABLE IF NOT EXISTS multipart_uploads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    upload_id TEXT NOT NULL UNIQUE,
    bucket_id INTEGER NOT NULL,
    key TEXT NOT NULL,
    content_type TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    initiated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS multipart_parts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    upload_id TEXT NOT NULL REFERENCES multipart_uploads(upload_id) ON DELETE CASCADE,
    part_number INTEGER NOT NULL,
    size INTEGER NOT NULL,
    etag TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (upload_id, part_number)
);
"#;

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn metadata_to_json(metadata: &HashMap<String, String>) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

fn metadata_from_json(s: &str) -> HashMap<String, String> {
    serde_json::from_str(s).unwrap_or_default()
}

/// Escape LIKE wildcards in a user-supplied prefix so `%`/`_` in keys
/// match literally. `\` is the escape character.
fn like_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if c == '\\' || c == '%' || c == '_' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// The metadata store handle.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // === Access keys ===

    pub fn insert_access_key(
        &self,
        access_key_id: &str,
        secret_access_key: &str,
        display_name: &str,
    ) -> Result<AccessKey, DbError> {
        let conn = self.conn.lock();
        let now = now_str();
        conn.execute(
            "INSERT INTO access_keys (access_key_id, secret_access_key, display_name, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)",
            params![access_key_id, secret_access_key, display_name, now],
        )?;
        let id = conn.last_insert_rowid();
        Ok(AccessKey {
            id,
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            display_name: display_name.to_string(),
            is_active: true,
            created_at: parse_ts(&now),
            updated_at: parse_ts(&now),
        })
    }

    pub fn get_access_key(&self, access_key_id: &str) -> Result<Option<AccessKey>, DbError> {
        let conn = self.conn.lock();
        let key = conn
            .query_row(
                "SELECT id, access_key_id, secret_access_key, display_name, is_active, created_at, updated_at
                 FROM access_keys WHERE access_key_id = ?1",
                params![access_key_id],
                row_to_access_key,
            )
            .optional()?;
        Ok(key)
    }

    pub fn get_access_key_by_id(&self, id: i64) -> Result<Option<AccessKey>, DbError> {
        let conn = self.conn.lock();
        let key = conn
            .query_row(
                "SELECT id, access_key_id, secret_access_key, display_name, is_active, created_at, updated_at
                 FROM access_keys WHERE id = ?1",
                params![id],
                row_to_access_key,
            )
            .optional()?;
        Ok(key)
    }

    pub fn list_access_keys(&self) -> Result<Vec<AccessKey>, DbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, access_key_id, secret_access_key, display_name, is_active, created_at, updated_at
             FROM access_keys ORDER BY id",
        )?;
        let keys = stmt
            .query_map([], row_to_access_key)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    pub fn update_access_key(
        &self,
        access_key_id: &str,
        display_name: Option<&str>,
        is_active: Option<bool>,
    ) -> Result<bool, DbError> {
        let conn = self.conn.lock();
        let now = now_str();
        let changed = conn.execute(
            "UPDATE access_keys SET
                display_name = COALESCE(?2, display_name),
                is_active = COALESCE(?3, is_active),
                updated_at = ?4
             WHERE access_key_id = ?1",
            params![access_key_id, display_name, is_active, now],
        )?;
        Ok(changed > 0)
    }

    /// Delete an access key. Buckets it owns are reassigned to another
    /// key; if the store holds no other key the delete is refused.
    pub fn delete_access_key(&self, access_key_id: &str) -> Result<bool, DbError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let key_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM access_keys WHERE access_key_id = ?1",
                params![access_key_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(key_id) = key_id else {
            return Ok(false);
        };

        let owned: i64 = tx.query_row(
            "SELECT COUNT(*) FROM buckets WHERE owner_id = ?1",
            params![key_id],
            |row| row.get(0),
        )?;

        if owned > 0 {
            let heir: Option<i64> = tx
                .query_row(
                    "SELECT id FROM access_keys WHERE id != ?1 ORDER BY id LIMIT 1",
                    params![key_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(heir) = heir else {
                return Err(DbError::Conflict(
                    "cannot delete the only access key while it owns buckets".to_string(),
                ));
            };
            tx.execute(
                "UPDATE buckets SET owner_id = ?1 WHERE owner_id = ?2",
                params![heir, key_id],
            )?;
        }

        tx.execute("DELETE FROM access_keys WHERE id = ?1", params![key_id])?;
        tx.commit()?;
        Ok(true)
    }

    // === Buckets ===

    pub fn insert_bucket(
        &self,
        name: &str,
        owner_id: i64,
        region: &str,
        acl: BucketAcl,
        max_size: u64,
    ) -> Result<Bucket, DbError> {
        let conn = self.conn.lock();
        let now = now_str();
        conn.execute(
            "INSERT INTO buckets (name, owner_id, region, acl, max_size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![name, owner_id, region, acl.as_str(), max_size as i64, now],
        )?;
        Ok(Bucket {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            owner_id,
            region: region.to_string(),
            acl,
            max_size,
            created_at: parse_ts(&now),
        })
    }

    pub fn get_bucket(&self, name: &str) -> Result<Option<Bucket>, DbError> {
        let conn = self.conn.lock();
        let bucket = conn
            .query_row(
                "SELECT id, name, owner_id, region, acl, max_size, created_at
                 FROM buckets WHERE name = ?1",
                params![name],
                row_to_bucket,
            )
            .optional()?;
        Ok(bucket)
    }

    pub fn list_buckets(&self) -> Result<Vec<Bucket>, DbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, owner_id, region, acl, max_size, created_at
             FROM buckets ORDER BY name",
        )?;
        let buckets = stmt
            .query_map([], row_to_bucket)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(buckets)
    }

    pub fn update_bucket_acl(&self, name: &str, acl: BucketAcl) -> Result<bool, DbError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE buckets SET acl = ?2 WHERE name = ?1",
            params![name, acl.as_str()],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_bucket(&self, bucket_id: i64) -> Result<(), DbError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM buckets WHERE id = ?1", params![bucket_id])?;
        Ok(())
    }

    pub fn count_objects(&self, bucket_id: i64) -> Result<u64, DbError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE bucket_id = ?1",
            params![bucket_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn count_buckets(&self) -> Result<u64, DbError> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM buckets", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_all_objects(&self) -> Result<u64, DbError> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // === Objects ===

    /// Insert or overwrite the object row for (bucket_id, key).
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_object(
        &self,
        bucket_id: i64,
        key: &str,
        size: u64,
        etag: &str,
        content_type: &str,
        storage_path: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock();
        let now = now_str();
        conn.execute(
            "INSERT INTO objects (bucket_id, key, size, etag, content_type, storage_path, metadata, last_modified, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT (bucket_id, key) DO UPDATE SET
                size = excluded.size,
                etag = excluded.etag,
                content_type = excluded.content_type,
                storage_path = excluded.storage_path,
                metadata = excluded.metadata,
                last_modified = excluded.last_modified",
            params![
                bucket_id,
                key,
                size as i64,
                etag,
                content_type,
                storage_path,
                metadata_to_json(metadata),
                now
            ],
        )?;
        Ok(())
    }

    pub fn get_object(&self, bucket_id: i64, key: &str) -> Result<Option<ObjectRecord>, DbError> {
        let conn = self.conn.lock();
        let object = conn
            .query_row(
                "SELECT id, bucket_id, key, size, etag, content_type, storage_path, metadata, last_modified, created_at
                 FROM objects WHERE bucket_id = ?1 AND key = ?2",
                params![bucket_id, key],
                row_to_object,
            )
            .optional()?;
        Ok(object)
    }

    pub fn delete_object(&self, bucket_id: i64, key: &str) -> Result<bool, DbError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM objects WHERE bucket_id = ?1 AND key = ?2",
            params![bucket_id, key],
        )?;
        Ok(changed > 0)
    }

    /// Key-ordered page scan for ListObjectsV2. Returns up to `limit`
    /// rows with `key LIKE prefix%` and, when `after` is set,
    /// `key > after`.
    pub fn list_objects_page(
        &self,
        bucket_id: i64,
        prefix: &str,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<ObjectRecord>, DbError> {
        let conn = self.conn.lock();
        let pattern = format!("{}%", like_escape(prefix));
        let mut stmt = conn.prepare(
            "SELECT id, bucket_id, key, size, etag, content_type, storage_path, metadata, last_modified, created_at
             FROM objects
             WHERE bucket_id = ?1 AND key LIKE ?2 ESCAPE '\\' AND key > ?3
             ORDER BY key ASC
             LIMIT ?4",
        )?;
        let objects = stmt
            .query_map(
                params![bucket_id, pattern, after.unwrap_or(""), limit],
                row_to_object,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(objects)
    }

    /// All keys in a bucket, used by the admin purge path.
    pub fn list_all_keys(&self, bucket_id: i64) -> Result<Vec<String>, DbError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT key FROM objects WHERE bucket_id = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![bucket_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    // === Multipart uploads ===

    pub fn insert_upload(
        &self,
        upload_id: &str,
        bucket_id: i64,
        key: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO multipart_uploads (upload_id, bucket_id, key, content_type, metadata, initiated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                upload_id,
                bucket_id,
                key,
                content_type,
                metadata_to_json(metadata),
                now_str()
            ],
        )?;
        Ok(())
    }

    pub fn get_upload(&self, upload_id: &str) -> Result<Option<UploadRecord>, DbError> {
        let conn = self.conn.lock();
        let upload = conn
            .query_row(
                "SELECT id, upload_id, bucket_id, key, content_type, metadata, initiated_at
                 FROM multipart_uploads WHERE upload_id = ?1",
                params![upload_id],
                row_to_upload,
            )
            .optional()?;
        Ok(upload)
    }

    /// Remove an upload and (via cascade) its parts.
    pub fn delete_upload(&self, upload_id: &str) -> Result<(), DbError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM multipart_uploads WHERE upload_id = ?1",
            params![upload_id],
        )?;
        Ok(())
    }

    /// Insert or overwrite the part row for (upload_id, part_number).
    pub fn upsert_part(
        &self,
        upload_id: &str,
        part_number: u32,
        size: u64,
        etag: &str,
        storage_path: &str,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO multipart_parts (upload_id, part_number, size, etag, storage_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (upload_id, part_number) DO UPDATE SET
                size = excluded.size,
                etag = excluded.etag,
                storage_path = excluded.storage_path,
                created_at = excluded.created_at",
            params![upload_id, part_number, size as i64, etag, storage_path, now_str()],
        )?;
        Ok(())
    }

    pub fn list_parts(&self, upload_id: &str) -> Result<Vec<PartRecord>, DbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, upload_id, part_number, size, etag, storage_path, created_at
             FROM multipart_parts WHERE upload_id = ?1 ORDER BY part_number ASC",
        )?;
        let parts = stmt
            .query_map(params![upload_id], row_to_part)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts)
    }

    /// Atomically record a completed multipart upload: upsert the final
    /// object row and remove the upload state, in one transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn complete_upload(
        &self,
        upload_id: &str,
        bucket_id: i64,
        key: &str,
        size: u64,
        etag: &str,
        content_type: &str,
        storage_path: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), DbError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_str();
        tx.execute(
            "INSERT INTO objects (bucket_id, key, size, etag, content_type, storage_path, metadata, last_modified, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT (bucket_id, key) DO UPDATE SET
                size = excluded.size,
                etag = excluded.etag,
                content_type = excluded.content_type,
                storage_path = excluded.storage_path,
                metadata = excluded.metadata,
                last_modified = excluded.last_modified",
            params![
                bucket_id,
                key,
                size as i64,
                etag,
                content_type,
                storage_path,
                metadata_to_json(metadata),
                now
            ],
        )?;
        tx.execute(
            "DELETE FROM multipart_parts WHERE upload_id = ?1",
            params![upload_id],
        )?;
        tx.execute(
            "DELETE FROM multipart_uploads WHERE upload_id = ?1",
            params![upload_id],
        )?;
        tx.commit()?;
        Ok(())
    }
}

// === Row mappers ===

fn row_to_access_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccessKey> {
    Ok(AccessKey {
        id: row.get(0)?,
        access_key_id: row.get(1)?,
        secret_access_key: row.get(2)?,
        display_name: row.get(3)?,
        is_active: row.get::<_, i64>(4)? != 0,
        created_at: parse_ts(&row.get::<_, String>(5)?),
        updated_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

fn row_to_bucket(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bucket> {
    Ok(Bucket {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        region: row.get(3)?,
        acl: BucketAcl::parse(&row.get::<_, String>(4)?).unwrap_or(BucketAcl::Private),
        max_size: row.get::<_, i64>(5)? as u64,
        created_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

fn row_to_object(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObjectRecord> {
    Ok(ObjectRecord {
        id: row.get(0)?,
        bucket_id: row.get(1)?,
        key: row.get(2)?,
        size: row.get::<_, i64>(3)? as u64,
        etag: row.get(4)?,
        content_type: row.get(5)?,
        storage_path: row.get(6)?,
        metadata: metadata_from_json(&row.get::<_, String>(7)?),
        last_modified: parse_ts(&row.get::<_, String>(8)?),
        created_at: parse_ts(&row.get::<_, String>(9)?),
    })
}

fn row_to_upload(row: &rusqlite::Row<'_>) -> rusqlite::Result<UploadRecord> {
    Ok(UploadRecord {
        id: row.get(0)?,
        upload_id: row.get(1)?,
        bucket_id: row.get(2)?,
        key: row.get(3)?,
        content_type: row.get(4)?,
        metadata: metadata_from_json(&row.get::<_, String>(5)?),
        initiated_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

fn row_to_part(row: &rusqlite::Row<'_>) -> rusqlite::Result<PartRecord> {
    Ok(PartRecord {
        id: row.get(0)?,
        upload_id: row.get(1)?,
        part_number: row.get::<_, i64>(2)? as u32,
        size: row.get::<_, i64>(3)? as u64,
        etag: row.get(4)?,
        storage_path: row.get(5)?,
        created_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_key() -> (Db, AccessKey) {
        let db = Db::open_in_memory().unwrap();
        let key = db
            .insert_access_key("AKIDTEST000000000000", "secret-secret-secret-secret-secret", "test")
            .unwrap();
        (db, key)
    }

    #[test]
    fn test_access_key_lifecycle() {
        let (db, key) = db_with_key();
        assert!(key.is_active);

        let fetched = db.get_access_key("AKIDTEST000000000000").unwrap().unwrap();
        assert_eq!(fetched.id, key.id);
        assert_eq!(fetched.secret_access_key, key.secret_access_key);

        db.update_access_key("AKIDTEST000000000000", None, Some(false))
            .unwrap();
        let fetched = db.get_access_key("AKIDTEST000000000000").unwrap().unwrap();
        assert!(!fetched.is_active);

        assert!(db.delete_access_key("AKIDTEST000000000000").unwrap());
        assert!(db.get_access_key("AKIDTEST000000000000").unwrap().is_none());
        assert!(!db.delete_access_key("AKIDTEST000000000000").unwrap());
    }

    #[test]
    fn test_delete_key_reassigns_buckets() {
        let (db, key) = db_with_key();
        db.insert_bucket("owned", key.id, "us-east-1", BucketAcl::Private, 0)
            .unwrap();

        // Only key owning a bucket: refuse
        assert!(matches!(
            db.delete_access_key("AKIDTEST000000000000"),
            Err(DbError::Conflict(_))
        ));

        let heir = db
            .insert_access_key("AKIDHEIR000000000000", "another-secret-another-secret-00", "heir")
            .unwrap();
        assert!(db.delete_access_key("AKIDTEST000000000000").unwrap());

        let bucket = db.get_bucket("owned").unwrap().unwrap();
        assert_eq!(bucket.owner_id, heir.id);
    }

    #[test]
    fn test_bucket_unique_name() {
        let (db, key) = db_with_key();
        db.insert_bucket("dup", key.id, "us-east-1", BucketAcl::Private, 0)
            .unwrap();
        assert!(db
            .insert_bucket("dup", key.id, "us-east-1", BucketAcl::Private, 0)
            .is_err());
    }

    #[test]
    fn test_object_upsert_overwrites() {
        let (db, key) = db_with_key();
        let bucket = db
            .insert_bucket("b", key.id, "us-east-1", BucketAcl::Private, 0)
            .unwrap();

        let meta = HashMap::new();
        db.upsert_object(bucket.id, "k.txt", 3, "aaa", "text/plain", "b/k.txt", &meta)
            .unwrap();
        db.upsert_object(bucket.id, "k.txt", 5, "bbb", "text/plain", "b/k.txt", &meta)
            .unwrap();

        let obj = db.get_object(bucket.id, "k.txt").unwrap().unwrap();
        assert_eq!(obj.size, 5);
        assert_eq!(obj.etag, "bbb");
        assert_eq!(db.count_objects(bucket.id).unwrap(), 1);
    }

    #[test]
    fn test_object_metadata_round_trip() {
        let (db, key) = db_with_key();
        let bucket = db
            .insert_bucket("b", key.id, "us-east-1", BucketAcl::Private, 0)
            .unwrap();

        let mut meta = HashMap::new();
        meta.insert("color".to_string(), "blau".to_string());
        meta.insert("note".to_string(), "väl spänd".to_string());
        db.upsert_object(bucket.id, "k", 0, "e", "application/octet-stream", "b/k", &meta)
            .unwrap();

        let obj = db.get_object(bucket.id, "k").unwrap().unwrap();
        assert_eq!(obj.metadata, meta);
    }

    #[test]
    fn test_list_objects_page_ordering_and_prefix() {
        let (db, key) = db_with_key();
        let bucket = db
            .insert_bucket("b", key.id, "us-east-1", BucketAcl::Private, 0)
            .unwrap();
        let meta = HashMap::new();
        for k in ["a/b", "a/c", "d", "zz"] {
            db.upsert_object(bucket.id, k, 1, "e", "text/plain", k, &meta)
                .unwrap();
        }

        let page = db.list_objects_page(bucket.id, "", None, 10).unwrap();
        let keys: Vec<_> = page.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a/b", "a/c", "d", "zz"]);

        let page = db.list_objects_page(bucket.id, "a/", None, 10).unwrap();
        assert_eq!(page.len(), 2);

        // Continuation: strictly after the given key
        let page = db.list_objects_page(bucket.id, "", Some("a/c"), 10).unwrap();
        let keys: Vec<_> = page.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["d", "zz"]);
    }

    #[test]
    fn test_like_escape_literal_wildcards() {
        let (db, key) = db_with_key();
        let bucket = db
            .insert_bucket("b", key.id, "us-east-1", BucketAcl::Private, 0)
            .unwrap();
        let meta = HashMap::new();
        db.upsert_object(bucket.id, "100%/done", 1, "e", "t", "p", &meta)
            .unwrap();
        db.upsert_object(bucket.id, "100x/done", 1, "e", "t", "p", &meta)
            .unwrap();

        let page = db.list_objects_page(bucket.id, "100%", None, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].key, "100%/done");
    }

    #[test]
    fn test_multipart_rows_lifecycle() {
        let (db, key) = db_with_key();
        let bucket = db
            .insert_bucket("b", key.id, "us-east-1", BucketAcl::Private, 0)
            .unwrap();
        let meta = HashMap::new();

        db.insert_upload("u-1", bucket.id, "big.bin", "application/octet-stream", &meta)
            .unwrap();
        db.upsert_part("u-1", 2, 4, "f6a6", ".multipart/u-1/part-2").unwrap();
        db.upsert_part("u-1", 1, 4, "e2fc", ".multipart/u-1/part-1").unwrap();
        // Overwrite part 1
        db.upsert_part("u-1", 1, 8, "abcd", ".multipart/u-1/part-1").unwrap();

        let parts = db.list_parts("u-1").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part_number, 1);
        assert_eq!(parts[0].etag, "abcd");
        assert_eq!(parts[1].part_number, 2);

        db.complete_upload("u-1", bucket.id, "big.bin", 12, "etag-2", "application/octet-stream", "b/big.bin", &meta)
            .unwrap();

        assert!(db.get_upload("u-1").unwrap().is_none());
        assert!(db.list_parts("u-1").unwrap().is_empty());
        assert!(db.get_object(bucket.id, "big.bin").unwrap().is_some());
    }

    #[test]
    fn test_delete_upload_cascades_parts() {
        let (db, key) = db_with_key();
        let bucket = db
            .insert_bucket("b", key.id, "us-east-1", BucketAcl::Private, 0)
            .unwrap();
        db.insert_upload("u-2", bucket.id, "k", "text/plain", &HashMap::new())
            .unwrap();
        db.upsert_part("u-2", 1, 1, "e", "p").unwrap();

        db.delete_upload("u-2").unwrap();
        assert!(db.list_parts("u-2").unwrap().is_empty());
    }

    #[test]
    fn test_delete_bucket_cascades_objects() {
        let (db, key) = db_with_key();
        let bucket = db
            .insert_bucket("b", key.id, "us-east-1", BucketAcl::Private, 0)
            .unwrap();
        db.upsert_object(bucket.id, "k", 1, "e", "t", "p", &HashMap::new())
            .unwrap();
        db.delete_bucket(bucket.id).unwrap();
        assert_eq!(db.count_all_objects().unwrap(), 0);
    }
}
