// src/server/db.rs

//! Registry database schema and queries
//!
//! SQLite behind a mutex; every write path that spans rows runs inside a
//! transaction. Timestamps are RFC 3339 TEXT columns.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub const SCHEMA_VERSION: i32 = 1;

#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub pseudo: String,
}

#[derive(Debug, Clone)]
pub struct ArchiveRow {
    pub id: String,
    pub name: String,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub counter: i64,
    pub upload_done: bool,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CliTokenRow {
    pub id: i64,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RecipeRow {
    pub package: String,
    pub version: String,
    pub revision: String,
    pub archive_name: String,
    pub sha256: Option<String>,
    pub created: DateTime<Utc>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PackageRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

impl Db {
    pub fn open(path: &Path) -> Result<Db> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Config(format!("opening database {}: {e}", path.display())))?;
        conn.execute_batch("PRAGMA foreign_keys = ON")
            .map_err(db_err)?;
        migrate(&conn)?;
        Ok(Db {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Db> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        migrate(&conn)?;
        Ok(Db {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // -- users --------------------------------------------------------------

    /// Find or create a user by email. The pseudo derives from the email
    /// local part, disambiguated with a numeric suffix on collision.
    pub fn upsert_user(&self, email: &str) -> Result<UserRow> {
        let conn = self.lock();
        if let Some(user) = find_user_by_email(&conn, email)? {
            return Ok(user);
        }
        let base = email.split('@').next().unwrap_or(email);
        let mut pseudo = base.to_string();
        let mut suffix = 2;
        loop {
            let taken: bool = conn
                .query_row(
                    "SELECT 1 FROM user WHERE pseudo = ?1",
                    params![pseudo],
                    |_| Ok(true),
                )
                .optional()
                .map_err(db_err)?
                .unwrap_or(false);
            if !taken {
                break;
            }
            pseudo = format!("{base}{suffix}");
            suffix += 1;
        }
        conn.execute(
            "INSERT INTO user (email, pseudo, created_at) VALUES (?1, ?2, ?3)",
            params![email, pseudo, now()],
        )
        .map_err(db_err)?;
        debug!("created user {pseudo} for {email}");
        Ok(UserRow {
            id: conn.last_insert_rowid(),
            email: email.to_string(),
            pseudo,
        })
    }

    pub fn user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, email, pseudo FROM user WHERE id = ?1",
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    // -- refresh tokens -----------------------------------------------------

    pub fn insert_refresh_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO refresh_token (user_id, token, expires_at, revoked, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![user_id, token, expires_at.to_rfc3339(), now()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Rotate a refresh token inside one transaction.
    ///
    /// Presenting a token that is unknown, revoked or expired revokes every
    /// refresh token of the owning user (when one can be identified) and
    /// fails with an auth error.
    pub fn rotate_refresh_token(
        &self,
        token: &str,
        new_token: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<UserRow> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let row: Option<(i64, i64, String, bool)> = tx
            .query_row(
                "SELECT id, user_id, expires_at, revoked FROM refresh_token WHERE token = ?1",
                params![token],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, i64>(3)? != 0,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        let Some((row_id, user_id, expires_at, revoked)) = row else {
            return Err(Error::Auth("unknown refresh token".to_string()));
        };

        let expired = DateTime::parse_from_rfc3339(&expires_at)
            .map(|t| t.with_timezone(&Utc) < Utc::now())
            .unwrap_or(true);

        if revoked || expired {
            // token reuse: burn every session of this user
            tx.execute(
                "UPDATE refresh_token SET revoked = 1 WHERE user_id = ?1",
                params![user_id],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            return Err(Error::Auth("refresh token reuse detected".to_string()));
        }

        tx.execute(
            "UPDATE refresh_token SET revoked = 1 WHERE id = ?1",
            params![row_id],
        )
        .map_err(db_err)?;
        tx.execute(
            "INSERT INTO refresh_token (user_id, token, expires_at, revoked, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![user_id, new_token, new_expires_at.to_rfc3339(), now()],
        )
        .map_err(db_err)?;

        let user = tx
            .query_row(
                "SELECT id, email, pseudo FROM user WHERE id = ?1",
                params![user_id],
                user_from_row,
            )
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(user)
    }

    // -- CLI tokens ---------------------------------------------------------

    pub fn create_cli_token(&self, user_id: i64, token: &str, label: Option<&str>) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO cli_token (user_id, token, label, revoked, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![user_id, token, label, now()],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_cli_tokens(&self, user_id: i64) -> Result<Vec<CliTokenRow>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, label, created_at FROM cli_token
                 WHERE user_id = ?1 AND revoked = 0 ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![user_id], |r| {
                Ok(CliTokenRow {
                    id: r.get(0)?,
                    label: r.get(1)?,
                    created_at: parse_time(r.get::<_, String>(2)?),
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn revoke_cli_token(&self, user_id: i64, token_id: i64) -> Result<bool> {
        let conn = self.lock();
        let changed = conn
            .execute(
                "UPDATE cli_token SET revoked = 1 WHERE id = ?1 AND user_id = ?2",
                params![token_id, user_id],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    pub fn user_by_cli_token(&self, token: &str) -> Result<Option<UserRow>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT u.id, u.email, u.pseudo FROM user u
             JOIN cli_token t ON t.user_id = u.id
             WHERE t.token = ?1 AND t.revoked = 0",
            params![token],
            user_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    // -- packages and recipes -----------------------------------------------

    pub fn upsert_package(&self, name: &str, description: Option<&str>, user_id: i64) -> Result<i64> {
        let conn = self.lock();
        if let Some(id) = conn
            .query_row(
                "SELECT id FROM package WHERE name = ?1",
                params![name],
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(db_err)?
        {
            if let Some(description) = description {
                conn.execute(
                    "UPDATE package SET description = ?1 WHERE id = ?2",
                    params![description, id],
                )
                .map_err(db_err)?;
            }
            return Ok(id);
        }
        conn.execute(
            "INSERT INTO package (name, description, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, description, user_id, now()],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_packages(&self) -> Result<Vec<PackageRow>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id, name, description FROM package ORDER BY name")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |r| {
                Ok(PackageRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    description: r.get(2)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Existing recipe for (package, version, revision), with its archive's
    /// upload state.
    pub fn find_recipe_archive(
        &self,
        package: &str,
        version: &str,
        revision: &str,
    ) -> Result<Option<(String, bool)>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT a.id, a.upload_done FROM recipe r
             JOIN package p ON p.id = r.package_id
             JOIN archive a ON a.id = r.archive_id
             WHERE p.name = ?1 AND r.version = ?2 AND r.revision = ?3",
            params![package, version, revision],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0)),
        )
        .optional()
        .map_err(db_err)
    }

    /// Create the provisional archive row and its recipe row in one
    /// transaction.
    pub fn create_recipe_upload(
        &self,
        package_id: i64,
        version: &str,
        revision: &str,
        archive_id: &str,
        archive_name: &str,
        user_id: i64,
    ) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT INTO archive (id, name, created_by, created_at, counter, upload_done)
             VALUES (?1, ?2, ?3, ?4, 0, 0)",
            params![archive_id, archive_name, user_id, now()],
        )
        .map_err(db_err)?;
        tx.execute(
            "INSERT INTO recipe (package_id, version, revision, archive_id, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![package_id, version, revision, archive_id, user_id, now()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn archive_by_id(&self, id: &str) -> Result<Option<ArchiveRow>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, name, created_by, created_at, counter, upload_done, sha256
             FROM archive WHERE id = ?1",
            params![id],
            archive_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn archive_by_name(&self, name: &str) -> Result<Option<ArchiveRow>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, name, created_by, created_at, counter, upload_done, sha256
             FROM archive WHERE name = ?1",
            params![name],
            archive_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    /// Flip `upload_done`, record the digest and index the archived files,
    /// in one transaction.
    pub fn finalize_archive(
        &self,
        id: &str,
        sha256: &str,
        files: &[(String, u64)],
        recipe_content: Option<(&str, Option<&str>)>,
    ) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "UPDATE archive SET upload_done = 1, sha256 = ?1 WHERE id = ?2",
            params![sha256, id],
        )
        .map_err(db_err)?;
        for (path, size) in files {
            tx.execute(
                "INSERT INTO archive_file (archive_id, path, size) VALUES (?1, ?2, ?3)",
                params![id, path, *size as i64],
            )
            .map_err(db_err)?;
        }
        if let Some((script, readme)) = recipe_content {
            tx.execute(
                "UPDATE recipe SET recipe_script = ?1, readme = ?2 WHERE archive_id = ?3",
                params![script, readme, id],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    /// Drop an archive row together with its recipe and file index.
    pub fn delete_archive(&self, id: &str) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute("DELETE FROM archive_file WHERE archive_id = ?1", params![id])
            .map_err(db_err)?;
        tx.execute("DELETE FROM recipe WHERE archive_id = ?1", params![id])
            .map_err(db_err)?;
        tx.execute("DELETE FROM archive WHERE id = ?1", params![id])
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn delete_provisional_archives(&self) -> Result<usize> {
        let ids: Vec<String> = {
            let conn = self.lock();
            let mut stmt = conn
                .prepare("SELECT id FROM archive WHERE upload_done = 0")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |r| r.get::<_, String>(0))
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)?
        };
        for id in &ids {
            self.delete_archive(id)?;
        }
        Ok(ids.len())
    }

    pub fn increment_counter(&self, id: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE archive SET counter = counter + 1 WHERE id = ?1",
            params![id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Versions of a package with at least one finalized archive.
    pub fn package_versions(&self, package: &str) -> Result<Option<Vec<String>>> {
        let conn = self.lock();
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM package WHERE name = ?1",
                params![package],
                |_| Ok(true),
            )
            .optional()
            .map_err(db_err)?
            .unwrap_or(false);
        if !exists {
            return Ok(None);
        }
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT r.version FROM recipe r
                 JOIN package p ON p.id = r.package_id
                 JOIN archive a ON a.id = r.archive_id
                 WHERE p.name = ?1 AND a.upload_done = 1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![package], |r| r.get::<_, String>(0))
            .map_err(db_err)?;
        Ok(Some(
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)?,
        ))
    }

    /// Finalized recipes of a package version, latest-created first.
    pub fn recipes_of_version(&self, package: &str, version: &str) -> Result<Vec<RecipeRow>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT p.name, r.version, r.revision, a.name, a.sha256, r.created_at, u.pseudo
                 FROM recipe r
                 JOIN package p ON p.id = r.package_id
                 JOIN archive a ON a.id = r.archive_id
                 LEFT JOIN user u ON u.id = r.created_by
                 WHERE p.name = ?1 AND r.version = ?2 AND a.upload_done = 1
                 ORDER BY r.created_at DESC, r.id DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![package, version], recipe_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Every finalized recipe of a package, latest-created first.
    pub fn recipes_of_package(&self, package: &str) -> Result<Vec<RecipeRow>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT p.name, r.version, r.revision, a.name, a.sha256, r.created_at, u.pseudo
                 FROM recipe r
                 JOIN package p ON p.id = r.package_id
                 JOIN archive a ON a.id = r.archive_id
                 LEFT JOIN user u ON u.id = r.created_by
                 WHERE p.name = ?1 AND a.upload_done = 1
                 ORDER BY r.created_at DESC, r.id DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![package], recipe_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    // -- database blob storage ----------------------------------------------

    pub fn set_archive_data(&self, id: &str, data: &[u8]) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE archive SET data = ?1 WHERE id = ?2",
            params![data, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn archive_data_len(&self, id: &str) -> Result<Option<u64>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT length(data) FROM archive WHERE id = ?1",
            params![id],
            |r| r.get::<_, Option<i64>>(0),
        )
        .optional()
        .map_err(db_err)
        .map(|v| v.flatten().map(|l| l as u64))
    }

    pub fn archive_data_slice(&self, id: &str, start: u64, len: u64) -> Result<Vec<u8>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT substr(data, ?2, ?3) FROM archive WHERE id = ?1",
            params![id, (start + 1) as i64, len as i64],
            |r| r.get::<_, Vec<u8>>(0),
        )
        .map_err(db_err)
    }

    pub fn archive_data(&self, id: &str) -> Result<Vec<u8>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT data FROM archive WHERE id = ?1",
            params![id],
            |r| r.get::<_, Vec<u8>>(0),
        )
        .map_err(db_err)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        CREATE TABLE IF NOT EXISTS user (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            pseudo TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS refresh_token (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES user(id),
            token TEXT NOT NULL UNIQUE,
            expires_at TEXT NOT NULL,
            revoked INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS cli_token (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES user(id),
            token TEXT NOT NULL UNIQUE,
            label TEXT,
            revoked INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS archive (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_by INTEGER REFERENCES user(id),
            created_at TEXT NOT NULL,
            counter INTEGER NOT NULL DEFAULT 0,
            upload_done INTEGER NOT NULL DEFAULT 0,
            sha256 TEXT,
            data BLOB
        );
        CREATE TABLE IF NOT EXISTS archive_file (
            archive_id TEXT NOT NULL REFERENCES archive(id),
            path TEXT NOT NULL,
            size INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS package (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            created_by INTEGER REFERENCES user(id),
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS recipe (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id INTEGER NOT NULL REFERENCES package(id),
            version TEXT NOT NULL,
            revision TEXT NOT NULL,
            archive_id TEXT NOT NULL REFERENCES archive(id),
            recipe_script TEXT,
            readme TEXT,
            created_by INTEGER REFERENCES user(id),
            created_at TEXT NOT NULL,
            UNIQUE(package_id, version, revision)
        );",
    )
    .map_err(db_err)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        params![SCHEMA_VERSION],
    )
    .map_err(db_err)?;
    Ok(())
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn parse_time(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn user_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: r.get(0)?,
        email: r.get(1)?,
        pseudo: r.get(2)?,
    })
}

fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, email, pseudo FROM user WHERE email = ?1",
        params![email],
        user_from_row,
    )
    .optional()
    .map_err(db_err)
}

fn archive_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ArchiveRow> {
    Ok(ArchiveRow {
        id: r.get(0)?,
        name: r.get(1)?,
        created_by: r.get(2)?,
        created_at: parse_time(r.get::<_, String>(3)?),
        counter: r.get(4)?,
        upload_done: r.get::<_, i64>(5)? != 0,
        sha256: r.get(6)?,
    })
}

fn recipe_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RecipeRow> {
    Ok(RecipeRow {
        package: r.get(0)?,
        version: r.get(1)?,
        revision: r.get(2)?,
        archive_name: r.get(3)?,
        sha256: r.get(4)?,
        created: parse_time(r.get::<_, String>(5)?),
        created_by: r.get(6)?,
    })
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Config(format!("database error: {e}"))
}
