// src/server/storage.rs

//! Blob storage strategies
//!
//! Archives live either as files under a storage directory or as BLOBs in
//! the database; the handlers never know which. Uploads stream through a
//! [`BlobWriter`] so the filesystem strategy never buffers a whole archive,
//! and the writer only commits on [`BlobWriter::finish`] - an aborted
//! upload leaves nothing behind.

use super::db::Db;
use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

pub enum Storage {
    Filesystem { root: PathBuf },
    Database,
}

impl Storage {
    pub fn filesystem(root: PathBuf) -> Result<Storage> {
        fs::create_dir_all(&root)
            .map_err(Error::io_context(format!("creating storage dir {}", root.display())))?;
        Ok(Storage::Filesystem { root })
    }

    pub fn database() -> Storage {
        Storage::Database
    }

    /// Both strategies can serve byte ranges.
    pub fn support_slice(&self) -> bool {
        true
    }

    fn blob_path(root: &std::path::Path, name: &str) -> PathBuf {
        root.join(name)
    }

    pub fn writer(&self, id: &str, name: &str) -> Result<BlobWriter> {
        match self {
            Storage::Filesystem { root } => {
                let staging = root.join(format!(".{id}.part"));
                let file = File::create(&staging)
                    .map_err(Error::io_context(format!("creating {}", staging.display())))?;
                Ok(BlobWriter::Filesystem {
                    file,
                    staging,
                    dest: Self::blob_path(root, name),
                })
            }
            Storage::Database => Ok(BlobWriter::Database {
                id: id.to_string(),
                data: Vec::new(),
            }),
        }
    }

    pub fn blob_size(&self, db: &Db, id: &str, name: &str) -> Result<u64> {
        match self {
            Storage::Filesystem { root } => {
                let meta = fs::metadata(Self::blob_path(root, name))
                    .map_err(Error::io_context(format!("blob {name}")))?;
                Ok(meta.len())
            }
            Storage::Database => db
                .archive_data_len(id)?
                .ok_or_else(|| Error::NotFound(format!("blob {name}"))),
        }
    }

    /// Read `[start, end]` (inclusive, as in HTTP ranges) or the whole blob.
    pub fn get_blob(
        &self,
        db: &Db,
        id: &str,
        name: &str,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<u8>> {
        match self {
            Storage::Filesystem { root } => {
                let mut file = File::open(Self::blob_path(root, name))
                    .map_err(Error::io_context(format!("blob {name}")))?;
                match range {
                    None => {
                        let mut data = Vec::new();
                        file.read_to_end(&mut data)?;
                        Ok(data)
                    }
                    Some((start, end)) => {
                        file.seek(SeekFrom::Start(start))?;
                        let len = end - start + 1;
                        let mut data = vec![0u8; len as usize];
                        file.read_exact(&mut data)?;
                        Ok(data)
                    }
                }
            }
            Storage::Database => match range {
                None => db.archive_data(id),
                Some((start, end)) => db.archive_data_slice(id, start, end - start + 1),
            },
        }
    }

    /// Remove a stored blob, tolerating absence.
    pub fn delete_blob(&self, db: &Db, id: &str, name: &str) -> Result<()> {
        match self {
            Storage::Filesystem { root } => {
                let _ = fs::remove_file(Self::blob_path(root, name));
                let _ = fs::remove_file(root.join(format!(".{id}.part")));
                Ok(())
            }
            Storage::Database => {
                // the row itself is deleted by the caller
                let _ = db;
                Ok(())
            }
        }
    }
}

pub enum BlobWriter {
    Filesystem {
        file: File,
        staging: PathBuf,
        dest: PathBuf,
    },
    Database {
        id: String,
        data: Vec<u8>,
    },
}

impl BlobWriter {
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        match self {
            BlobWriter::Filesystem { file, .. } => {
                file.write_all(chunk)?;
                Ok(())
            }
            BlobWriter::Database { data, .. } => {
                data.extend_from_slice(chunk);
                Ok(())
            }
        }
    }

    /// Commit the blob.
    pub fn finish(self, db: &Db) -> Result<()> {
        match self {
            BlobWriter::Filesystem { mut file, staging, dest } => {
                file.flush()?;
                drop(file);
                fs::rename(&staging, &dest)
                    .map_err(Error::io_context(format!("committing {}", dest.display())))?;
                Ok(())
            }
            BlobWriter::Database { id, data } => db.set_archive_data(&id, &data),
        }
    }

    /// Drop any partial state.
    pub fn abort(self) {
        if let BlobWriter::Filesystem { staging, .. } = self {
            let _ = fs::remove_file(staging);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_archive() -> Db {
        let db = Db::open_in_memory().unwrap();
        let user = db.upsert_user("dev@example.org").unwrap();
        let pkg = db.upsert_package("zlib", None, user.id).unwrap();
        db.create_recipe_upload(pkg, "1.0.0", "aaaa000000000000", "arch-1", "blob.tar.xz", user.id)
            .unwrap();
        db
    }

    #[test]
    fn test_filesystem_store_and_slice() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::filesystem(dir.path().to_path_buf()).unwrap();
        let db = db_with_archive();

        let mut writer = storage.writer("arch-1", "blob.tar.xz").unwrap();
        writer.write_chunk(b"hello ").unwrap();
        writer.write_chunk(b"world").unwrap();
        writer.finish(&db).unwrap();

        assert_eq!(storage.blob_size(&db, "arch-1", "blob.tar.xz").unwrap(), 11);
        assert_eq!(
            storage.get_blob(&db, "arch-1", "blob.tar.xz", None).unwrap(),
            b"hello world"
        );
        assert_eq!(
            storage.get_blob(&db, "arch-1", "blob.tar.xz", Some((6, 10))).unwrap(),
            b"world"
        );
    }

    #[test]
    fn test_filesystem_abort_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::filesystem(dir.path().to_path_buf()).unwrap();

        let mut writer = storage.writer("arch-1", "blob.tar.xz").unwrap();
        writer.write_chunk(b"partial").unwrap();
        writer.abort();

        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_database_store_and_slice() {
        let storage = Storage::database();
        let db = db_with_archive();

        let mut writer = storage.writer("arch-1", "blob.tar.xz").unwrap();
        writer.write_chunk(b"hello world").unwrap();
        writer.finish(&db).unwrap();

        assert_eq!(storage.blob_size(&db, "arch-1", "blob.tar.xz").unwrap(), 11);
        assert_eq!(
            storage.get_blob(&db, "arch-1", "blob.tar.xz", Some((0, 4))).unwrap(),
            b"hello"
        );
    }
}
