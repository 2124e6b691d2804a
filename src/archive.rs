// src/archive.rs

//! Archive creation and extraction
//!
//! The package archive format is `tar.xz`; `tar.gz` is also accepted when a
//! recipe downloads upstream tarballs. The format is inferred from the file
//! extension. Creation streams the tar bytes through the compressor while
//! tee'ing them into a rolling SHA-256, so the digest of the finished archive
//! never requires a second pass.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

/// Supported archive formats, by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarXz,
    TarGz,
}

impl ArchiveFormat {
    pub fn from_path(path: &Path) -> Result<ArchiveFormat> {
        let name = path.to_string_lossy();
        if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Ok(ArchiveFormat::TarXz)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(ArchiveFormat::TarGz)
        } else {
            Err(Error::Config(format!(
                "unsupported archive format: {}",
                path.display()
            )))
        }
    }
}

/// Writer tee'ing everything into a SHA-256 state
pub struct DigestWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub fn finish(self) -> (W, [u8; 32]) {
        (self.inner, self.hasher.finalize().into())
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader tee'ing everything read into a SHA-256 state
pub struct DigestReader<R: Read> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> DigestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub fn finish(self) -> (R, [u8; 32]) {
        (self.inner, self.hasher.finalize().into())
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

enum Compressor<W: Write> {
    Xz(XzEncoder<W>),
    Gz(GzEncoder<W>),
}

impl<W: Write> Compressor<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Xz(e) => e.finish(),
            Compressor::Gz(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Xz(e) => e.write(buf),
            Compressor::Gz(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Xz(e) => e.flush(),
            Compressor::Gz(e) => e.flush(),
        }
    }
}

/// Create `archive` from the contents of `indir`.
///
/// Entry paths are relative to `indir` and appended in sorted order so two
/// archives of the same tree differ only in embedded mtimes. Returns the
/// SHA-256 of the finished archive, lowercase hex.
pub fn create(indir: &Path, archive: &Path) -> Result<String> {
    let format = ArchiveFormat::from_path(archive)?;
    let file = File::create(archive)
        .map_err(Error::io_context(format!("creating {}", archive.display())))?;
    let digest = DigestWriter::new(BufWriter::new(file));
    let compressor = match format {
        ArchiveFormat::TarXz => Compressor::Xz(XzEncoder::new(digest, 6)),
        ArchiveFormat::TarGz => Compressor::Gz(GzEncoder::new(digest, flate2::Compression::default())),
    };
    let mut builder = tar::Builder::new(compressor);
    builder.follow_symlinks(false);

    let mut entries: Vec<PathBuf> = WalkDir::new(indir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .collect();
    entries.sort();

    for path in entries {
        let rel = path
            .strip_prefix(indir)
            .expect("walkdir yields children of indir");
        if path.is_dir() {
            builder.append_dir(rel, &path)?;
        } else {
            builder
                .append_path_with_name(&path, rel)
                .map_err(Error::io_context(format!("archiving {}", path.display())))?;
        }
    }

    let compressor = builder.into_inner()?;
    let digest = compressor.finish()?;
    let (mut writer, hash) = digest.finish();
    writer.flush()?;
    Ok(hex::encode(hash))
}

/// Extract `archive` into `outdir`, preserving relative paths and mtimes.
pub fn extract(archive: &Path, outdir: &Path) -> Result<()> {
    let format = ArchiveFormat::from_path(archive)?;
    let file = File::open(archive)
        .map_err(Error::io_context(format!("opening {}", archive.display())))?;
    let reader = BufReader::new(file);
    std::fs::create_dir_all(outdir)?;
    match format {
        ArchiveFormat::TarXz => unpack(tar::Archive::new(XzDecoder::new(reader)), outdir),
        ArchiveFormat::TarGz => unpack(tar::Archive::new(GzDecoder::new(reader)), outdir),
    }
}

fn unpack<R: Read>(mut archive: tar::Archive<R>, outdir: &Path) -> Result<()> {
    archive.set_preserve_mtime(true);
    archive
        .unpack(outdir)
        .map_err(Error::io_context(format!("extracting into {}", outdir.display())))?;
    Ok(())
}

/// One archive entry, streamed without loading file contents
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub size: u64,
    pub is_dir: bool,
}

/// List entries without unpacking.
pub fn entries(archive: &Path) -> Result<Vec<ArchiveEntry>> {
    let format = ArchiveFormat::from_path(archive)?;
    let file = File::open(archive)?;
    let reader = BufReader::new(file);
    match format {
        ArchiveFormat::TarXz => collect_entries(tar::Archive::new(XzDecoder::new(reader))),
        ArchiveFormat::TarGz => collect_entries(tar::Archive::new(GzDecoder::new(reader))),
    }
}

fn collect_entries<R: Read>(mut archive: tar::Archive<R>) -> Result<Vec<ArchiveEntry>> {
    let mut out = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        out.push(ArchiveEntry {
            path: entry.path()?.into_owned(),
            size: entry.size(),
            is_dir: entry.header().entry_type().is_dir(),
        });
    }
    Ok(out)
}

/// SHA-256 of a file, lowercase hex, streaming.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .map_err(Error::io_context(format!("opening {}", path.display())))?;
    let mut reader = DigestReader::new(BufReader::new(file));
    io::copy(&mut reader, &mut io::sink())?;
    let (_, hash) = reader.finish();
    Ok(hex::encode(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), "alpha").unwrap();
        fs::write(root.join("sub/b.txt"), "beta").unwrap();
    }

    #[test]
    fn test_create_extract_round_trip() {
        let src = tempfile::tempdir().unwrap();
        sample_tree(src.path());
        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("pkg-1.0.0.tar.xz");

        let digest = create(src.path(), &archive).unwrap();
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, sha256_file(&archive).unwrap());

        let out = work.path().join("out");
        extract(&archive, &out).unwrap();
        assert_eq!(fs::read_to_string(out.join("a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(out.join("sub/b.txt")).unwrap(), "beta");
    }

    #[test]
    fn test_entries_streaming() {
        let src = tempfile::tempdir().unwrap();
        sample_tree(src.path());
        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("pkg.tar.xz");
        create(src.path(), &archive).unwrap();

        let list = entries(&archive).unwrap();
        let files: Vec<String> = list
            .iter()
            .filter(|e| !e.is_dir)
            .map(|e| e.path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(files, vec!["a.txt".to_string(), "sub/b.txt".to_string()]);
        assert_eq!(
            list.iter().find(|e| e.path.ends_with("a.txt")).unwrap().size,
            5
        );
    }

    #[test]
    fn test_gzip_supported() {
        let src = tempfile::tempdir().unwrap();
        sample_tree(src.path());
        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("pkg.tar.gz");
        create(src.path(), &archive).unwrap();
        let out = work.path().join("out");
        extract(&archive, &out).unwrap();
        assert!(out.join("sub/b.txt").is_file());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        assert!(ArchiveFormat::from_path(Path::new("pkg.zip")).is_err());
    }

    #[test]
    fn test_digest_stable_across_recreate() {
        let src = tempfile::tempdir().unwrap();
        sample_tree(src.path());
        let work = tempfile::tempdir().unwrap();
        let a1 = work.path().join("one.tar.xz");
        let a2 = work.path().join("two.tar.xz");
        create(src.path(), &a1).unwrap();
        create(src.path(), &a2).unwrap();
        // identical trees with identical mtimes produce identical bytes
        assert_eq!(sha256_file(&a1).unwrap(), sha256_file(&a2).unwrap());
    }
}
