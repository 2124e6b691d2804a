// src/recipe/host.rs

//! Host functions exposed to recipe scripts
//!
//! Everything a recipe can do to the outside world goes through these
//! functions: path manipulation, filesystem access, subprocess spawning,
//! downloads, checksums and archive I/O. Host failures surface into the
//! script as runtime errors carrying the underlying message; an uncaught
//! one aborts the recipe operation.

use crate::archive;
use crate::recipe::value;
use md5::Md5;
use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, Map, NativeCallContext, Position};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error, info, trace, warn};

type HostResult<T> = Result<T, Box<EvalAltResult>>;

fn host_err(msg: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(msg.into()),
        Position::NONE,
    ))
}

fn io_err(context: &str, e: std::io::Error) -> Box<EvalAltResult> {
    host_err(format!("{context}: {e}"))
}

pub(crate) fn register(engine: &mut Engine) {
    engine.register_fn("path", |a: &str| a.to_string());
    engine.register_fn("path", path2);
    engine.register_fn("path", path3);
    engine.register_fn("path", path4);
    engine.register_fn("dir_name", |p: &str| dir_name_n(p, 1));
    engine.register_fn("dir_name", dir_name_n);
    engine.register_fn("base_name", base_name);
    engine.register_fn("cwd", cwd);
    engine.register_fn("chdir", chdir);
    engine.register_fn("is_file", |p: &str| Path::new(p).is_file());
    engine.register_fn("is_dir", |p: &str| Path::new(p).is_dir());
    engine.register_fn("mkdir", mkdir_plain);
    engine.register_fn("mkdir", mkdir_table);
    engine.register_fn("copy", copy_file);
    engine.register_fn("install_file", install_file);
    engine.register_fn("install_dir", install_dir);
    engine.register_fn("run_cmd", run_cmd);
    engine.register_fn("profile_environment", profile_environment);
    engine.register_fn("download", download);
    engine.register_fn("checksum", checksum);
    engine.register_fn("create_archive", create_archive);
    engine.register_fn("extract_archive", extract_archive);
    engine.register_fn("from_dir", from_dir);
}

// -- paths ------------------------------------------------------------------

fn join_checked(parts: &[&str]) -> HostResult<String> {
    let mut joined = PathBuf::from(parts[0]);
    for part in &parts[1..] {
        if Path::new(part).is_absolute() {
            return Err(host_err(format!(
                "path(): all but the first part must be relative, got `{part}`"
            )));
        }
        joined.push(part);
    }
    Ok(joined.to_string_lossy().into_owned())
}

fn path2(a: &str, b: &str) -> HostResult<String> {
    join_checked(&[a, b])
}

fn path3(a: &str, b: &str, c: &str) -> HostResult<String> {
    join_checked(&[a, b, c])
}

fn path4(a: &str, b: &str, c: &str, d: &str) -> HostResult<String> {
    join_checked(&[a, b, c, d])
}

/// Lexically normalize a POSIX path into components, resolving `.` and `..`.
fn normalize(p: &str) -> HostResult<(bool, Vec<String>)> {
    let absolute = p.starts_with('/');
    let mut comps: Vec<String> = Vec::new();
    for part in p.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if comps.pop().is_none() {
                    return Err(host_err(format!("path `{p}` escapes the root")));
                }
            }
            other => comps.push(other.to_string()),
        }
    }
    Ok((absolute, comps))
}

fn render(absolute: bool, comps: &[String]) -> String {
    if absolute {
        format!("/{}", comps.join("/"))
    } else if comps.is_empty() {
        ".".to_string()
    } else {
        comps.join("/")
    }
}

fn dir_name_n(p: &str, n: i64) -> HostResult<String> {
    if n < 1 {
        return Err(host_err("dir_name(): n must be >= 1"));
    }
    let (absolute, mut comps) = normalize(p)?;
    for _ in 0..n {
        if comps.pop().is_none() {
            return Err(host_err(format!("dir_name(): `{p}` has no parent at depth {n}")));
        }
    }
    Ok(render(absolute, &comps))
}

fn base_name(p: &str) -> HostResult<String> {
    let (absolute, comps) = normalize(p)?;
    match comps.last() {
        Some(last) => Ok(last.clone()),
        None if absolute => Ok("/".to_string()),
        None => Err(host_err(format!("base_name(): `{p}` has no base name"))),
    }
}

// -- filesystem -------------------------------------------------------------

fn cwd() -> HostResult<String> {
    std::env::current_dir()
        .map(|p| p.display().to_string())
        .map_err(|e| io_err("cwd()", e))
}

fn chdir(p: &str) -> HostResult<()> {
    std::env::set_current_dir(p).map_err(|e| io_err(&format!("chdir({p})"), e))
}

fn mkdir_plain(p: &str) -> HostResult<()> {
    fs::create_dir(p).map_err(|e| io_err(&format!("mkdir({p})"), e))
}

fn mkdir_table(spec: Map) -> HostResult<()> {
    let dir = get_string(&spec, "dir").or_else(|_| get_string(&spec, "path"))?;
    let recurse = spec.get("recurse").and_then(|d| d.as_bool().ok()).unwrap_or(false);
    let result = if recurse {
        fs::create_dir_all(&dir)
    } else {
        fs::create_dir(&dir)
    };
    result.map_err(|e| io_err(&format!("mkdir({dir})"), e))
}

fn copy_file(src: &str, dst: &str) -> HostResult<()> {
    fs::copy(src, dst)
        .map(|_| ())
        .map_err(|e| io_err(&format!("copy({src}, {dst})"), e))
}

fn preserve_mtime(src: &Path, dst: &Path) -> std::io::Result<()> {
    let meta = fs::metadata(src)?;
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(dst, mtime)
}

fn install_file(src: &str, dst: &str) -> HostResult<()> {
    let (src, dst) = (Path::new(src), Path::new(dst));
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("install_file()", e))?;
    }
    fs::copy(src, dst).map_err(|e| io_err(&format!("install_file({})", src.display()), e))?;
    preserve_mtime(src, dst).map_err(|e| io_err("install_file(): setting mtime", e))?;
    Ok(())
}

fn install_dir(src: &str, dst: &str) -> HostResult<()> {
    let (src, dst) = (Path::new(src), Path::new(dst));
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.map_err(|e| host_err(format!("install_dir(): {e}")))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir stays under src");
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| io_err("install_dir()", e))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| io_err("install_dir()", e))?;
            }
            fs::copy(entry.path(), &target)
                .map_err(|e| io_err(&format!("install_dir({})", entry.path().display()), e))?;
            preserve_mtime(entry.path(), &target)
                .map_err(|e| io_err("install_dir(): setting mtime", e))?;
        }
    }
    Ok(())
}

// -- subprocesses -----------------------------------------------------------

fn run_cmd(spec: Map) -> HostResult<Dynamic> {
    let argv: Vec<String> = match spec.get("cmd") {
        Some(d) => d
            .read_lock::<Array>()
            .map(|arr| {
                arr.iter()
                    .map(|a| a.clone().into_string().map_err(|t| host_err(format!("run_cmd(): argv entries must be strings, got {t}"))))
                    .collect::<HostResult<Vec<String>>>()
            })
            .ok_or_else(|| host_err("run_cmd(): `cmd` must be an array"))??,
        None => return Err(host_err("run_cmd(): missing `cmd`")),
    };
    if argv.is_empty() {
        return Err(host_err("run_cmd(): empty argv"));
    }

    let allow_fail = spec.get("allow_fail").and_then(|d| d.as_bool().ok()).unwrap_or(false);
    let catch_output = spec.get("catch_output").and_then(|d| d.as_bool().ok()).unwrap_or(false);
    let loglevel = spec
        .get("loglevel")
        .and_then(|d| d.clone().into_string().ok())
        .unwrap_or_else(|| "debug".to_string());

    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]);
    if let Some(dir) = spec.get("workdir").and_then(|d| d.clone().into_string().ok()) {
        command.current_dir(dir);
    }
    if let Some(env_dyn) = spec.get("env") {
        let env_map = env_dyn
            .read_lock::<Map>()
            .ok_or_else(|| host_err("run_cmd(): `env` must be a table"))?;
        for (k, v) in env_map.iter() {
            let v = v
                .clone()
                .into_string()
                .map_err(|_| host_err(format!("run_cmd(): env `{k}` must be a string")))?;
            command.env(k.as_str(), v);
        }
    }

    debug!("running {}", argv.join(" "));
    let output = command
        .output()
        .map_err(|e| io_err(&format!("run_cmd({})", argv[0]), e))?;
    let status = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !catch_output && !stdout.is_empty() {
        match loglevel.as_str() {
            "trace" => trace!("{}", stdout.trim_end()),
            "info" => info!("{}", stdout.trim_end()),
            "warn" => warn!("{}", stdout.trim_end()),
            "error" => error!("{}", stdout.trim_end()),
            _ => debug!("{}", stdout.trim_end()),
        }
    }

    if status != 0 && !allow_fail {
        let mut detail = String::new();
        if !stderr.trim().is_empty() {
            detail.push_str(stderr.trim());
        }
        if !stdout.trim().is_empty() {
            if !detail.is_empty() {
                detail.push('\n');
            }
            detail.push_str(stdout.trim());
        }
        return Err(host_err(format!(
            "command `{}` failed with status {status}\n{detail}",
            argv.join(" ")
        )));
    }

    let result = match (catch_output, allow_fail) {
        (true, true) => {
            let mut map = Map::new();
            map.insert("status".into(), Dynamic::from(status as i64));
            map.insert("output".into(), Dynamic::from(stdout));
            Dynamic::from_map(map)
        }
        (true, false) => Dynamic::from(stdout),
        (false, true) => Dynamic::from(status as i64),
        (false, false) => Dynamic::UNIT,
    };
    Ok(result)
}

// -- profile ----------------------------------------------------------------

fn profile_environment(profile: Map) -> HostResult<Map> {
    let profile = value::map_to_profile(&profile).map_err(|e| host_err(e.to_string()))?;
    let mut env = std::collections::HashMap::new();
    profile.collect_environment(&mut env);
    let mut out = Map::new();
    for (k, v) in env {
        out.insert(k.as_str().into(), Dynamic::from(v));
    }
    Ok(out)
}

// -- network ----------------------------------------------------------------

fn download(spec: Map) -> HostResult<()> {
    let url = get_string(&spec, "url")?;
    let dest = get_string(&spec, "dest")?;
    info!("downloading {url}");
    let response = reqwest::blocking::get(&url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| host_err(format!("download({url}): {e}")))?;
    let mut file = File::create(&dest).map_err(|e| io_err(&format!("download() creating {dest}"), e))?;
    let mut reader = response;
    std::io::copy(&mut reader, &mut file).map_err(|e| io_err("download()", e))?;
    Ok(())
}

// -- checksums --------------------------------------------------------------

fn checksum(spec: Map) -> HostResult<()> {
    let files = get_string_or_array(&spec, "files")?
        .ok_or_else(|| host_err("checksum(): missing `files`"))?;
    for algo in ["md5", "sha1", "sha256"] {
        let Some(sums) = get_string_or_array(&spec, algo)? else {
            continue;
        };
        if sums.len() != files.len() {
            return Err(host_err(format!(
                "checksum(): {} {algo} sums for {} files",
                sums.len(),
                files.len()
            )));
        }
        for (file, want) in files.iter().zip(&sums) {
            let got = hash_file(file, algo)?;
            if !got.eq_ignore_ascii_case(want) {
                return Err(host_err(format!(
                    "checksum(): {algo} mismatch for {file}: expected {want}, got {got}"
                )));
            }
        }
    }
    Ok(())
}

fn hash_file(path: &str, algo: &str) -> HostResult<String> {
    let file = File::open(path).map_err(|e| io_err(&format!("checksum() opening {path}"), e))?;
    let mut reader = BufReader::new(file);
    let mut buf = [0u8; 64 * 1024];

    macro_rules! digest_loop {
        ($hasher:expr) => {{
            let mut hasher = $hasher;
            loop {
                let n = reader.read(&mut buf).map_err(|e| io_err("checksum()", e))?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            hex::encode(hasher.finalize())
        }};
    }

    let hexsum = match algo {
        "md5" => digest_loop!(Md5::new()),
        "sha1" => digest_loop!(Sha1::new()),
        "sha256" => digest_loop!(Sha256::new()),
        other => return Err(host_err(format!("checksum(): unknown algorithm {other}"))),
    };
    Ok(hexsum)
}

// -- archives ---------------------------------------------------------------

fn create_archive(spec: Map) -> HostResult<String> {
    let indir = get_string(&spec, "indir")?;
    let archive_path = get_string(&spec, "archive")?;
    archive::create(Path::new(&indir), Path::new(&archive_path))
        .map_err(|e| host_err(e.to_string()))
}

fn extract_archive(spec: Map) -> HostResult<()> {
    let archive_path = get_string(&spec, "archive")?;
    let outdir = get_string(&spec, "outdir")?;
    archive::extract(Path::new(&archive_path), Path::new(&outdir))
        .map_err(|e| host_err(e.to_string()))
}

// -- scoped cwd -------------------------------------------------------------

/// Run `f` with the working directory set to `dir`, restoring the previous
/// working directory on all exit paths including script errors.
fn from_dir(ctx: NativeCallContext, dir: &str, f: FnPtr) -> HostResult<Dynamic> {
    let prev = std::env::current_dir().map_err(|e| io_err("from_dir()", e))?;
    std::env::set_current_dir(dir).map_err(|e| io_err(&format!("from_dir({dir})"), e))?;
    let result = f.call_within_context(&ctx, ());
    if let Err(e) = std::env::set_current_dir(&prev) {
        // restoring must not mask the callback's own failure
        if result.is_ok() {
            return Err(io_err("from_dir(): restoring working directory", e));
        }
    }
    result
}

// -- table helpers ----------------------------------------------------------

fn get_string(map: &Map, key: &str) -> HostResult<String> {
    map.get(key)
        .and_then(|d| d.clone().into_string().ok())
        .ok_or_else(|| host_err(format!("missing or non-string field `{key}`")))
}

fn get_string_or_array(map: &Map, key: &str) -> HostResult<Option<Vec<String>>> {
    let Some(d) = map.get(key) else {
        return Ok(None);
    };
    if d.is_string() {
        return Ok(Some(vec![d.clone().into_string().expect("checked string")]));
    }
    let arr = d
        .read_lock::<Array>()
        .ok_or_else(|| host_err(format!("`{key}` must be a string or array of strings")))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr.iter() {
        out.push(
            item.clone()
                .into_string()
                .map_err(|_| host_err(format!("`{key}` entries must be strings")))?,
        );
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_name_semantics() {
        assert_eq!(dir_name_n("/a/b/c", 1).unwrap(), "/a/b");
        assert_eq!(dir_name_n("/a/b/c", 2).unwrap(), "/a");
        assert_eq!(dir_name_n("/a/b/./c/..", 1).unwrap(), "/");
        assert_eq!(dir_name_n("a/b", 1).unwrap(), "a");
        assert_eq!(dir_name_n("a", 1).unwrap(), ".");
        assert!(dir_name_n("/", 1).is_err());
        assert!(dir_name_n("/a", 2).is_err());
        assert!(dir_name_n("/a/../..", 1).is_err());
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/a/b/c.txt").unwrap(), "c.txt");
        assert_eq!(base_name("a/b/").unwrap(), "b");
        assert_eq!(base_name("/").unwrap(), "/");
    }

    #[test]
    fn test_path_join_rejects_absolute_tail() {
        assert_eq!(path2("/root", "sub").unwrap(), "/root/sub");
        assert!(path2("/root", "/abs").is_err());
        assert_eq!(path3("/root", "a", "b").unwrap(), "/root/a/b");
    }

    #[test]
    fn test_hash_file_algorithms() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data");
        fs::write(&file, b"abc").unwrap();
        let path = file.to_string_lossy().into_owned();
        assert_eq!(hash_file(&path, "md5").unwrap(), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(hash_file(&path, "sha1").unwrap(), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(
            hash_file(&path, "sha256").unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(hash_file(&path, "crc32").is_err());
    }

    #[test]
    fn test_install_dir_mirrors_tree() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("bin")).unwrap();
        fs::write(src.path().join("bin/tool"), "#!/bin/sh").unwrap();
        let dst = tempfile::tempdir().unwrap();
        let dest = dst.path().join("out");
        install_dir(
            &src.path().to_string_lossy(),
            &dest.to_string_lossy(),
        )
        .unwrap();
        assert_eq!(fs::read_to_string(dest.join("bin/tool")).unwrap(), "#!/bin/sh");
        let src_mtime = fs::metadata(src.path().join("bin/tool")).unwrap().modified().unwrap();
        let dst_mtime = fs::metadata(dest.join("bin/tool")).unwrap().modified().unwrap();
        assert_eq!(src_mtime, dst_mtime);
    }

    #[test]
    fn test_install_file_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("new");
        let dst = dir.path().join("sub/existing");
        fs::write(&src, "new content").unwrap();
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::write(&dst, "old content").unwrap();
        install_file(&src.to_string_lossy(), &dst.to_string_lossy()).unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "new content");
    }
}
