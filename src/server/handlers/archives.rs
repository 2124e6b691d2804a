// src/server/handlers/archives.rs

//! Archive upload and content-addressed retrieval

use super::{bearer, ApiError};
use crate::server::{auth, AppState};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{info, warn};

/// POST /archive - upload the bytes announced earlier.
///
/// The body streams through a spool file while a rolling SHA-256 runs; only
/// a digest matching `X-Digest` commits the blob and flips `upload_done`.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, ApiError> {
    let claims = auth::verify_upload_bearer(&state.config.jwt_secret, bearer(&headers)?)
        .map_err(|e| ApiError::forbidden(e.to_string()))?;

    let archive = state
        .db
        .archive_by_id(&claims.sub)?
        .ok_or_else(|| ApiError::forbidden("upload bearer references no archive"))?;
    if archive.upload_done {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("{} is already uploaded", archive.name),
        ));
    }

    let expected = parse_digest_header(&headers)?;

    // spool to disk while hashing; nothing is committed before the digest
    // checks out
    let mut spool = tempfile::NamedTempFile::new()
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let mut hasher = Sha256::new();
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| ApiError::bad_request(format!("error reading upload: {e}")))?;
        hasher.update(&chunk);
        spool
            .write_all(&chunk)
            .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }
    spool
        .flush()
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let digest: [u8; 32] = hasher.finalize().into();

    if digest != expected {
        warn!("digest mismatch uploading {}, dropping row", archive.name);
        let _ = state.storage.delete_blob(&state.db, &archive.id, &archive.name);
        state.db.delete_archive(&archive.id)?;
        return Err(ApiError::bad_request("SHA256 do not match with uploaded data"));
    }

    // commit the blob
    let mut writer = state.storage.writer(&archive.id, &archive.name)?;
    let mut file = spool
        .reopen()
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        if n == 0 {
            break;
        }
        writer.write_chunk(&buf[..n])?;
    }
    writer.finish(&state.db)?;

    // index the contents; recipe archives additionally contribute the
    // script and a README to the catalog
    let entries = crate::archive::entries(spool.path())
        .map_err(|e| ApiError::bad_request(format!("unreadable archive: {e}")))?;
    let files: Vec<(String, u64)> = entries
        .iter()
        .filter(|e| !e.is_dir)
        .map(|e| (e.path.to_string_lossy().into_owned(), e.size))
        .collect();

    let recipe_content = if claims.kind == "recipe" {
        extract_recipe_content(spool.path())
    } else {
        None
    };
    state.db.finalize_archive(
        &archive.id,
        &hex::encode(digest),
        &files,
        recipe_content
            .as_ref()
            .map(|(script, readme)| (script.as_str(), readme.as_deref())),
    )?;

    info!("archive {} uploaded ({} files)", archive.name, files.len());
    Ok(StatusCode::OK)
}

fn parse_digest_header(headers: &HeaderMap) -> Result<[u8; 32], ApiError> {
    let value = headers
        .get("X-Digest")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing X-Digest header"))?;
    let b64 = value
        .strip_prefix("sha-256=")
        .ok_or_else(|| ApiError::bad_request("X-Digest must be `sha-256=<base64>`"))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|_| ApiError::bad_request("X-Digest is not valid base64"))?;
    bytes
        .try_into()
        .map_err(|_| ApiError::bad_request("X-Digest is not a SHA-256"))
}

/// Recipe script and README out of an uploaded recipe archive.
fn extract_recipe_content(archive: &std::path::Path) -> Option<(String, Option<String>)> {
    let scratch = tempfile::tempdir().ok()?;
    crate::archive::extract(archive, scratch.path()).ok()?;
    let script = std::fs::read_to_string(scratch.path().join(crate::recipe_dir::RECIPE_FILE)).ok()?;
    let readme = ["README.md", "README", "README.txt"]
        .iter()
        .find_map(|name| std::fs::read_to_string(scratch.path().join(name)).ok());
    Some((script, readme))
}

/// GET|HEAD /archive/:name - content-addressed download with single-range
/// support.
pub async fn download(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let archive = state
        .db
        .archive_by_name(&name)?
        .filter(|a| a.upload_done)
        .ok_or_else(|| ApiError::not_found(format!("archive {name}")))?;

    let size = state.storage.blob_size(&state.db, &archive.id, &archive.name)?;
    let range = match headers.get(header::RANGE).map(|v| v.to_str()) {
        None => None,
        Some(Ok(value)) => Some(parse_range(value, size).map_err(ApiError::bad_request)?),
        Some(Err(_)) => return Err(ApiError::bad_request("unreadable Range header")),
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{name}\""))
            .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?,
    );
    if state.storage.support_slice() {
        response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }
    if wants_sha256_digest(&headers) {
        if let Some(sha256) = &archive.sha256 {
            let raw = hex::decode(sha256)
                .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            let b64 = base64::engine::general_purpose::STANDARD.encode(raw);
            response_headers.insert(
                "Digest",
                HeaderValue::from_str(&format!("sha-256={b64}"))
                    .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?,
            );
        }
    }

    if method == Method::GET {
        state.db.increment_counter(&archive.id)?;
    }

    let (status, start_end) = match range {
        None => (StatusCode::OK, None),
        Some((start, end)) => {
            response_headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {start}-{end}/{size}"))
                    .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?,
            );
            (StatusCode::PARTIAL_CONTENT, Some((start, end)))
        }
    };

    let body = state
        .storage
        .get_blob(&state.db, &archive.id, &archive.name, start_end)?;
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(body.len() as u64),
    );

    Ok((status, response_headers, body).into_response())
}

fn wants_sha256_digest(headers: &HeaderMap) -> bool {
    headers
        .get("Want-Digest")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("sha-256"))
}

/// Parse a single `bytes=` range. Multi-range, suffix ranges, inverted
/// bounds and ends past the content length are all rejected.
fn parse_range(value: &str, size: u64) -> Result<(u64, u64), String> {
    let spec = value
        .strip_prefix("bytes=")
        .ok_or_else(|| format!("unsupported range unit in `{value}`"))?;
    if spec.contains(',') {
        return Err("multi-range requests are not supported".to_string());
    }
    let (start_s, end_s) = spec
        .split_once('-')
        .ok_or_else(|| format!("malformed range `{value}`"))?;
    if start_s.is_empty() {
        return Err("suffix ranges are not supported".to_string());
    }
    let start: u64 = start_s
        .parse()
        .map_err(|_| format!("malformed range `{value}`"))?;
    let end: u64 = if end_s.is_empty() {
        size.saturating_sub(1)
    } else {
        end_s.parse().map_err(|_| format!("malformed range `{value}`"))?
    };
    if start > end {
        return Err(format!("inverted range {start}-{end}"));
    }
    if end >= size {
        return Err(format!("range end {end} past content length {size}"));
    }
    Ok((start, end))
}
