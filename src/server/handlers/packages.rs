// src/server/handlers/packages.rs

//! Package catalog and publish announcement

use super::{bearer, ApiError};
use crate::server::{auth, AppState, UPLOAD_WINDOW_SECS};
use crate::services::registry::{
    PublishRequest, PublishResponse, RecipeResource, SearchEntry, SearchQuery, SearchRevision,
};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use semver::Version;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// POST /v1/packages - announce a recipe publication.
///
/// Creates the provisional archive row and answers with the short-lived
/// upload bearer. Announcing an already-finalized `(name, version,
/// revision)` is a conflict; re-announcing a provisional one re-issues a
/// bearer for the same archive.
pub async fn announce(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, ApiError> {
    let user = auth::authenticate(&state.db, &state.config.jwt_secret, bearer(&headers)?)?;

    Version::parse(&request.version)
        .map_err(|_| ApiError::bad_request(format!("bad version `{}`", request.version)))?;
    if request.revision.len() != 16 || !request.revision.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ApiError::bad_request(format!(
            "bad revision `{}`",
            request.revision
        )));
    }

    let archive_name = format!(
        "{}-{}-{}.tar.xz",
        request.name, request.version, request.revision
    );

    let archive_id = match state
        .db
        .find_recipe_archive(&request.name, &request.version, &request.revision)?
    {
        Some((_, true)) => {
            return Err(ApiError::new(
                axum::http::StatusCode::CONFLICT,
                format!("{archive_name} is already published"),
            ));
        }
        Some((id, false)) => id,
        None => {
            let package_id =
                state
                    .db
                    .upsert_package(&request.name, request.description.as_deref(), user.id)?;
            let id = uuid::Uuid::new_v4().to_string();
            state.db.create_recipe_upload(
                package_id,
                &request.version,
                &request.revision,
                &id,
                &archive_name,
                user.id,
            )?;
            id
        }
    };

    let upload_bearer = auth::issue_upload_bearer(
        &state.config.jwt_secret,
        &archive_id,
        &archive_name,
        "recipe",
    )?;
    info!(
        "{} announced {archive_name}, upload window open",
        user.pseudo
    );

    // provisional rows left behind by a client that never uploads are
    // reaped once the bearer has expired
    let reaper_state = state.clone();
    let reaper_id = archive_id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(UPLOAD_WINDOW_SECS as u64 + 30)).await;
        if let Ok(Some(archive)) = reaper_state.db.archive_by_id(&reaper_id) {
            if !archive.upload_done {
                warn!("upload window for {} expired, dropping row", archive.name);
                let _ = reaper_state
                    .storage
                    .delete_blob(&reaper_state.db, &archive.id, &archive.name);
                let _ = reaper_state.db.delete_archive(&archive.id);
            }
        }
    });

    Ok(Json(PublishResponse {
        upload_bearer,
        archive_name,
    }))
}

/// GET /v1/packages - search the catalog.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchEntry>>, ApiError> {
    let matcher = Matcher::new(&query)?;
    let mut out = Vec::new();

    for package in state.db.list_packages()? {
        let haystack_desc = package.description.as_deref().unwrap_or("");
        let matched = matcher.matches(&package.name)
            || (!query.name_only && matcher.matches(haystack_desc));
        if !matched {
            continue;
        }

        let recipes = state.db.recipes_of_package(&package.name)?;
        if recipes.is_empty() {
            continue;
        }
        let last_version = recipes
            .iter()
            .filter_map(|r| Version::parse(&r.version).ok())
            .max()
            .map(|v| v.to_string())
            .unwrap_or_else(|| recipes[0].version.clone());

        let revisions = if query.extended {
            let mut revs: Vec<SearchRevision> = recipes
                .iter()
                .filter(|r| !query.latest_only || r.version == last_version)
                .map(|r| SearchRevision {
                    version: r.version.clone(),
                    revision: r.revision.clone(),
                    created: r.created,
                    created_by: r.created_by.clone(),
                })
                .collect();
            if query.latest_only {
                revs.truncate(1);
            }
            revs
        } else {
            vec![]
        };

        out.push(SearchEntry {
            name: package.name,
            description: package.description,
            last_version,
            revisions,
        });
        if let Some(limit) = query.limit {
            if out.len() >= limit as usize {
                break;
            }
        }
    }
    Ok(Json(out))
}

/// GET /v1/packages/:pack/versions
pub async fn versions(
    State(state): State<Arc<AppState>>,
    Path(pack): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let Some(raw) = state.db.package_versions(&pack)? else {
        return Err(ApiError::not_found(format!("package {pack}")));
    };
    let mut parsed: Vec<Version> = raw
        .iter()
        .filter_map(|v| Version::parse(v).ok())
        .collect();
    parsed.sort();
    Ok(Json(parsed.into_iter().map(|v| v.to_string()).collect()))
}

#[derive(Debug, serde::Deserialize)]
pub struct RecipeQuery {
    pub revision: Option<String>,
}

/// GET /v1/packages/:pack/recipes/:version - latest-created revision unless
/// pinned with `?revision=`.
pub async fn recipe(
    State(state): State<Arc<AppState>>,
    Path((pack, version)): Path<(String, String)>,
    Query(query): Query<RecipeQuery>,
) -> Result<Json<RecipeResource>, ApiError> {
    let recipes = state.db.recipes_of_version(&pack, &version)?;
    let row = match &query.revision {
        Some(rev) => recipes.iter().find(|r| &r.revision == rev),
        None => recipes.first(),
    };
    let Some(row) = row else {
        return Err(ApiError::not_found(format!("recipe {pack}@{version}")));
    };
    Ok(Json(RecipeResource {
        name: row.package.clone(),
        version: row.version.clone(),
        revision: row.revision.clone(),
        archive_name: row.archive_name.clone(),
        sha256: row.sha256.clone().unwrap_or_default(),
        created: row.created,
        created_by: row.created_by.clone(),
    }))
}

/// Pattern matching for the search endpoint
struct Matcher {
    regex: Option<regex::Regex>,
    substring: Option<String>,
    case_sensitive: bool,
}

impl Matcher {
    fn new(query: &SearchQuery) -> Result<Matcher, ApiError> {
        let Some(pattern) = &query.pattern else {
            return Ok(Matcher {
                regex: None,
                substring: None,
                case_sensitive: false,
            });
        };
        if query.regex {
            let built = regex::RegexBuilder::new(pattern)
                .case_insensitive(!query.case_sensitive)
                .build()
                .map_err(|e| ApiError::bad_request(format!("bad pattern: {e}")))?;
            Ok(Matcher {
                regex: Some(built),
                substring: None,
                case_sensitive: query.case_sensitive,
            })
        } else {
            Ok(Matcher {
                regex: None,
                substring: Some(if query.case_sensitive {
                    pattern.clone()
                } else {
                    pattern.to_lowercase()
                }),
                case_sensitive: query.case_sensitive,
            })
        }
    }

    fn matches(&self, haystack: &str) -> bool {
        if let Some(regex) = &self.regex {
            return regex.is_match(haystack);
        }
        match &self.substring {
            Some(needle) if self.case_sensitive => haystack.contains(needle),
            Some(needle) => haystack.to_lowercase().contains(needle),
            // no pattern: match everything (list all)
            None => true,
        }
    }
}
