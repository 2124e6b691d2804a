// src/commands/search.rs

//! `dop search` - query the registry catalog

use super::registry_client;
use crate::error::{Error, Result};
use crate::services::registry::SearchQuery;

#[allow(clippy::too_many_arguments)]
pub fn run(
    regex: bool,
    case_sensitive: bool,
    name_only: bool,
    extended: bool,
    latest_only: bool,
    limit: Option<u32>,
    all: bool,
    pattern: Option<String>,
) -> Result<()> {
    if pattern.is_none() && !all {
        return Err(Error::Config(
            "a search PATTERN is required unless --all is given".to_string(),
        ));
    }
    let client = registry_client()?;
    let entries = client.search(&SearchQuery {
        pattern,
        regex,
        case_sensitive,
        name_only,
        extended,
        latest_only,
        limit,
    })?;

    if entries.is_empty() {
        println!("No package found");
        return Ok(());
    }

    for entry in &entries {
        match &entry.description {
            Some(description) => println!("{} {} - {}", entry.name, entry.last_version, description),
            None => println!("{} {}", entry.name, entry.last_version),
        }
        if extended {
            for rev in &entry.revisions {
                let by = rev.created_by.as_deref().unwrap_or("unknown");
                println!(
                    "    {} {} ({}, {})",
                    rev.version,
                    rev.revision,
                    rev.created.format("%Y-%m-%d"),
                    by
                );
            }
        }
    }
    Ok(())
}
