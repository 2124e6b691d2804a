// src/commands/login.rs

//! `dop login` - persist a registry credential

use super::registry_url;
use crate::error::Result;
use crate::services::Credentials;

pub fn run(registry: Option<String>, token: String) -> Result<()> {
    let registry = registry.unwrap_or_else(registry_url);
    let mut credentials = Credentials::load()?;
    credentials.set_token(&registry, &token);
    credentials.save()?;
    println!("Token stored for {registry}");
    Ok(())
}
