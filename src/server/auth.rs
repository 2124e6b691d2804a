// src/server/auth.rs

//! Tokens and identity
//!
//! Three credentials exist:
//!
//! - **id tokens**: short-lived JWTs identifying a user to the API;
//! - **refresh tokens**: opaque one-use strings rotated at `/auth/token`,
//!   with reuse detection revoking the user's whole session set;
//! - **upload bearers**: 3-minute JWTs whose subject is the archive row an
//!   upload may write, minted when a publish is announced.
//!
//! Long-lived CLI tokens are opaque strings checked against the database.

use super::db::{Db, UserRow};
use super::UPLOAD_WINDOW_SECS;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

pub const ID_TOKEN_TTL_MINUTES: i64 = 30;
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 30;

/// Claims of a user id token
#[derive(Debug, Serialize, Deserialize)]
pub struct IdClaims {
    /// User id
    pub sub: i64,
    pub pseudo: String,
    pub email: String,
    pub exp: i64,
    pub iat: i64,
}

/// Claims of an archive upload bearer
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadClaims {
    /// Archive id the bearer may write
    pub sub: String,
    /// Archive file name
    pub name: String,
    /// Payload kind, `recipe` for recipe archives
    pub kind: String,
    pub exp: i64,
}

pub fn issue_id_token(secret: &str, user: &UserRow) -> Result<String> {
    let now = Utc::now();
    let claims = IdClaims {
        sub: user.id,
        pseudo: user.pseudo.clone(),
        email: user.email.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::minutes(ID_TOKEN_TTL_MINUTES)).timestamp(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| Error::Config(format!("signing id token: {e}")))
}

pub fn issue_upload_bearer(secret: &str, archive_id: &str, name: &str, kind: &str) -> Result<String> {
    let claims = UploadClaims {
        sub: archive_id.to_string(),
        name: name.to_string(),
        kind: kind.to_string(),
        exp: (Utc::now() + Duration::seconds(UPLOAD_WINDOW_SECS)).timestamp(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| Error::Config(format!("signing upload bearer: {e}")))
}

pub fn verify_id_token(secret: &str, token: &str) -> Result<IdClaims> {
    decode::<IdClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| Error::Auth(format!("invalid id token: {e}")))
}

pub fn verify_upload_bearer(secret: &str, token: &str) -> Result<UploadClaims> {
    decode::<UploadClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| Error::Auth(format!("invalid upload bearer: {e}")))
}

/// Opaque random token for refresh and CLI credentials.
pub fn random_token() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Mint a fresh refresh token for `user`.
pub fn issue_refresh_token(db: &Db, user: &UserRow) -> Result<(String, DateTime<Utc>)> {
    let token = random_token();
    let expires = Utc::now() + Duration::days(REFRESH_TOKEN_TTL_DAYS);
    db.insert_refresh_token(user.id, &token, expires)?;
    Ok((token, expires))
}

/// Authenticate a `Bearer` value: id token first, CLI token fallback.
pub fn authenticate(db: &Db, secret: &str, bearer: &str) -> Result<UserRow> {
    if let Ok(claims) = verify_id_token(secret, bearer) {
        return db
            .user_by_id(claims.sub)?
            .ok_or_else(|| Error::Auth("unknown user".to_string()));
    }
    db.user_by_cli_token(bearer)?
        .ok_or_else(|| Error::Auth("invalid token".to_string()))
}

/// Third-party identity of an exchanged OAuth code
#[derive(Debug, Deserialize)]
pub struct OAuthIdentity {
    pub email: String,
}

/// Exchange an OAuth code with the named provider for the user's email.
///
/// The provider contract is external; only GitHub and Google are known.
pub async fn exchange_oauth_code(
    config: &super::Config,
    provider: &str,
    code: &str,
) -> Result<OAuthIdentity> {
    match provider {
        "github" => {
            let (id, secret) = config
                .github_client_id
                .as_deref()
                .zip(config.github_client_secret.as_deref())
                .ok_or_else(|| Error::Config("GitHub OAuth is not configured".to_string()))?;
            exchange_github(id, secret, code).await
        }
        "google" => {
            let (id, secret) = config
                .google_client_id
                .as_deref()
                .zip(config.google_client_secret.as_deref())
                .ok_or_else(|| Error::Config("Google OAuth is not configured".to_string()))?;
            exchange_google(id, secret, code).await
        }
        other => Err(Error::Auth(format!("unknown OAuth provider `{other}`"))),
    }
}

#[derive(Deserialize)]
struct GithubAccessToken {
    access_token: String,
}

#[derive(Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

async fn exchange_github(client_id: &str, client_secret: &str, code: &str) -> Result<OAuthIdentity> {
    let http = reqwest::Client::new();
    let token: GithubAccessToken = http
        .post("https://github.com/login/oauth/access_token")
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
        ])
        .send()
        .await?
        .error_for_status()
        .map_err(|e| Error::Auth(format!("GitHub rejected the code: {e}")))?
        .json()
        .await?;

    let emails: Vec<GithubEmail> = http
        .get("https://api.github.com/user/emails")
        .header(reqwest::header::USER_AGENT, "dop-registry")
        .bearer_auth(&token.access_token)
        .send()
        .await?
        .error_for_status()
        .map_err(|e| Error::Auth(format!("GitHub email lookup failed: {e}")))?
        .json()
        .await?;

    emails
        .into_iter()
        .find(|e| e.primary && e.verified)
        .map(|e| OAuthIdentity { email: e.email })
        .ok_or_else(|| Error::Auth("GitHub account has no verified primary email".to_string()))
}

#[derive(Deserialize)]
struct GoogleAccessToken {
    access_token: String,
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    email: String,
}

async fn exchange_google(client_id: &str, client_secret: &str, code: &str) -> Result<OAuthIdentity> {
    let http = reqwest::Client::new();
    let token: GoogleAccessToken = http
        .post("https://oauth2.googleapis.com/token")
        .form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?
        .error_for_status()
        .map_err(|e| Error::Auth(format!("Google rejected the code: {e}")))?
        .json()
        .await?;

    let info: GoogleUserInfo = http
        .get("https://openidconnect.googleapis.com/v1/userinfo")
        .bearer_auth(&token.access_token)
        .send()
        .await?
        .error_for_status()
        .map_err(|e| Error::Auth(format!("Google userinfo failed: {e}")))?
        .json()
        .await?;

    Ok(OAuthIdentity { email: info.email })
}
