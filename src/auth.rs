//! Credential acquisition for the shared client
//!
//! Reads a service-account key either from an explicit file or from the
//! ambient `GOOGLE_APPLICATION_CREDENTIALS` variable, and exchanges a signed
//! JWT assertion for OAuth2 access tokens.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{CredentialError, QueryError};

/// Environment variable consulted for ambient credentials
pub const AMBIENT_CREDENTIALS_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The subset of a service-account key file the client needs
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

/// Parsed credentials, ready to build a [`TokenSource`]
#[derive(Debug, Clone)]
pub struct Credentials {
    key: ServiceAccountKey,
    origin: PathBuf,
}

impl Credentials {
    /// Load a service-account key from an explicit path
    pub fn from_file(path: &Path) -> Result<Self, CredentialError> {
        let contents = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Read {} bytes of credentials from {:?}", contents.len(), path);
        let key = parse_key(&contents)?;
        Ok(Self {
            key,
            origin: path.to_path_buf(),
        })
    }

    /// Load credentials from the ambient environment
    pub fn from_env() -> Result<Self, CredentialError> {
        Self::from_ambient(std::env::var(AMBIENT_CREDENTIALS_VAR).ok())
    }

    fn from_ambient(value: Option<String>) -> Result<Self, CredentialError> {
        let path = value.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
            CredentialError::MissingAmbient(format!(
                "set {} to the path of a service account key",
                AMBIENT_CREDENTIALS_VAR
            ))
        })?;
        Self::from_file(Path::new(&path))
    }

    /// Project the key was issued for, used when no project id is given
    pub fn project_id(&self) -> Option<&str> {
        self.key.project_id.as_deref()
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub(crate) fn key(&self) -> &ServiceAccountKey {
        &self.key
    }
}

fn parse_key(contents: &str) -> Result<ServiceAccountKey, CredentialError> {
    let key: ServiceAccountKey =
        serde_json::from_str(contents).map_err(|e| CredentialError::Malformed(e.to_string()))?;
    if key.client_email.trim().is_empty() {
        return Err(CredentialError::Malformed("empty client_email".to_string()));
    }
    if !key.private_key.contains("PRIVATE KEY") {
        return Err(CredentialError::Malformed(
            "private_key is not a PEM encoded key".to_string(),
        ));
    }
    Ok(key)
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Issues and caches access tokens for one service account
///
/// The cache is the only lock owned by the client; it is held only for the
/// duration of a token exchange, never across a query wait.
pub struct TokenSource {
    http: Client,
    client_email: String,
    token_uri: String,
    signing_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSource")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl TokenSource {
    pub fn new(
        http: Client,
        credentials: &Credentials,
        token_uri: Option<&str>,
    ) -> Result<Self, CredentialError> {
        let key = credentials.key();
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| CredentialError::Malformed(format!("invalid private key: {}", e)))?;
        Ok(Self {
            http,
            client_email: key.client_email.clone(),
            token_uri: token_uri.unwrap_or(&key.token_uri).to_string(),
            signing_key,
            cached: Mutex::new(None),
        })
    }

    /// Return a valid access token, exchanging a new one if needed
    pub async fn access_token(&self) -> Result<String, QueryError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        log::debug!("Exchanging access token for {}", self.client_email);
        let fresh = self.exchange().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn exchange(&self) -> Result<CachedToken, QueryError> {
        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: BIGQUERY_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| auth_error(format!("cannot sign assertion: {}", e)))?;

        let response = token_request(&self.http, &self.token_uri, &assertion)
            .send()
            .await
            .map_err(QueryError::transport)?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let message = match response.json::<TokenErrorResponse>().await {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {}", err.error, description),
                    None => err.error,
                },
                Err(_) => "Unknown error".to_string(),
            };
            return Err(QueryError::Backend {
                code: Some(code),
                reason: Some("auth".to_string()),
                message,
            });
        }

        let token: TokenResponse = response.json().await.map_err(QueryError::transport)?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        Ok(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}

/// Form-encoded JWT bearer grant for the token endpoint
fn token_request(http: &Client, token_uri: &str, assertion: &str) -> reqwest::RequestBuilder {
    http.post(token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)])
}

fn auth_error(message: String) -> QueryError {
    QueryError::Backend {
        code: None,
        reason: Some("auth".to_string()),
        message,
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod auth_tests;
