//! Application Default Credentials.
//!
//! Discovery order: `GOOGLE_OAUTH_ACCESS_TOKEN`, then the file named by
//! `GOOGLE_APPLICATION_CREDENTIALS`, then gcloud's well-known
//! `application_default_credentials.json`.

use crate::CredentialProvider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use vmprov_common::{ApiError, ProvisionError};

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
pub const CREDENTIALS_FILE_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
// Refresh this long before the provider-declared expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

pub const ADC_HELP: &str = "Could not find Application Default Credentials. \
Run 'gcloud auth application-default login' or set GOOGLE_APPLICATION_CREDENTIALS. \
See https://cloud.google.com/docs/authentication/provide-credentials-adc for more information.";

/// Pre-issued bearer token, used as-is.
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into().trim().to_string(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }

    fn describe(&self) -> String {
        format!("static access token ({})", ACCESS_TOKEN_ENV)
    }
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Contents of an ADC json file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsFile {
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default)]
        private_key_id: Option<String>,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
}

impl CredentialsFile {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context(
            "unsupported credentials file (expected type 'authorized_user' or 'service_account')",
        )
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read credentials file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("in {}", path.display()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CredentialsFile::AuthorizedUser { .. } => "authorized_user",
            CredentialsFile::ServiceAccount { .. } => "service_account",
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Exchanges an ADC file for short-lived access tokens, caching them until
/// shortly before expiry.
pub struct OAuthCredentials {
    file: CredentialsFile,
    client: Client,
    token_uri: String,
    source: String,
    cache: Mutex<Option<CachedToken>>,
}

impl OAuthCredentials {
    pub fn new(file: CredentialsFile, source: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .context("failed to build OAuth HTTP client")?;
        let token_uri = match &file {
            CredentialsFile::ServiceAccount { token_uri, .. } => token_uri.clone(),
            CredentialsFile::AuthorizedUser { .. } => DEFAULT_TOKEN_URI.to_string(),
        };
        Ok(Self {
            file,
            client,
            token_uri,
            source: source.into(),
            cache: Mutex::new(None),
        })
    }

    /// Override the token endpoint (tests, private endpoints).
    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = token_uri.into();
        self
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let form: Vec<(&str, String)> = match &self.file {
            CredentialsFile::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                ..
            } => vec![
                ("grant_type", "refresh_token".to_string()),
                ("client_id", client_id.clone()),
                ("client_secret", client_secret.clone()),
                ("refresh_token", refresh_token.clone()),
            ],
            CredentialsFile::ServiceAccount {
                client_email,
                private_key,
                private_key_id,
                ..
            } => {
                let assertion =
                    self.sign_assertion(client_email, private_key, private_key_id.as_deref())?;
                vec![
                    ("grant_type", JWT_BEARER_GRANT.to_string()),
                    ("assertion", assertion),
                ]
            }
        };

        tracing::debug!(
            "🔵 [OAuth] POST {} - exchanging {} credentials",
            self.token_uri,
            self.file.kind()
        );

        let resp = self
            .client
            .post(&self.token_uri)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.token_uri))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(
                "❌ [OAuth] POST {} failed: status={}",
                self.token_uri,
                status.as_u16()
            );
            return Err(anyhow::Error::new(ApiError {
                status: status.as_u16(),
                message: "token exchange rejected".to_string(),
                body,
            }));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .context("invalid token endpoint response")?;
        let expires_in = token.expires_in.unwrap_or(3600);
        Ok(CachedToken {
            token: token.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in),
        })
    }

    fn sign_assertion(
        &self,
        client_email: &str,
        private_key: &str,
        private_key_id: Option<&str>,
    ) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = JwtClaims {
            iss: client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        header.kid = private_key_id.map(|s| s.to_string());
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(private_key.as_bytes())
            .context("service account private_key is not a valid RSA PEM key")?;
        jsonwebtoken::encode(&header, &claims, &key).context("failed to sign JWT assertion")
    }
}

#[async_trait]
impl CredentialProvider for OAuthCredentials {
    async fn access_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) > Utc::now() {
                return Ok(cached.token.clone());
            }
        }
        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }

    fn describe(&self) -> String {
        format!("{} credentials from {}", self.file.kind(), self.source)
    }
}

/// gcloud's well-known ADC location.
pub fn well_known_credentials_path(lookup: &dyn Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(dir) = lookup("CLOUDSDK_CONFIG").filter(|s| !s.trim().is_empty()) {
        return Some(PathBuf::from(dir).join("application_default_credentials.json"));
    }
    lookup("HOME")
        .filter(|s| !s.trim().is_empty())
        .map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("gcloud")
                .join("application_default_credentials.json")
        })
}

/// Resolve Application Default Credentials from the given environment lookup.
///
/// Returns `ProvisionError::Precondition` when nothing usable is found, so the
/// caller can stop before any remote call.
pub fn discover_adc(
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Arc<dyn CredentialProvider>, ProvisionError> {
    if let Some(token) = lookup(ACCESS_TOKEN_ENV).filter(|s| !s.trim().is_empty()) {
        return Ok(Arc::new(StaticToken::new(token)));
    }

    if let Some(path) = lookup(CREDENTIALS_FILE_ENV).filter(|s| !s.trim().is_empty()) {
        let path = PathBuf::from(path.trim());
        return load_file_credentials(&path);
    }

    match well_known_credentials_path(lookup) {
        Some(path) if path.is_file() => load_file_credentials(&path),
        _ => Err(ProvisionError::Precondition(ADC_HELP.to_string())),
    }
}

fn load_file_credentials(path: &Path) -> Result<Arc<dyn CredentialProvider>, ProvisionError> {
    let file = CredentialsFile::load(path)
        .map_err(|e| ProvisionError::Precondition(format!("{:#}. {}", e, ADC_HELP)))?;
    let creds = OAuthCredentials::new(file, path.display().to_string())
        .map_err(|e| ProvisionError::Precondition(format!("{:#}", e)))?;
    Ok(Arc::new(creds))
}
