//! Spreadsheet credentials and OAuth access-token acquisition.
//!
//! The credentials file names the target spreadsheet and carries either a
//! ready-made `access_token` or a service-account key. A service-account key
//! is exchanged for an access token through a signed RS256 JWT bearer grant.

use std::path::Path;

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use restock_core::{RestockError, Result};
use serde::{Deserialize, Serialize};

/// OAuth scope allowing read/write access to spreadsheets.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Token endpoint used when the key file does not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for the signed assertion, in seconds.
const ASSERTION_TTL_SECS: i64 = 3600;

// ── Credential file ───────────────────────────────────────────────────────────

/// Contents of the spreadsheet credentials file.
#[derive(Debug, Clone, Deserialize)]
pub struct SheetCredentials {
    pub spreadsheet_id: String,
    #[serde(flatten)]
    pub auth: SheetAuth,
}

/// How the publisher authenticates.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SheetAuth {
    /// A bearer token obtained out of band.
    AccessToken { access_token: String },
    ServiceAccount(ServiceAccountKey),
}

/// The relevant fields of a service-account JSON key.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl SheetCredentials {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| RestockError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let creds: Self = serde_json::from_str(&content).map_err(|e| {
            RestockError::Config(format!(
                "{} is not a valid sheet credentials file: {}",
                path.display(),
                e
            ))
        })?;
        if creds.spreadsheet_id.trim().is_empty() {
            return Err(RestockError::Config(format!(
                "spreadsheet_id in {} is empty",
                path.display()
            )));
        }
        Ok(creds)
    }
}

// ── JWT bearer grant ──────────────────────────────────────────────────────────

/// Claims of the signed assertion sent to the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl GrantClaims {
    pub fn new(key: &ServiceAccountKey, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            iss: key.client_email.clone(),
            scope: SHEETS_SCOPE.to_string(),
            aud: key.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_TTL_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl ServiceAccountKey {
    /// Sign the grant assertion with the key's RSA private key.
    pub fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| RestockError::Auth(format!("invalid service-account private key: {}", e)))?;
        encode(&Header::new(Algorithm::RS256), &GrantClaims::new(self, now), &key)
            .map_err(|e| RestockError::Auth(format!("signing token request failed: {}", e)))
    }

    /// Exchange a signed assertion for an access token.
    pub async fn fetch_access_token(&self, client: &reqwest::Client, now: DateTime<Utc>) -> Result<String> {
        let assertion = self.sign_assertion(now)?;
        let resp = client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| RestockError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RestockError::Auth(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| RestockError::Auth(format!("unreadable token response: {}", e)))?;
        tracing::debug!(client = %self.client_email, "obtained spreadsheet access token");
        Ok(token.access_token)
    }
}

impl SheetAuth {
    /// Resolve to a bearer token, performing the grant when needed.
    pub async fn access_token(&self, client: &reqwest::Client, now: DateTime<Utc>) -> Result<String> {
        match self {
            SheetAuth::AccessToken { access_token } => Ok(access_token.clone()),
            SheetAuth::ServiceAccount(key) => key.fetch_access_token(client, now).await,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
