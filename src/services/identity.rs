//! Identity verification: bearer token → user id.
//!
//! The websocket layer only sees the [`IdentityVerifier`] trait. The HTTP
//! implementation asks the external auth service who owns the token
//! (`GET {AUTH_URL}/auth/v1/user`) and reads the `id` field of the response.

use std::time::Duration;

use async_trait::async_trait;
use frames::ErrorCode;
use uuid::Uuid;

const CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("identity request failed: {0}")]
    Request(String),
    #[error("identity service error: status {status}")]
    Response { status: u16 },
    #[error("identity response parse failed: {0}")]
    Parse(String),
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ErrorCode for IdentityError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidToken => "E_INVALID_TOKEN",
            Self::Request(_) | Self::Response { .. } => "E_IDENTITY_UNAVAILABLE",
            Self::Parse(_) => "E_IDENTITY_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Response { status: 429 | 500..=599 })
    }
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolve `token` to the user it was issued to.
    async fn verify(&self, token: &str) -> Result<Uuid, IdentityError>;
}

// =============================================================================
// HTTP VERIFIER
// =============================================================================

pub struct HttpIdentityVerifier {
    http: reqwest::Client,
    user_url: String,
    api_key: Option<String>,
}

impl HttpIdentityVerifier {
    /// # Errors
    ///
    /// Returns [`IdentityError::HttpClientBuild`] if the HTTP client cannot
    /// be constructed.
    pub fn new(auth_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| IdentityError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, user_url: format!("{}/auth/v1/user", auth_url.trim_end_matches('/')), api_key })
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Uuid, IdentityError> {
        if token.trim().is_empty() {
            return Err(IdentityError::InvalidToken);
        }

        let mut request = self.http.get(&self.user_url).bearer_auth(token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await.map_err(|e| IdentityError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| IdentityError::Request(e.to_string()))?;

        match status {
            200 => parse_user(&text),
            400 | 401 | 403 | 404 => Err(IdentityError::InvalidToken),
            _ => Err(IdentityError::Response { status }),
        }
    }
}

#[derive(serde::Deserialize)]
struct UserResponse {
    id: Uuid,
}

fn parse_user(json: &str) -> Result<Uuid, IdentityError> {
    let user: UserResponse = serde_json::from_str(json).map_err(|e| IdentityError::Parse(e.to_string()))?;
    Ok(user.id)
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
