//! Bearer tokens for the Drive API
//!
//! Either hands out a pre-authorized token or exchanges an OAuth refresh
//! token for short-lived access tokens, caching them until shortly before
//! they expire. Uses synchronous HTTP (ureq).

use chrono::Utc;
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};

use crate::config::DriveCredentials;
use crate::error::DriveError;

/// Token provider for the Drive client
pub struct DriveAuth {
    credentials: DriveCredentials,
    cached: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    /// Unix seconds; `None` means the token never expires
    expires_at: Option<i64>,
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

impl DriveAuth {
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Refresh this many seconds before the reported expiry
    const EXPIRY_BUFFER_SECS: i64 = 300;

    pub fn new(credentials: DriveCredentials) -> Self {
        Self {
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// Use a token that is already authorized
    pub fn with_access_token(token: impl Into<String>) -> Self {
        Self::new(DriveCredentials::AccessToken(token.into()))
    }

    /// Get a valid access token, refreshing it if needed
    pub fn get_access_token(&self) -> Result<String, DriveError> {
        let (client_id, client_secret, refresh_token) = match &self.credentials {
            DriveCredentials::AccessToken(token) => return Ok(token.clone()),
            DriveCredentials::RefreshToken {
                client_id,
                client_secret,
                refresh_token,
            } => (client_id, client_secret, refresh_token),
        };

        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cached.as_ref()
            && token.is_fresh(Utc::now().timestamp())
        {
            return Ok(token.access_token.clone());
        }

        log::debug!("Refreshing Drive access token");
        let response = Self::refresh_access_token(client_id, client_secret, refresh_token)?;
        let token = CachedToken {
            access_token: response.access_token,
            expires_at: response
                .expires_in
                .map(|secs| Utc::now().timestamp() + secs),
        };
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    fn refresh_access_token(
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenResponse, DriveError> {
        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .map_err(|e| DriveError::from_ureq(e, "refresh access token"))?;

        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| DriveError::from_ureq(e, "read token response"))?;

        serde_json::from_str(&body)
            .map_err(|e| DriveError::permanent(format!("malformed token response: {e}")))
    }
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .is_none_or(|expires_at| expires_at > now + DriveAuth::EXPIRY_BUFFER_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_token() {
        let auth = DriveAuth::with_access_token("ya29.token");
        assert_eq!(auth.get_access_token().unwrap(), "ya29.token");
    }

    #[test]
    fn test_cached_token_freshness() {
        let now = 1_700_000_000;

        let token = CachedToken {
            access_token: "t".to_string(),
            expires_at: Some(now + 3600),
        };
        assert!(token.is_fresh(now));

        // Inside the refresh buffer
        let token = CachedToken {
            access_token: "t".to_string(),
            expires_at: Some(now + 60),
        };
        assert!(!token.is_fresh(now));

        let token = CachedToken {
            access_token: "t".to_string(),
            expires_at: None,
        };
        assert!(token.is_fresh(now));
    }
}
