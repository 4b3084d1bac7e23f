use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use serde::Deserialize;

use crate::settings::Config;

const OAUTH2_TOKEN_URL: &str = "https://accounts.google.com/o/oauth2/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Credentials for one mailbox user, resolved once per command.
#[derive(Clone)]
pub enum Credentials {
    Password { user: String, password: String },
    OAuth2 { user: String, access_token: String },
}

impl Credentials {
    pub fn user(&self) -> &str {
        match self {
            Credentials::Password { user, .. } | Credentials::OAuth2 { user, .. } => user,
        }
    }
}

/// SASL XOAUTH2 initial response.
pub struct XOAuth2 {
    pub user: String,
    pub access_token: String,
}

impl async_imap::Authenticator for XOAuth2 {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        format!("user={}\x01auth=Bearer {}\x01\x01", self.user, self.access_token)
    }
}

pub async fn refresh_access_token(
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<String> {
    let params = [
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ];
    let response: TokenResponse = reqwest::Client::new()
        .post(OAUTH2_TOKEN_URL)
        .form(&params)
        .send()
        .await
        .context("token request failed")?
        .json()
        .await
        .context("auth response from the server is not valid")?;

    if let Some(error) = response.error {
        bail!(
            "token refresh rejected: {} {}",
            error,
            response.error_description.unwrap_or_default()
        );
    }
    response
        .access_token
        .ok_or_else(|| anyhow!("auth response from the server is empty"))
}

async fn prompt_password(user: &str) -> Result<String> {
    let prompt = format!("Enter the password for {}: ", user);
    let password = tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt)).await??;
    Ok(password)
}

/// Prefers a refreshed OAuth2 access token and falls back to user and password.
pub async fn resolve_credentials(config: &Config) -> Result<Credentials> {
    let user = config.imap.user.clone();
    let auth = &config.auth;

    if let (Some(id), Some(secret), Some(token)) =
        (&auth.client_id, &auth.client_secret, &auth.refresh_token)
    {
        match refresh_access_token(id, secret, token).await {
            Ok(access_token) => {
                info!("-- refreshed access token for {}", user);
                return Ok(Credentials::OAuth2 { user, access_token });
            }
            Err(e) => {
                warn!("failed to refresh access token: {:#}", e);
                warn!("trying to log in with user and password");
            }
        }
    }

    if user.is_empty() {
        bail!("no IMAP user configured");
    }
    let password = match &config.imap.password {
        Some(password) => password.clone(),
        None => prompt_password(&user).await?,
    };
    Ok(Credentials::Password { user, password })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_imap::Authenticator;

    #[test]
    fn test_xoauth2_response() {
        let mut auth = XOAuth2 {
            user: "me@gmail.com".to_string(),
            access_token: "tok".to_string(),
        };
        assert_eq!(auth.process(b""), "user=me@gmail.com\x01auth=Bearer tok\x01\x01");
    }

    #[tokio::test]
    async fn test_configured_password_is_used() {
        let mut config = Config::default();
        config.imap.user = "me".to_string();
        config.imap.password = Some("secret".to_string());

        match resolve_credentials(&config).await.unwrap() {
            Credentials::Password { user, password } => {
                assert_eq!(user, "me");
                assert_eq!(password, "secret");
            }
            Credentials::OAuth2 { .. } => panic!("expected password credentials"),
        }
    }

    #[tokio::test]
    async fn test_missing_user_is_fatal() {
        let config = Config::default();
        assert!(resolve_credentials(&config).await.is_err());
    }
}
