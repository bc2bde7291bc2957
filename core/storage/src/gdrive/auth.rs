//! OAuth2 token handling for Google Drive.

use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl, RefreshToken,
    Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};

use notesync_common::{Error, Result, Secret};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REDIRECT_URL: &str = "http://localhost:8080/callback";

/// Only files created by the app are visible to it.
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// OAuth2 tokens with expiration tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: Secret,
    pub refresh_token: Secret,
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// Tokens holding only a refresh token; the first call refreshes.
    pub fn from_refresh_token(refresh_token: Secret) -> Self {
        Self {
            access_token: Secret::default(),
            refresh_token,
            expires_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Expired, or less than five minutes left.
    pub fn is_expired(&self) -> bool {
        self.access_token.is_empty() || self.expires_at < Utc::now() + Duration::minutes(5)
    }
}

/// OAuth2 client registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Secret,
    #[serde(default = "default_redirect")]
    pub redirect_url: String,
}

fn default_redirect() -> String {
    REDIRECT_URL.to_string()
}

/// Builds OAuth2 requests against Google's endpoints.
pub struct AuthManager {
    config: AuthConfig,
    http: oauth2::reqwest::Client,
}

impl AuthManager {
    pub fn new(config: AuthConfig) -> Result<Self> {
        if config.client_id.is_empty() {
            return Err(Error::InvalidInput("Google Drive requires a client_id".to_string()));
        }
        // Redirects are refused to avoid leaking the token request elsewhere
        let http = oauth2::reqwest::Client::builder()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to create OAuth client: {}", e)))?;
        Ok(Self { config, http })
    }

    fn token_url() -> Result<TokenUrl> {
        TokenUrl::new(GOOGLE_TOKEN_URL.to_string())
            .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))
    }

    fn redirect_url(&self) -> Result<RedirectUrl> {
        RedirectUrl::new(self.config.redirect_url.clone())
            .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))
    }

    fn client_secret(&self) -> ClientSecret {
        ClientSecret::new(self.config.client_secret.expose().to_string())
    }

    /// Authorization URL the user opens to grant access, plus the CSRF state
    /// to verify on callback.
    pub fn authorization_url(&self) -> Result<(String, String)> {
        let auth_url = AuthUrl::new(GOOGLE_AUTH_URL.to_string())
            .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?;
        let client = BasicClient::new(ClientId::new(self.config.client_id.clone()))
            .set_client_secret(self.client_secret())
            .set_auth_uri(auth_url)
            .set_redirect_uri(self.redirect_url()?);

        let (url, csrf) = client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(DRIVE_SCOPE.to_string()))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();
        Ok((url.to_string(), csrf.secret().clone()))
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<Tokens> {
        let client = BasicClient::new(ClientId::new(self.config.client_id.clone()))
            .set_client_secret(self.client_secret())
            .set_token_uri(Self::token_url()?)
            .set_redirect_uri(self.redirect_url()?);

        let response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token exchange failed: {}", e)))?;

        let refresh_token = response
            .refresh_token()
            .ok_or_else(|| {
                Error::Authentication("No refresh token received, offline access was not granted".to_string())
            })?
            .secret()
            .clone();

        Ok(Tokens {
            access_token: Secret::new(response.access_token().secret().clone()),
            refresh_token: Secret::new(refresh_token),
            expires_at: expiry(response.expires_in()),
        })
    }

    /// Obtain a fresh access token.
    ///
    /// A rejected refresh token is an authentication failure; anything else
    /// is treated as a transport problem.
    pub async fn refresh(&self, refresh_token: &Secret) -> Result<Tokens> {
        let client = BasicClient::new(ClientId::new(self.config.client_id.clone()))
            .set_client_secret(self.client_secret())
            .set_token_uri(Self::token_url()?);

        let response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.expose().to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| match e {
                oauth2::RequestTokenError::ServerResponse(resp) => {
                    Error::Authentication(format!("Token refresh rejected: {}", resp))
                }
                other => Error::Network(format!("Token refresh failed: {}", other)),
            })?;

        let refresh_token = response
            .refresh_token()
            .map(|t| Secret::new(t.secret().clone()))
            .unwrap_or_else(|| refresh_token.clone());

        Ok(Tokens {
            access_token: Secret::new(response.access_token().secret().clone()),
            refresh_token,
            expires_at: expiry(response.expires_in()),
        })
    }
}

fn expiry(expires_in: Option<std::time::Duration>) -> DateTime<Utc> {
    let expires_in = expires_in.unwrap_or_else(|| std::time::Duration::from_secs(3600));
    Utc::now() + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1))
}

/// Hands out access tokens, refreshing them when they expire.
pub struct TokenManager {
    auth: AuthManager,
    tokens: tokio::sync::RwLock<Tokens>,
}

impl TokenManager {
    pub fn new(auth: AuthManager, tokens: Tokens) -> Self {
        Self {
            auth,
            tokens: tokio::sync::RwLock::new(tokens),
        }
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn access_token(&self) -> Result<Secret> {
        {
            let tokens = self.tokens.read().await;
            if !tokens.is_expired() {
                return Ok(tokens.access_token.clone());
            }
        }

        let mut tokens = self.tokens.write().await;
        // Another caller may have refreshed while we waited
        if !tokens.is_expired() {
            return Ok(tokens.access_token.clone());
        }
        if tokens.refresh_token.is_empty() {
            return Err(Error::Authentication(
                "Access token expired and no refresh token is configured".to_string(),
            ));
        }

        tracing::info!("Refreshing expired Google Drive access token");
        *tokens = self.auth.refresh(&tokens.refresh_token).await?;
        Ok(tokens.access_token.clone())
    }

    /// Current tokens, for persistence by the host.
    pub async fn tokens(&self) -> Tokens {
        self.tokens.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            client_id: "test_id".to_string(),
            client_secret: Secret::new("test_secret"),
            redirect_url: REDIRECT_URL.to_string(),
        }
    }

    #[test]
    fn test_tokens_expiration() {
        let mut tokens = Tokens {
            access_token: Secret::new("a"),
            refresh_token: Secret::new("r"),
            expires_at: Utc::now() + Duration::hours(1),
        };
        assert!(!tokens.is_expired());

        tokens.expires_at = Utc::now() + Duration::minutes(4);
        assert!(tokens.is_expired());

        assert!(Tokens::from_refresh_token(Secret::new("r")).is_expired());
    }

    #[test]
    fn test_authorization_url_generation() {
        let manager = AuthManager::new(config()).unwrap();
        let (url, csrf) = manager.authorization_url().unwrap();

        assert!(url.contains("accounts.google.com"));
        assert!(url.contains("client_id=test_id"));
        assert!(url.contains("access_type=offline"));
        assert!(!csrf.is_empty());
    }

    #[test]
    fn test_requires_client_id() {
        let mut cfg = config();
        cfg.client_id.clear();
        assert!(AuthManager::new(cfg).is_err());
    }

    #[tokio::test]
    async fn test_valid_token_is_not_refreshed() {
        let tokens = Tokens {
            access_token: Secret::new("live"),
            refresh_token: Secret::new("r"),
            expires_at: Utc::now() + Duration::hours(1),
        };
        let manager = TokenManager::new(AuthManager::new(config()).unwrap(), tokens);
        assert_eq!(manager.access_token().await.unwrap().expose(), "live");
    }

    #[tokio::test]
    async fn test_missing_refresh_token_is_auth_error() {
        let manager = TokenManager::new(
            AuthManager::new(config()).unwrap(),
            Tokens::from_refresh_token(Secret::default()),
        );
        assert!(manager.access_token().await.unwrap_err().is_auth());
    }
}
