/// OAuth2 Provider seam
///
/// The identity provider is an external collaborator. The login flow talks to it
/// only through the `OAuth2Provider` trait; `StandardOAuth2Provider` implements it
/// over plain HTTP for any authorization-code provider.
use crate::auth::error::AuthError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod standard;

pub use standard::StandardOAuth2Provider;

/// User information returned from OAuth2 providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2UserInfo {
    /// Unique user identifier from the provider
    pub subject: String,

    pub email: Option<String>,

    pub name: Option<String>,

    /// Every attribute the provider returned
    pub raw_data: HashMap<String, serde_json::Value>,
}

/// OAuth2 token response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2TokenResponse {
    pub access_token: String,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    pub expires_in: Option<u64>,

    pub refresh_token: Option<String>,

    /// ID token (for OpenID Connect providers)
    pub id_token: Option<String>,

    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Parameters of one authorization redirect
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub state: String,
    /// PKCE S256 challenge
    pub code_challenge: String,
}

/// Configuration for an OAuth2 provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2ProviderConfig {
    pub client_id: String,

    pub client_secret: String,

    #[serde(default)]
    pub scopes: Vec<String>,

    /// Callback URL registered with the provider
    pub redirect_uri: String,

    /// Label shown on the login page
    #[serde(default)]
    pub display_name: Option<String>,

    /// Authorization endpoint URL (defaults for well-known providers)
    #[serde(default)]
    pub auth_url: Option<String>,

    #[serde(default)]
    pub token_url: Option<String>,

    #[serde(default)]
    pub userinfo_url: Option<String>,

    /// Userinfo attribute that identifies the user
    #[serde(default)]
    pub user_name_attribute: Option<String>,

    /// Extra query parameters for the authorization request
    #[serde(default)]
    pub extra_params: HashMap<String, String>,
}

impl OAuth2ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.is_empty() {
            return Err(AuthError::ConfigError(
                "OAuth2 client_id cannot be empty".to_string(),
            ));
        }

        if self.client_secret.is_empty() {
            return Err(AuthError::ConfigError(
                "OAuth2 client_secret cannot be empty".to_string(),
            ));
        }

        url::Url::parse(&self.redirect_uri)
            .map_err(|e| AuthError::ConfigError(format!("Invalid redirect_uri: {}", e)))?;

        for url in [&self.auth_url, &self.token_url, &self.userinfo_url]
            .into_iter()
            .flatten()
        {
            url::Url::parse(url)
                .map_err(|e| AuthError::ConfigError(format!("Invalid endpoint URL {}: {}", url, e)))?;
        }

        Ok(())
    }
}

/// Generic OAuth2 provider trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OAuth2Provider: Send + Sync {
    /// Label shown on the login page
    fn display_name(&self) -> String;

    /// URL the browser is redirected to for authorization
    fn authorization_url(&self, request: &AuthorizationRequest) -> Result<String, AuthError>;

    /// Exchange the authorization code for tokens
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<OAuth2TokenResponse, AuthError>;

    /// Fetch identity claims using the issued tokens
    async fn get_user_info(
        &self,
        tokens: &OAuth2TokenResponse,
    ) -> Result<OAuth2UserInfo, AuthError>;
}

/// Provider factory for creating OAuth2 providers
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create_provider(
        provider_name: &str,
        config: OAuth2ProviderConfig,
    ) -> Result<Box<dyn OAuth2Provider>, AuthError> {
        config.validate()?;
        Ok(Box::new(StandardOAuth2Provider::new(provider_name, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_config() -> OAuth2ProviderConfig {
        OAuth2ProviderConfig {
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            scopes: vec!["openid".to_string(), "email".to_string()],
            redirect_uri: "https://app.example.com/login/oauth2/code/corp".to_string(),
            display_name: None,
            auth_url: Some("https://idp.example.com/authorize".to_string()),
            token_url: Some("https://idp.example.com/token".to_string()),
            userinfo_url: Some("https://idp.example.com/userinfo".to_string()),
            user_name_attribute: None,
            extra_params: HashMap::new(),
        }
    }

    #[test]
    fn test_provider_config_validation() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_provider_config_validation_empty_client_id() {
        let config = OAuth2ProviderConfig {
            client_id: "".to_string(),
            ..test_config()
        };
        assert!(matches!(config.validate(), Err(AuthError::ConfigError(_))));
    }

    #[test]
    fn test_provider_config_validation_invalid_urls() {
        let config = OAuth2ProviderConfig {
            redirect_uri: "not-a-url".to_string(),
            ..test_config()
        };
        assert!(matches!(config.validate(), Err(AuthError::ConfigError(_))));

        let config = OAuth2ProviderConfig {
            token_url: Some("also not a url".to_string()),
            ..test_config()
        };
        assert!(matches!(config.validate(), Err(AuthError::ConfigError(_))));
    }

    #[test]
    fn test_token_response_defaults_token_type() {
        let tokens: OAuth2TokenResponse =
            serde_json::from_str(r#"{"access_token":"at","scope":"read:user"}"#).unwrap();
        assert_eq!(tokens.token_type, "Bearer");
        assert!(tokens.refresh_token.is_none());
    }

    #[test]
    fn test_factory_requires_endpoints_for_unknown_provider() {
        let config = OAuth2ProviderConfig {
            auth_url: None,
            ..test_config()
        };
        assert!(ProviderFactory::create_provider("corp", config).is_err());
        assert!(ProviderFactory::create_provider("corp", test_config()).is_ok());
    }
}
