/// Authorization-code provider over plain HTTP
///
/// Works for any provider that exposes authorization, token and userinfo endpoints.
/// Endpoints for Google and GitHub are filled in when not configured.
use super::{
    AuthorizationRequest, OAuth2Provider, OAuth2ProviderConfig, OAuth2TokenResponse,
    OAuth2UserInfo,
};
use crate::auth::error::AuthError;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

struct WellKnownEndpoints {
    auth_url: &'static str,
    token_url: &'static str,
    userinfo_url: &'static str,
    user_name_attribute: &'static str,
    scopes: &'static [&'static str],
    display_name: &'static str,
}

fn well_known(provider_name: &str) -> Option<WellKnownEndpoints> {
    match provider_name.to_lowercase().as_str() {
        "google" => Some(WellKnownEndpoints {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
            token_url: "https://oauth2.googleapis.com/token",
            userinfo_url: "https://www.googleapis.com/oauth2/v3/userinfo",
            user_name_attribute: "sub",
            scopes: &["openid", "profile", "email"],
            display_name: "Google",
        }),
        "github" => Some(WellKnownEndpoints {
            auth_url: "https://github.com/login/oauth/authorize",
            token_url: "https://github.com/login/oauth/access_token",
            userinfo_url: "https://api.github.com/user",
            user_name_attribute: "id",
            scopes: &["read:user"],
            display_name: "GitHub",
        }),
        _ => None,
    }
}

pub struct StandardOAuth2Provider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
    display_name: String,
    auth_url: url::Url,
    token_url: String,
    userinfo_url: String,
    user_name_attribute: String,
    extra_params: HashMap<String, String>,
    http_client: reqwest::Client,
}

impl StandardOAuth2Provider {
    pub fn new(provider_name: &str, config: OAuth2ProviderConfig) -> Result<Self, AuthError> {
        let defaults = well_known(provider_name);

        let endpoint = |configured: Option<String>, fallback: Option<&'static str>, key: &str| {
            configured
                .or_else(|| fallback.map(String::from))
                .ok_or_else(|| {
                    AuthError::ConfigError(format!(
                        "provider '{}' needs an explicit {}",
                        provider_name, key
                    ))
                })
        };

        let auth_url = endpoint(config.auth_url, defaults.as_ref().map(|d| d.auth_url), "auth_url")?;
        let token_url =
            endpoint(config.token_url, defaults.as_ref().map(|d| d.token_url), "token_url")?;
        let userinfo_url = endpoint(
            config.userinfo_url,
            defaults.as_ref().map(|d| d.userinfo_url),
            "userinfo_url",
        )?;

        let auth_url = url::Url::parse(&auth_url)
            .map_err(|e| AuthError::ConfigError(format!("Invalid auth_url: {}", e)))?;

        let scopes = if config.scopes.is_empty() {
            defaults
                .as_ref()
                .map(|d| d.scopes.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default()
        } else {
            config.scopes
        };

        let user_name_attribute = config
            .user_name_attribute
            .or_else(|| defaults.as_ref().map(|d| d.user_name_attribute.to_string()))
            .unwrap_or_else(|| "sub".to_string());

        let display_name = config
            .display_name
            .or_else(|| defaults.as_ref().map(|d| d.display_name.to_string()))
            .unwrap_or_else(|| provider_name.to_string());

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("sessiongate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthError::OAuth2Error(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client_id: config.client_id,
            client_secret: config.client_secret,
            redirect_uri: config.redirect_uri,
            scopes,
            display_name,
            auth_url,
            token_url,
            userinfo_url,
            user_name_attribute,
            extra_params: config.extra_params,
            http_client,
        })
    }
}

/// Userinfo identifiers can be strings (`sub`) or numbers (GitHub `id`)
fn attribute_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl OAuth2Provider for StandardOAuth2Provider {
    fn display_name(&self) -> String {
        self.display_name.clone()
    }

    fn authorization_url(&self, request: &AuthorizationRequest) -> Result<String, AuthError> {
        let mut url = self.auth_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("state", &request.state)
                .append_pair("code_challenge", &request.code_challenge)
                .append_pair("code_challenge_method", "S256");
            if !self.scopes.is_empty() {
                query.append_pair("scope", &self.scopes.join(" "));
            }
            for (key, value) in &self.extra_params {
                query.append_pair(key, value);
            }
        }
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<OAuth2TokenResponse, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::CodeExchangeFailed(format!("{}: {}", status, body)));
        }

        let tokens = response
            .json::<OAuth2TokenResponse>()
            .await
            .map_err(|e| AuthError::CodeExchangeFailed(format!("Invalid token response: {}", e)))?;

        debug!("Exchanged authorization code (token type {})", tokens.token_type);
        Ok(tokens)
    }

    async fn get_user_info(
        &self,
        tokens: &OAuth2TokenResponse,
    ) -> Result<OAuth2UserInfo, AuthError> {
        let response = self
            .http_client
            .get(&self.userinfo_url)
            .bearer_auth(&tokens.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::UserInfoFailed(format!(
                "userinfo endpoint returned {}",
                response.status()
            )));
        }

        let raw_data: HashMap<String, serde_json::Value> = response
            .json()
            .await
            .map_err(|e| AuthError::UserInfoFailed(format!("Invalid userinfo response: {}", e)))?;

        let subject = raw_data
            .get(&self.user_name_attribute)
            .and_then(attribute_as_string)
            .ok_or_else(|| {
                AuthError::UserInfoFailed(format!(
                    "userinfo response has no '{}' attribute",
                    self.user_name_attribute
                ))
            })?;

        let string_claim = |key: &str| {
            raw_data
                .get(key)
                .and_then(|v| v.as_str())
                .map(String::from)
        };

        Ok(OAuth2UserInfo {
            subject,
            email: string_claim("email"),
            name: string_claim("name").or_else(|| string_claim("login")),
            raw_data,
        })
    }
}
