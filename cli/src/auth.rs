use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AuthArgs;

/// Caller identity established by a valid bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("auth provider unreachable: {0}")]
    Transport(String),
    #[error("unexpected auth provider response: {0}")]
    InvalidResponse(String),
}

/// Hosted identity provider: validates bearer tokens and creates accounts.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` means the token is not valid.
    async fn verify_token(&self, token: &str) -> Result<Option<AuthUser>, AuthError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;
}

pub struct SupabaseAuth {
    http: Client,
    base_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
    email: Option<String>,
}

/// Sign-up answers with the user at the top level or nested under `user`
/// depending on whether email confirmation is enabled.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session { user: SupabaseUser },
    User(SupabaseUser),
}

#[derive(Debug, Default, Deserialize)]
struct SupabaseErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
}

impl SupabaseAuth {
    pub fn new(args: &AuthArgs) -> anyhow::Result<Self> {
        let base_url = args
            .supabase_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("SUPABASE_URL must be set to run the API server"))?;
        let anon_key = args
            .supabase_anon_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("SUPABASE_ANON_KEY must be set to run the API server")
            })?;
        let http = Client::builder()
            .user_agent(format!("menuplan/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn verify_token(&self, token: &str) -> Result<Option<AuthUser>, AuthError> {
        let res = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        match res.status() {
            s if s.is_success() => {
                let user: SupabaseUser = res
                    .json()
                    .await
                    .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
                auth_user(user).map(Some)
            }
            s if token_rejected(s) => Ok(None),
            s => Err(rejection(s, &res.text().await.unwrap_or_default())),
        }
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let res = self
            .http
            .post(format!("{}/auth/v1/signup", self.base_url))
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(rejection(status, &body));
        }
        parse_sign_up(&body)
    }
}

/// Any client error from the user lookup means the token is not usable.
/// The exact status differs between expired and malformed tokens.
fn token_rejected(status: StatusCode) -> bool {
    status.is_client_error()
}

fn parse_sign_up(body: &str) -> Result<AuthUser, AuthError> {
    let parsed: SignUpResponse =
        serde_json::from_str(body).map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
    let user = match parsed {
        SignUpResponse::Session { user } | SignUpResponse::User(user) => user,
    };
    auth_user(user)
}

fn auth_user(user: SupabaseUser) -> Result<AuthUser, AuthError> {
    let id = Uuid::parse_str(&user.id)
        .map_err(|e| AuthError::InvalidResponse(format!("user id '{}': {e}", user.id)))?;
    Ok(AuthUser {
        id,
        email: user.email,
    })
}

fn rejection(status: StatusCode, body: &str) -> AuthError {
    let parsed: SupabaseErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .msg
        .or(parsed.message)
        .or(parsed.error_description)
        .unwrap_or_else(|| format!("auth provider returned {status}"));
    AuthError::Rejected {
        status: status.as_u16(),
        message,
    }
}
