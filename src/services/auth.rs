// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Auth collaborator.
//!
//! Handles:
//! - Password sign-in and sign-out against a GoTrue-compatible auth service
//! - Local verification of HS256 access tokens
//! - Broadcasting auth state changes (signed in / signed out)

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{Identity, SubscriptionTier};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, RwLock};

/// Audience the auth service puts in learner access tokens.
pub const TOKEN_AUDIENCE: &str = "authenticated";

/// Capacity of the auth event channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Auth state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
}

/// An authenticated session held by the auth collaborator.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub identity: Identity,
}

/// External auth service consumed by the session resolver.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current session, if one exists and its token is still valid.
    async fn get_session(&self) -> Result<Option<AuthSession>>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthSession>;

    async fn sign_out(&self) -> Result<()>;

    /// Subscribe to auth state changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

// ─── Access Tokens ───────────────────────────────────────────

/// Learner metadata embedded in access tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, alias = "full_name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<SubscriptionTier>,
}

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub aud: String,
    #[serde(default)]
    pub email: String,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    pub iat: usize,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.sub.clone(),
            email: self.email.clone(),
            display_name: self.user_metadata.name.clone().unwrap_or_default(),
            tier: self.user_metadata.plan.unwrap_or_default(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp as i64, 0).unwrap_or_default()
    }
}

/// Verify an access token's signature, expiry and audience.
pub fn decode_access_token(token: &str, signing_key: &[u8]) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[TOKEN_AUDIENCE]);

    decode::<Claims>(token, &DecodingKey::from_secret(signing_key), &validation)
        .map(|data| data.claims)
        .map_err(|e| AppError::Auth(format!("Invalid access token: {}", e)))
}

/// Mint an access token for `identity`, as the auth service would.
pub fn create_access_token(
    identity: &Identity,
    signing_key: &[u8],
    ttl: Duration,
) -> anyhow::Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: identity.id.clone(),
        aud: TOKEN_AUDIENCE.to_string(),
        email: identity.email.clone(),
        iat: now.timestamp() as usize,
        exp: (now + ttl).timestamp() as usize,
        user_metadata: UserMetadata {
            name: Some(identity.display_name.clone()),
            plan: Some(identity.tier),
        },
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )?)
}

// ─── Session Slot ────────────────────────────────────────────

/// Current session plus the event channel announcing changes to it.
struct SessionSlot {
    current: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SessionSlot {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(None),
            events,
        }
    }

    async fn valid(&self, signing_key: &[u8]) -> Option<AuthSession> {
        let mut current = self.current.write().await;
        let session = current.as_ref()?;
        if decode_access_token(&session.access_token, signing_key).is_ok() {
            return Some(session.clone());
        }
        tracing::info!(user_id = %session.identity.id, "Stored session expired");
        *current = None;
        None
    }

    async fn set(&self, session: AuthSession) {
        let identity = session.identity.clone();
        *self.current.write().await = Some(session);
        // No receivers is fine
        let _ = self.events.send(AuthEvent::SignedIn(identity));
    }

    async fn clear(&self) {
        *self.current.write().await = None;
        let _ = self.events.send(AuthEvent::SignedOut);
    }

    async fn access_token(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }
}

// ─── GoTrue Client ───────────────────────────────────────────

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Error body returned by the auth service (field names vary by version).
#[derive(Debug, Default, Deserialize)]
struct AuthErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    error: Option<String>,
}

/// Auth collaborator backed by a GoTrue-compatible REST API.
pub struct GoTrueAuth {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    signing_key: Vec<u8>,
    slot: SessionSlot,
}

impl GoTrueAuth {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.auth_url.clone(),
            api_key: config.auth_api_key.clone(),
            signing_key: config.jwt_signing_key.clone(),
            slot: SessionSlot::new(),
        }
    }

    async fn check_response(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: AuthErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .error_description
            .or(body.msg)
            .or(body.error)
            .unwrap_or_else(|| status.to_string());

        tracing::warn!(status = %status, error = %message, "Auth service rejected request");
        Err(AppError::Auth(message))
    }
}

#[async_trait]
impl AuthProvider for GoTrueAuth {
    async fn get_session(&self) -> Result<Option<AuthSession>> {
        Ok(self.slot.valid(&self.signing_key).await)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthSession> {
        let url = format!("{}/token", self.base_url);

        let response = self
            .http
            .post(&url)
            .query(&[("grant_type", "password")])
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("Sign-in request failed: {}", e)))?;

        let token: TokenResponse = self
            .check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| AppError::Auth(format!("Malformed token response: {}", e)))?;

        let claims = decode_access_token(&token.access_token, &self.signing_key)?;
        let session = AuthSession {
            expires_at: claims.expires_at(),
            identity: claims.identity(),
            access_token: token.access_token,
        };

        tracing::info!(user_id = %session.identity.id, "Signed in");
        self.slot.set(session.clone()).await;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let Some(access_token) = self.slot.access_token().await else {
            return Ok(());
        };

        // The service cannot revoke a token it no longer accepts
        if decode_access_token(&access_token, &self.signing_key).is_err() {
            tracing::info!("Stored session already expired, signing out locally");
            self.slot.clear().await;
            return Ok(());
        }

        let response = self
            .http
            .post(format!("{}/logout", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("Sign-out request failed: {}", e)))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => {
                tracing::info!(
                    status = %response.status(),
                    "Auth service no longer knows the session, signing out locally"
                );
            }
            _ => {
                self.check_response(response).await?;
            }
        }

        tracing::info!("Signed out");
        self.slot.clear().await;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.slot.events.subscribe()
    }
}

// ─── Static Auth ─────────────────────────────────────────────

/// In-process auth collaborator with a fixed credential table.
///
/// Mints real access tokens with the configured signing key, so tokens it
/// issues pass the same verification as the auth service's.
pub struct StaticAuth {
    accounts: Vec<(String, String, Identity)>,
    signing_key: Vec<u8>,
    ttl: Duration,
    unavailable: AtomicBool,
    slot: SessionSlot,
}

impl StaticAuth {
    pub fn new(signing_key: &[u8]) -> Self {
        Self {
            accounts: Vec::new(),
            signing_key: signing_key.to_vec(),
            ttl: Duration::hours(1),
            unavailable: AtomicBool::new(false),
            slot: SessionSlot::new(),
        }
    }

    pub fn with_account(mut self, email: &str, password: &str, identity: Identity) -> Self {
        self.accounts
            .push((email.to_string(), password.to_string(), identity));
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Install an existing session without announcing it, like a session
    /// restored from storage at startup.
    pub async fn restore_session(&self, identity: Identity) -> anyhow::Result<AuthSession> {
        let session = self.issue(identity)?;
        *self.slot.current.write().await = Some(session.clone());
        Ok(session)
    }

    /// Make every call fail, as if the service were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Auth("Auth service unreachable".to_string()));
        }
        Ok(())
    }

    fn issue(&self, identity: Identity) -> anyhow::Result<AuthSession> {
        let access_token = create_access_token(&identity, &self.signing_key, self.ttl)?;
        Ok(AuthSession {
            access_token,
            expires_at: Utc::now() + self.ttl,
            identity,
        })
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn get_session(&self) -> Result<Option<AuthSession>> {
        self.check_available()?;
        Ok(self.slot.valid(&self.signing_key).await)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthSession> {
        self.check_available()?;

        let identity = self
            .accounts
            .iter()
            .find(|(e, p, _)| e.eq_ignore_ascii_case(email) && p == password)
            .map(|(_, _, identity)| identity.clone())
            .ok_or_else(|| AppError::Auth("Invalid login credentials".to_string()))?;

        let session = self.issue(identity)?;
        self.slot.set(session.clone()).await;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        self.check_available()?;
        self.slot.clear().await;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.slot.events.subscribe()
    }
}
