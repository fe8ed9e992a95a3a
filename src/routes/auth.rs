// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sign-in and sign-out routes.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::Identity;
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;
use axum::{extract::State, routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// Routes open to anyone.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/login", post(login))
}

/// Routes that need the signed-in learner's bearer token.
pub fn learner_routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/logout", post(logout))
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 256))]
    pub password: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct LoginResponse {
    #[cfg_attr(feature = "binding-generation", ts(type = "unknown"))]
    pub identity: Identity,
    pub access_token: String,
    pub expires_at: String,
}

#[derive(Serialize)]
pub struct LogoutResponse {
    pub status: &'static str,
}

/// Sign in with email and password.
///
/// The progress load starts in the background; poll `/api/session` for it.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    request
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let session = state
        .resolver
        .login(request.email.trim(), &request.password)
        .await?;

    Ok(Json(LoginResponse {
        expires_at: format_utc_rfc3339(session.expires_at),
        identity: session.identity,
        access_token: session.access_token,
    }))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<LogoutResponse>> {
    state.resolver.logout().await?;
    tracing::info!(user_id = %user.user_id, "Learner signed out");
    Ok(Json(LogoutResponse {
        status: "signed_out",
    }))
}
