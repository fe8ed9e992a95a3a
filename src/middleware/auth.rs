// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bearer token authentication middleware.
//!
//! A request is accepted only if its access token verifies and belongs to
//! the learner the progress session is serving.

use crate::error::AppError;
use crate::models::SubscriptionTier;
use crate::services::auth::decode_access_token;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Authenticated learner extracted from the access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub tier: SubscriptionTier,
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware that requires a valid token for the active learner.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request).ok_or(AppError::Unauthorized)?;

    let claims = decode_access_token(token, &state.config.jwt_signing_key).map_err(|e| {
        tracing::debug!(error = %e, "Rejected access token");
        AppError::Unauthorized
    })?;

    let active = state.session.identity().ok_or(AppError::Unauthorized)?;
    if active.id != claims.sub {
        tracing::warn!(
            token_user = %claims.sub,
            session_user = %active.id,
            "Token does not match the active session"
        );
        return Err(AppError::Unauthorized);
    }

    request.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        tier: active.tier,
    });

    Ok(next.run(request).await)
}
