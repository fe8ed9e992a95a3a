// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for the signed-in learner.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{ExerciseAttempt, Profile, ProfileUpdate, SimulationAttempt};
use crate::services::{CreditSpend, SessionView};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// API routes (require a bearer token for the active learner).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/session", get(get_session))
        .route("/api/session/reload", post(reload_session))
        .route("/api/exercises/{id}/complete", post(complete_exercise))
        .route("/api/exercises/{id}/saved", post(toggle_saved))
        .route("/api/simulations/{id}/complete", post(complete_simulation))
        .route("/api/ai-credits/use", post(use_ai_credit))
        .route("/api/profile", put(update_profile))
}

/// Parse an optional JSON body; an empty body means "all defaults".
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid body: {}", e)))
}

// ─── Session ─────────────────────────────────────────────────

async fn get_session(State(state): State<Arc<AppState>>) -> Json<SessionView> {
    Json(state.session.view())
}

/// Retry the progress load, e.g. after it ended in `error`.
///
/// A failed load is reported through the returned view, not as an HTTP error.
async fn reload_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SessionView>> {
    match state.session.reload().await {
        Ok(outcome) => {
            tracing::info!(user_id = %user.user_id, outcome = ?outcome, "Progress reloaded");
        }
        Err(e @ AppError::NotReady(_)) => return Err(e),
        Err(e) => tracing::warn!(user_id = %user.user_id, error = %e, "Progress reload failed"),
    }
    Ok(Json(state.session.view()))
}

// ─── Progress ────────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CompletionResponse {
    /// False if the item was already complete and nothing was written.
    pub newly_completed: bool,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SavedResponse {
    pub saved: bool,
}

async fn complete_exercise(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(exercise_id): Path<String>,
    body: Bytes,
) -> Result<Json<CompletionResponse>> {
    let attempt: ExerciseAttempt = optional_body(&body)?;
    tracing::debug!(user_id = %user.user_id, exercise_id = %exercise_id, "Completing exercise");

    let newly_completed = state
        .session
        .complete_exercise(&exercise_id, attempt)
        .await?;
    Ok(Json(CompletionResponse { newly_completed }))
}

async fn complete_simulation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(simulation_id): Path<String>,
    body: Bytes,
) -> Result<Json<CompletionResponse>> {
    let attempt: SimulationAttempt = optional_body(&body)?;
    tracing::debug!(user_id = %user.user_id, simulation_id = %simulation_id, "Completing simulation");

    let newly_completed = state
        .session
        .complete_simulation(&simulation_id, attempt)
        .await?;
    Ok(Json(CompletionResponse { newly_completed }))
}

async fn toggle_saved(
    State(state): State<Arc<AppState>>,
    Path(exercise_id): Path<String>,
) -> Result<Json<SavedResponse>> {
    let saved = state.session.toggle_saved(&exercise_id).await?;
    Ok(Json(SavedResponse { saved }))
}

// ─── AI Credits ──────────────────────────────────────────────

async fn use_ai_credit(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<CreditSpend>> {
    let spend = state.session.use_ai_credit()?;
    if !spend.granted {
        tracing::info!(user_id = %user.user_id, tier = ?user.tier, "AI credit not granted");
    }
    Ok(Json(spend))
}

// ─── Profile ─────────────────────────────────────────────────

async fn update_profile(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<Profile>> {
    Ok(Json(state.session.update_profile(update).await?))
}
