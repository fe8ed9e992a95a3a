// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Progress session: the authoritative in-memory copy of one learner's
//! progress.
//!
//! State moves `Uninitialized -> Loading -> Ready | Error` and back to
//! `Uninitialized` on logout. Every load and logout bumps a generation
//! counter; results of I/O started under an older generation are dropped.
//!
//! Mutations apply optimistically, persist, and restore the touched field
//! from a pre-image if persistence fails. They are serialized with each
//! other so a pre-image never covers another mutation's in-flight change.

use crate::db::ProgressStore;
use crate::error::{AppError, Result};
use crate::models::progress::{PreImage, SnapshotField};
use crate::models::{
    CompletedExercise, CompletedExerciseRow, CompletedSimulation, CompletedSimulationRow,
    ContentState, ExerciseAttempt, Identity, Profile, ProfileUpdate, ProgressSnapshot,
    SavedExercise, SavedExerciseRow, SimulationAttempt,
};
use crate::services::loader::ProgressLoader;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use validator::Validate;

/// Lifecycle of the session, as published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Uninitialized,
    Loading,
    Ready,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Uninitialized => "uninitialized",
            SessionStatus::Loading => "loading",
            SessionStatus::Ready => "ready",
            SessionStatus::Error => "error",
        }
    }
}

/// What became of a load once its I/O finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Ready,
    /// A logout or newer load started meanwhile; the result was dropped.
    Superseded,
}

#[derive(Debug)]
struct ReadyState {
    identity: Identity,
    profile: Profile,
    progress: ProgressSnapshot,
}

#[derive(Debug)]
enum Phase {
    Uninitialized,
    Loading { identity: Identity },
    Ready(Box<ReadyState>),
    Error { identity: Identity, message: String },
}

impl Phase {
    fn status(&self) -> SessionStatus {
        match self {
            Phase::Uninitialized => SessionStatus::Uninitialized,
            Phase::Loading { .. } => SessionStatus::Loading,
            Phase::Ready(_) => SessionStatus::Ready,
            Phase::Error { .. } => SessionStatus::Error,
        }
    }
}

#[derive(Debug)]
struct Inner {
    generation: u64,
    phase: Phase,
}

impl Inner {
    fn ready_mut(&mut self) -> Result<&mut ReadyState> {
        match &mut self.phase {
            Phase::Ready(ready) => Ok(&mut **ready),
            other => Err(AppError::NotReady(other.status().as_str())),
        }
    }

    /// The ready state, only if it still belongs to `generation`.
    fn ready_at(&mut self, generation: u64) -> Option<&mut ReadyState> {
        if self.generation != generation {
            return None;
        }
        self.ready_mut().ok()
    }
}

/// Serializable copy of the session for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of an AI credit spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreditSpend {
    pub granted: bool,
    pub remaining: u32,
}

pub struct ProgressSession {
    db: Arc<dyn ProgressStore>,
    loader: ProgressLoader,
    daily_ai_credits: u32,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<SessionStatus>,
    mutations: tokio::sync::Mutex<()>,
}

impl ProgressSession {
    pub fn new(db: Arc<dyn ProgressStore>, daily_ai_credits: u32) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Uninitialized);
        Self {
            loader: ProgressLoader::new(db.clone(), daily_ai_credits),
            db,
            daily_ai_credits,
            inner: Mutex::new(Inner {
                generation: 0,
                phase: Phase::Uninitialized,
            }),
            status_tx,
            mutations: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        // State is only ever replaced wholesale, so a poisoned lock still
        // holds a coherent value.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a status change. Called with the state lock held so
    /// subscribers see changes in the order they were made.
    fn publish(&self, status: SessionStatus) {
        self.status_tx.send_replace(status);
    }

    // ─── Observation ─────────────────────────────────────────

    pub fn status(&self) -> SessionStatus {
        self.state().phase.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Wait until the published status satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&SessionStatus) -> bool) -> SessionStatus {
        let mut rx = self.status_tx.subscribe();
        let result = rx.wait_for(predicate).await.map(|status| *status);
        // The sender lives as long as `self`, so the channel cannot close here
        result.unwrap_or(SessionStatus::Uninitialized)
    }

    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Identity the session is loading or holding, if any.
    pub fn identity(&self) -> Option<Identity> {
        match &self.state().phase {
            Phase::Uninitialized => None,
            Phase::Loading { identity } | Phase::Error { identity, .. } => Some(identity.clone()),
            Phase::Ready(ready) => Some(ready.identity.clone()),
        }
    }

    pub fn snapshot(&self) -> Option<ProgressSnapshot> {
        match &self.state().phase {
            Phase::Ready(ready) => Some(ready.progress.clone()),
            _ => None,
        }
    }

    pub fn profile(&self) -> Option<Profile> {
        match &self.state().phase {
            Phase::Ready(ready) => Some(ready.profile.clone()),
            _ => None,
        }
    }

    pub fn view(&self) -> SessionView {
        let inner = self.state();
        let mut view = SessionView {
            status: inner.phase.status(),
            identity: None,
            profile: None,
            progress: None,
            error: None,
        };
        match &inner.phase {
            Phase::Uninitialized => {}
            Phase::Loading { identity } => view.identity = Some(identity.clone()),
            Phase::Ready(ready) => {
                view.identity = Some(ready.identity.clone());
                view.profile = Some(ready.profile.clone());
                view.progress = Some(ready.progress.clone());
            }
            Phase::Error { identity, message } => {
                view.identity = Some(identity.clone());
                view.error = Some(message.clone());
            }
        }
        view
    }

    // ─── Lifecycle ───────────────────────────────────────────

    /// Enter `Loading` for `identity` and return the load's generation.
    pub fn begin_load(&self, identity: Identity) -> u64 {
        let mut inner = self.state();
        inner.generation += 1;
        tracing::debug!(user_id = %identity.id, generation = inner.generation, "Loading progress");
        inner.phase = Phase::Loading { identity };
        self.publish(SessionStatus::Loading);
        inner.generation
    }

    /// Run the load started by `begin_load` and install its result.
    pub async fn finish_load(&self, generation: u64) -> Result<LoadOutcome> {
        let identity = {
            let inner = self.state();
            match &inner.phase {
                Phase::Loading { identity } if inner.generation == generation => identity.clone(),
                _ => return Ok(LoadOutcome::Superseded),
            }
        };

        let result = self.loader.load(&identity).await;

        let mut inner = self.state();
        if inner.generation != generation {
            tracing::debug!(
                user_id = %identity.id,
                generation,
                current = inner.generation,
                "Discarding stale load result"
            );
            return Ok(LoadOutcome::Superseded);
        }

        match result {
            Ok(loaded) => {
                inner.phase = Phase::Ready(Box::new(ReadyState {
                    identity,
                    profile: loaded.profile,
                    progress: loaded.snapshot,
                }));
                self.publish(SessionStatus::Ready);
                Ok(LoadOutcome::Ready)
            }
            Err(e) => {
                tracing::error!(user_id = %identity.id, error = %e, "Failed to load progress");
                inner.phase = Phase::Error {
                    identity,
                    message: e.to_string(),
                };
                self.publish(SessionStatus::Error);
                Err(e)
            }
        }
    }

    /// Load progress for `identity`, replacing whatever the session held.
    pub async fn load(&self, identity: Identity) -> Result<LoadOutcome> {
        let generation = self.begin_load(identity);
        self.finish_load(generation).await
    }

    /// Reload for the current identity, e.g. to recover from `Error`.
    pub async fn reload(&self) -> Result<LoadOutcome> {
        let identity = self
            .identity()
            .ok_or(AppError::NotReady(SessionStatus::Uninitialized.as_str()))?;
        self.load(identity).await
    }

    /// Drop everything and invalidate in-flight work.
    pub fn logout(&self) {
        let mut inner = self.state();
        inner.generation += 1;
        inner.phase = Phase::Uninitialized;
        self.publish(SessionStatus::Uninitialized);
        tracing::debug!(generation = inner.generation, "Progress session cleared");
    }

    fn rollback(&self, generation: u64, image: PreImage) {
        let mut inner = self.state();
        match inner.ready_at(generation) {
            Some(ready) => ready.progress.restore(image),
            None => tracing::debug!(generation, "Skipping rollback for superseded session"),
        }
    }

    // ─── Mutations ───────────────────────────────────────────

    /// Record a completed exercise.
    ///
    /// Returns `false` without writing if the exercise is already complete.
    pub async fn complete_exercise(
        &self,
        exercise_id: &str,
        attempt: ExerciseAttempt,
    ) -> Result<bool> {
        let _serial = self.mutations.lock().await;
        let now = Utc::now();

        let (generation, row, image) = {
            let mut inner = self.state();
            let generation = inner.generation;
            let ready = inner.ready_mut()?;
            if ready.progress.completed_exercise_ids().contains(exercise_id) {
                return Ok(false);
            }

            let row = CompletedExerciseRow {
                user_id: ready.identity.id.clone(),
                exercise_id: exercise_id.to_string(),
                completed_at: now,
                is_correct: attempt.is_correct,
                time_spent_sec: attempt.time_spent_sec,
                answer_data: attempt.answer_data,
                attempt_count: 1,
            };
            let image = ready.progress.capture(SnapshotField::CompletedExercises);
            ready.progress.insert_completed_exercise(
                CompletedExercise::from_row(row.clone(), ContentState::Missing),
                now.date_naive(),
            );
            (generation, row, image)
        };

        if let Err(e) = self.db.upsert_completed_exercise(&row).await {
            tracing::warn!(exercise_id, error = %e, "Failed to record exercise, rolling back");
            self.rollback(generation, image);
            return Err(e);
        }

        tracing::info!(user_id = %row.user_id, exercise_id, correct = row.is_correct, "Exercise completed");

        match self.loader.resolve_exercise(exercise_id).await {
            Ok(content) => {
                if let Some(ready) = self.state().ready_at(generation) {
                    ready.progress.set_exercise_content(exercise_id, content);
                }
            }
            Err(e) => tracing::warn!(exercise_id, error = %e, "Failed to resolve exercise content"),
        }
        Ok(true)
    }

    /// Record a completed simulation.
    ///
    /// Returns `false` without writing if the simulation is already complete.
    pub async fn complete_simulation(
        &self,
        simulation_id: &str,
        attempt: SimulationAttempt,
    ) -> Result<bool> {
        let _serial = self.mutations.lock().await;
        let now = Utc::now();

        let (generation, row, image) = {
            let mut inner = self.state();
            let generation = inner.generation;
            let ready = inner.ready_mut()?;
            if ready
                .progress
                .completed_simulation_ids()
                .contains(simulation_id)
            {
                return Ok(false);
            }

            let row = CompletedSimulationRow {
                user_id: ready.identity.id.clone(),
                simulation_id: simulation_id.to_string(),
                completed_at: now,
                duration_min: attempt.duration_min,
                notes: attempt.notes,
                corrected: attempt.corrected,
            };
            let image = ready.progress.capture(SnapshotField::CompletedSimulations);
            ready.progress.insert_completed_simulation(
                CompletedSimulation::from_row(row.clone(), ContentState::Missing),
                now.date_naive(),
            );
            (generation, row, image)
        };

        if let Err(e) = self.db.upsert_completed_simulation(&row).await {
            tracing::warn!(simulation_id, error = %e, "Failed to record simulation, rolling back");
            self.rollback(generation, image);
            return Err(e);
        }

        tracing::info!(user_id = %row.user_id, simulation_id, "Simulation completed");

        match self.loader.resolve_simulation(simulation_id).await {
            Ok(content) => {
                if let Some(ready) = self.state().ready_at(generation) {
                    ready.progress.set_simulation_content(simulation_id, content);
                }
            }
            Err(e) => {
                tracing::warn!(simulation_id, error = %e, "Failed to resolve simulation content")
            }
        }
        Ok(true)
    }

    /// Flip the saved flag of an exercise. Returns whether it is now saved.
    ///
    /// The remote row decides the direction; the local flip is only a
    /// prediction and is reconciled with what was actually written.
    pub async fn toggle_saved(&self, exercise_id: &str) -> Result<bool> {
        let _serial = self.mutations.lock().await;
        let now = Utc::now();

        let (generation, user_id, image) = {
            let mut inner = self.state();
            let generation = inner.generation;
            let ready = inner.ready_mut()?;
            let image = ready.progress.capture(SnapshotField::SavedExercises);
            if !ready.progress.remove_saved(exercise_id) {
                ready.progress.insert_saved(SavedExercise {
                    exercise_id: exercise_id.to_string(),
                    saved_at: now,
                    content: ContentState::Missing,
                });
            }
            (generation, ready.identity.id.clone(), image)
        };

        let saved = match self.persist_toggle(&user_id, exercise_id, now).await {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(exercise_id, error = %e, "Failed to toggle saved exercise, rolling back");
                self.rollback(generation, image);
                return Err(e);
            }
        };

        tracing::info!(user_id = %user_id, exercise_id, saved, "Saved flag toggled");

        {
            let mut inner = self.state();
            if let Some(ready) = inner.ready_at(generation) {
                if saved {
                    ready.progress.insert_saved(SavedExercise {
                        exercise_id: exercise_id.to_string(),
                        saved_at: now,
                        content: ContentState::Missing,
                    });
                } else {
                    ready.progress.remove_saved(exercise_id);
                }
            }
        }

        if saved {
            match self.loader.resolve_exercise(exercise_id).await {
                Ok(content) => {
                    if let Some(ready) = self.state().ready_at(generation) {
                        ready.progress.set_exercise_content(exercise_id, content);
                    }
                }
                Err(e) => {
                    tracing::warn!(exercise_id, error = %e, "Failed to resolve exercise content")
                }
            }
        }
        Ok(saved)
    }

    async fn persist_toggle(
        &self,
        user_id: &str,
        exercise_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self.db.is_exercise_saved(user_id, exercise_id).await? {
            self.db.delete_saved_exercise(user_id, exercise_id).await?;
            return Ok(false);
        }

        let row = SavedExerciseRow {
            user_id: user_id.to_string(),
            exercise_id: exercise_id.to_string(),
            created_at: now,
        };
        match self.db.insert_saved_exercise(&row).await {
            Ok(()) => Ok(true),
            // Saved from elsewhere in the meantime
            Err(e) if e.is_conflict() => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Spend one AI credit. Nothing is persisted.
    pub fn use_ai_credit(&self) -> Result<CreditSpend> {
        self.use_ai_credit_on(Utc::now().date_naive())
    }

    /// Spend one AI credit as of the UTC date `today`.
    pub fn use_ai_credit_on(&self, today: NaiveDate) -> Result<CreditSpend> {
        let mut inner = self.state();
        let ready = inner.ready_mut()?;
        let tier = ready.identity.tier;
        let credits = ready.progress.ai_credits_mut();
        let granted = credits.try_consume(tier, self.daily_ai_credits, today);
        let remaining = credits.remaining();

        if !granted {
            tracing::debug!(user_id = %ready.identity.id, tier = ?tier, "AI credit denied");
        }
        Ok(CreditSpend { granted, remaining })
    }

    /// Validate and persist a profile update.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile> {
        update
            .validate()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let _serial = self.mutations.lock().await;

        let (generation, previous, updated) = {
            let mut inner = self.state();
            let generation = inner.generation;
            let ready = inner.ready_mut()?;
            let previous = ready.profile.clone();
            ready.profile.apply(&update, Utc::now());
            (generation, previous, ready.profile.clone())
        };

        if let Err(e) = self.db.update_profile(&updated).await {
            tracing::warn!(user_id = %updated.id, error = %e, "Failed to update profile, rolling back");
            if let Some(ready) = self.state().ready_at(generation) {
                ready.profile = previous;
            }
            return Err(e);
        }

        tracing::info!(user_id = %updated.id, "Profile updated");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{collections, MemoryDb};
    use crate::models::SubscriptionTier;

    fn identity(tier: SubscriptionTier) -> Identity {
        Identity {
            id: "u1".to_string(),
            email: "luca@example.com".to_string(),
            display_name: "Luca".to_string(),
            tier,
        }
    }

    async fn ready_session(db: Arc<MemoryDb>, tier: SubscriptionTier) -> ProgressSession {
        let session = ProgressSession::new(db, 3);
        session.load(identity(tier)).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_mutations_rejected_before_ready() {
        let session = ProgressSession::new(Arc::new(MemoryDb::new()), 3);

        let err = session
            .complete_exercise("ex1", ExerciseAttempt::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotReady("uninitialized")));
        assert!(matches!(session.use_ai_credit(), Err(AppError::NotReady(_))));
    }

    #[tokio::test]
    async fn test_load_reaches_ready() {
        let db = Arc::new(MemoryDb::new());
        let session = ready_session(db, SubscriptionTier::Free).await;

        assert_eq!(session.status(), SessionStatus::Ready);
        let snapshot = session.snapshot().unwrap();
        assert!(snapshot.completed_exercise_ids().is_empty());
        assert_eq!(snapshot.streak(), 0);
        assert_eq!(session.profile().unwrap().username, "Luca");
    }

    #[tokio::test]
    async fn test_failed_load_enters_error() {
        let db = Arc::new(MemoryDb::new());
        db.fail(collections::SAVED_EXERCISES);
        let session = ProgressSession::new(db.clone(), 3);

        assert!(session.load(identity(SubscriptionTier::Free)).await.is_err());
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(session.view().error.is_some());

        db.heal(collections::SAVED_EXERCISES);
        assert_eq!(session.reload().await.unwrap(), LoadOutcome::Ready);
    }

    #[tokio::test]
    async fn test_complete_exercise_is_idempotent() {
        let db = Arc::new(MemoryDb::new());
        let session = ready_session(db, SubscriptionTier::Free).await;

        assert!(session
            .complete_exercise("ex1", ExerciseAttempt::default())
            .await
            .unwrap());
        assert!(!session
            .complete_exercise("ex1", ExerciseAttempt::default())
            .await
            .unwrap());

        let snapshot = session.snapshot().unwrap();
        assert_eq!(snapshot.completed_exercise_details().len(), 1);
        assert_eq!(snapshot.streak(), 1);
        assert!(snapshot.is_consistent());
    }

    #[tokio::test]
    async fn test_failed_write_restores_snapshot() {
        let db = Arc::new(MemoryDb::new());
        let session = ready_session(db.clone(), SubscriptionTier::Free).await;
        let before = session.snapshot().unwrap();

        db.fail(collections::COMPLETED_SIMULATIONS);
        let err = session
            .complete_simulation("sim1", SimulationAttempt::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert_eq!(session.snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn test_toggle_saved_twice_restores_state() {
        let db = Arc::new(MemoryDb::new());
        let session = ready_session(db.clone(), SubscriptionTier::Free).await;

        assert!(session.toggle_saved("ex2").await.unwrap());
        assert!(session.snapshot().unwrap().saved_exercise_ids().contains("ex2"));
        assert!(!session.toggle_saved("ex2").await.unwrap());

        assert!(session.snapshot().unwrap().saved_exercise_ids().is_empty());
        assert_eq!(db.saved_count("u1"), 0);
    }

    #[tokio::test]
    async fn test_free_tier_never_granted_credit() {
        let db = Arc::new(MemoryDb::new());
        let session = ready_session(db, SubscriptionTier::Free).await;

        let spend = session.use_ai_credit().unwrap();
        assert_eq!(
            spend,
            CreditSpend {
                granted: false,
                remaining: 0
            }
        );
    }

    #[tokio::test]
    async fn test_premium_credits_exhaust_then_reset_next_day() {
        let db = Arc::new(MemoryDb::new());
        let session = ready_session(db, SubscriptionTier::Premium).await;
        let today = Utc::now().date_naive();

        for expected in [2, 1, 0] {
            let spend = session.use_ai_credit_on(today).unwrap();
            assert!(spend.granted);
            assert_eq!(spend.remaining, expected);
        }
        assert!(!session.use_ai_credit_on(today).unwrap().granted);

        let tomorrow = today.succ_opt().unwrap();
        let spend = session.use_ai_credit_on(tomorrow).unwrap();
        assert!(spend.granted);
        assert_eq!(spend.remaining, 2);
    }

    #[tokio::test]
    async fn test_logout_drops_state_and_bumps_generation() {
        let db = Arc::new(MemoryDb::new());
        let session = ready_session(db, SubscriptionTier::Free).await;
        let generation = session.generation();

        session.logout();
        assert_eq!(session.status(), SessionStatus::Uninitialized);
        assert!(session.snapshot().is_none());
        assert!(session.generation() > generation);
    }

    #[tokio::test]
    async fn test_stale_load_is_discarded() {
        let db = Arc::new(MemoryDb::new());
        let session = ProgressSession::new(db, 3);

        let generation = session.begin_load(identity(SubscriptionTier::Free));
        session.logout();
        assert_eq!(
            session.finish_load(generation).await.unwrap(),
            LoadOutcome::Superseded
        );
        assert_eq!(session.status(), SessionStatus::Uninitialized);
    }

    #[tokio::test]
    async fn test_invalid_profile_update_rejected() {
        let db = Arc::new(MemoryDb::new());
        let session = ready_session(db, SubscriptionTier::Free).await;

        let err = session
            .update_profile(ProfileUpdate {
                email: Some("not-an-email".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(session.profile().unwrap().email, "luca@example.com");
    }

    #[tokio::test]
    async fn test_profile_update_rolls_back_on_failure() {
        let db = Arc::new(MemoryDb::new());
        let session = ready_session(db.clone(), SubscriptionTier::Free).await;

        db.fail(collections::PROFILES);
        let result = session
            .update_profile(ProfileUpdate {
                username: Some("luca_b".to_string()),
                ..Default::default()
            })
            .await;
        assert!(result.is_err());
        assert_eq!(session.profile().unwrap().username, "Luca");
    }

    #[tokio::test]
    async fn test_blank_username_rejected() {
        let db = Arc::new(MemoryDb::new());
        let session = ready_session(db, SubscriptionTier::Free).await;

        let err = session
            .update_profile(ProfileUpdate {
                username: Some("   ".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(session.profile().unwrap().username, "Luca");
    }

    #[tokio::test]
    async fn test_toggle_saved_matches_reload() {
        let db = Arc::new(MemoryDb::new());
        let session = ready_session(db, SubscriptionTier::Free).await;
        session
            .complete_exercise("ex1", ExerciseAttempt::default())
            .await
            .unwrap();

        assert!(session.toggle_saved("ex9").await.unwrap());
        let incremental = session.snapshot().unwrap();

        assert_eq!(session.reload().await.unwrap(), LoadOutcome::Ready);
        assert_eq!(session.snapshot().unwrap(), incremental);
    }

    #[tokio::test]
    async fn test_rollback_from_superseded_session_is_dropped() {
        let db = Arc::new(MemoryDb::new());
        let session = Arc::new(ready_session(db.clone(), SubscriptionTier::Free).await);

        let gate = db.hold(collections::COMPLETED_EXERCISES);
        let write = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .complete_exercise("ex1", ExerciseAttempt::default())
                    .await
            }
        });
        gate.arrived().await;
        db.unhold(collections::COMPLETED_EXERCISES);

        // Sign out and back in while the write is in flight; the new
        // session sees a completion the old pre-image does not have
        session.logout();
        db.upsert_completed_exercise(&CompletedExerciseRow {
            user_id: "u1".to_string(),
            exercise_id: "ex5".to_string(),
            completed_at: Utc::now(),
            is_correct: true,
            time_spent_sec: 30,
            answer_data: None,
            attempt_count: 1,
        })
        .await
        .unwrap();
        assert_eq!(
            session.load(identity(SubscriptionTier::Free)).await.unwrap(),
            LoadOutcome::Ready
        );
        let reloaded = session.snapshot().unwrap();
        assert!(reloaded.completed_exercise_ids().contains("ex5"));

        db.fail(collections::COMPLETED_EXERCISES);
        gate.release();
        let err = write.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        assert_eq!(session.status(), SessionStatus::Ready);
        assert_eq!(session.snapshot().unwrap(), reloaded);
    }
}
