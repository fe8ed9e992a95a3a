// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Progress loading.
//!
//! Makes sure the learner has a profile row, fetches the three progress
//! collections concurrently, resolves the content each event refers to and
//! merges everything into a `ProgressSnapshot`.

use crate::db::{collections, ProgressStore};
use crate::error::{AppError, Result};
use crate::models::{
    AiCredits, CompletedExercise, CompletedSimulation, ContentState, Exercise, ExerciseRow,
    Identity, LoadedCollections, Profile, ProgressSnapshot, SavedExercise, Simulation,
    SimulationRow,
};
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

const MAX_CONCURRENT_LOOKUPS: usize = 16;

/// Result of a successful load.
#[derive(Debug, Clone)]
pub struct LoadedProgress {
    pub profile: Profile,
    pub snapshot: ProgressSnapshot,
}

#[derive(Clone)]
pub struct ProgressLoader {
    db: Arc<dyn ProgressStore>,
    daily_ai_credits: u32,
}

impl ProgressLoader {
    pub fn new(db: Arc<dyn ProgressStore>, daily_ai_credits: u32) -> Self {
        Self {
            db,
            daily_ai_credits,
        }
    }

    /// Fetch the learner's profile, creating it on first sign-in.
    ///
    /// Two loads racing for a new learner both try to create the row; the
    /// loser re-reads the winner's row instead of failing.
    pub async fn ensure_profile(&self, identity: &Identity) -> Result<Profile> {
        if let Some(profile) = self.db.get_profile(&identity.id).await? {
            return Ok(profile);
        }

        let profile = Profile::provision(identity, Utc::now());
        match self.db.create_profile(&profile).await {
            Ok(()) => {
                tracing::info!(user_id = %identity.id, "Created profile");
                Ok(profile)
            }
            Err(e) if e.is_conflict() => {
                tracing::debug!(user_id = %identity.id, "Profile created concurrently, re-reading");
                self.db.get_profile(&identity.id).await?.ok_or_else(|| {
                    AppError::NotFound(format!("profile {} vanished after conflict", identity.id))
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Load profile and snapshot for `identity`. Any fetch failure aborts.
    pub async fn load(&self, identity: &Identity) -> Result<LoadedProgress> {
        let profile = self.ensure_profile(identity).await?;
        let collections = self.fetch_collections(&identity.id).await?;

        let now = Utc::now();
        let snapshot = ProgressSnapshot::merge(
            collections,
            AiCredits::for_tier(identity.tier, self.daily_ai_credits, now.date_naive()),
            fallback_last_active(&profile, now),
            now.date_naive(),
        );

        tracing::info!(
            user_id = %identity.id,
            completed_exercises = snapshot.completed_exercise_ids().len(),
            saved_exercises = snapshot.saved_exercise_ids().len(),
            completed_simulations = snapshot.completed_simulation_ids().len(),
            streak = snapshot.streak(),
            "Loaded progress"
        );

        Ok(LoadedProgress { profile, snapshot })
    }

    /// Fetch the three event collections concurrently and attach content.
    pub async fn fetch_collections(&self, user_id: &str) -> Result<LoadedCollections> {
        let (completed, saved, simulations) = tokio::try_join!(
            self.db.list_completed_exercises(user_id),
            self.db.list_saved_exercises(user_id),
            self.db.list_completed_simulations(user_id),
        )?;

        let exercise_ids: BTreeSet<String> = completed
            .iter()
            .map(|r| r.exercise_id.clone())
            .chain(saved.iter().map(|r| r.exercise_id.clone()))
            .collect();
        let simulation_ids: BTreeSet<String> =
            simulations.iter().map(|r| r.simulation_id.clone()).collect();

        let (exercises, sims) = tokio::try_join!(
            self.resolve_exercises(exercise_ids),
            self.resolve_simulations(simulation_ids),
        )?;

        let exercise_content = |id: &str| {
            exercises
                .get(id)
                .cloned()
                .unwrap_or(ContentState::Missing)
        };

        Ok(LoadedCollections {
            completed_exercises: completed
                .into_iter()
                .map(|row| {
                    let content = exercise_content(&row.exercise_id);
                    CompletedExercise::from_row(row, content)
                })
                .collect(),
            saved_exercises: saved
                .into_iter()
                .map(|row| {
                    let content = exercise_content(&row.exercise_id);
                    SavedExercise::from_row(row, content)
                })
                .collect(),
            completed_simulations: simulations
                .into_iter()
                .map(|row| {
                    let content = sims
                        .get(&row.simulation_id)
                        .cloned()
                        .unwrap_or(ContentState::Missing);
                    CompletedSimulation::from_row(row, content)
                })
                .collect(),
        })
    }

    /// Look up exercise content. Only storage failures are errors; a
    /// malformed document comes back quarantined.
    pub async fn resolve_exercise(&self, exercise_id: &str) -> Result<ContentState<Exercise>> {
        let document = self.db.get_exercise(exercise_id).await?;
        Ok(ContentState::from_document::<ExerciseRow>(
            collections::EXERCISES,
            exercise_id,
            document,
        ))
    }

    pub async fn resolve_simulation(
        &self,
        simulation_id: &str,
    ) -> Result<ContentState<Simulation>> {
        let document = self.db.get_simulation(simulation_id).await?;
        Ok(ContentState::from_document::<SimulationRow>(
            collections::SIMULATIONS,
            simulation_id,
            document,
        ))
    }

    async fn resolve_exercises(
        &self,
        ids: BTreeSet<String>,
    ) -> Result<HashMap<String, ContentState<Exercise>>> {
        stream::iter(ids)
            .map(|id| async move {
                let content = self.resolve_exercise(&id).await?;
                Ok::<_, AppError>((id, content))
            })
            .buffer_unordered(MAX_CONCURRENT_LOOKUPS)
            .collect::<Vec<Result<_>>>()
            .await
            .into_iter()
            .collect()
    }

    async fn resolve_simulations(
        &self,
        ids: BTreeSet<String>,
    ) -> Result<HashMap<String, ContentState<Simulation>>> {
        stream::iter(ids)
            .map(|id| async move {
                let content = self.resolve_simulation(&id).await?;
                Ok::<_, AppError>((id, content))
            })
            .buffer_unordered(MAX_CONCURRENT_LOOKUPS)
            .collect::<Vec<Result<_>>>()
            .await
            .into_iter()
            .collect()
    }
}

/// Last-active time to report for a learner with no events.
fn fallback_last_active(profile: &Profile, now: DateTime<Utc>) -> DateTime<Utc> {
    profile.updated_at.min(now)
}
