//! In-process `ProgressStore` backed by concurrent maps.
//!
//! Used by tests in place of Firestore. Every operation yields to the
//! scheduler once before touching data, so concurrent callers interleave
//! the way they would against a remote store.
//! Collections can be switched into a failing mode to exercise error paths,
//! or held so an operation stays in flight until the test releases it.

use crate::db::{collections, event_doc_id, ProgressStore};
use crate::error::{AppError, Result};
use crate::models::{
    CompletedExerciseRow, CompletedSimulationRow, ExerciseRow, Profile, SavedExerciseRow,
    SimulationRow,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

/// Parks operations on a held collection.
pub struct Gate {
    arrived: Notify,
    release: Semaphore,
}

impl Gate {
    fn new() -> Self {
        Self {
            arrived: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    /// Wait until an operation has reached the gate.
    pub async fn arrived(&self) {
        self.arrived.notified().await;
    }

    /// Let one parked operation continue.
    pub fn release(&self) {
        self.release.add_permits(1);
    }

    async fn pass(&self) {
        self.arrived.notify_one();
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Default)]
pub struct MemoryDb {
    profiles: DashMap<String, Profile>,
    completed_exercises: DashMap<String, CompletedExerciseRow>,
    saved_exercises: DashMap<String, SavedExerciseRow>,
    completed_simulations: DashMap<String, CompletedSimulationRow>,
    exercises: DashMap<String, serde_json::Value>,
    simulations: DashMap<String, serde_json::Value>,
    failing: DashSet<&'static str>,
    held: DashMap<&'static str, Arc<Gate>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `collection` fail until `heal` is called.
    pub fn fail(&self, collection: &'static str) {
        self.failing.insert(collection);
    }

    pub fn heal(&self, collection: &'static str) {
        self.failing.remove(collection);
    }

    /// Hold operations on `collection` at a gate. Operations that start
    /// after `unhold` pass straight through.
    pub fn hold(&self, collection: &'static str) -> Arc<Gate> {
        let gate = Arc::new(Gate::new());
        self.held.insert(collection, Arc::clone(&gate));
        gate
    }

    pub fn unhold(&self, collection: &'static str) {
        self.held.remove(collection);
    }

    pub fn put_exercise(&self, row: ExerciseRow) {
        let document = serde_json::to_value(&row).unwrap_or_default();
        self.put_exercise_document(&row.id, document);
    }

    /// Store an exercise document as-is, whatever its shape.
    pub fn put_exercise_document(&self, id: &str, document: serde_json::Value) {
        self.exercises.insert(id.to_string(), document);
    }

    pub fn put_simulation(&self, row: SimulationRow) {
        let document = serde_json::to_value(&row).unwrap_or_default();
        self.simulations.insert(row.id.clone(), document);
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    /// Number of saved-exercise documents for `user_id`.
    pub fn saved_count(&self, user_id: &str) -> usize {
        self.saved_exercises
            .iter()
            .filter(|r| r.user_id == user_id)
            .count()
    }

    async fn enter(&self, collection: &'static str) -> Result<()> {
        tokio::task::yield_now().await;
        let gate = self.held.get(collection).map(|g| Arc::clone(g.value()));
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.failing.contains(collection) {
            return Err(AppError::Database(format!(
                "{} unavailable (injected failure)",
                collection
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for MemoryDb {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        self.enter(collections::PROFILES).await?;
        Ok(self.profiles.get(user_id).map(|p| p.clone()))
    }

    async fn create_profile(&self, profile: &Profile) -> Result<()> {
        self.enter(collections::PROFILES).await?;
        match self.profiles.entry(profile.id.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "profile {} already exists",
                profile.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(profile.clone());
                Ok(())
            }
        }
    }

    async fn update_profile(&self, profile: &Profile) -> Result<()> {
        self.enter(collections::PROFILES).await?;
        self.profiles.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn list_completed_exercises(&self, user_id: &str) -> Result<Vec<CompletedExerciseRow>> {
        self.enter(collections::COMPLETED_EXERCISES).await?;
        let mut rows: Vec<CompletedExerciseRow> = self
            .completed_exercises
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.clone())
            .collect();
        rows.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(rows)
    }

    async fn upsert_completed_exercise(&self, row: &CompletedExerciseRow) -> Result<()> {
        self.enter(collections::COMPLETED_EXERCISES).await?;
        self.completed_exercises
            .insert(event_doc_id(&row.user_id, &row.exercise_id), row.clone());
        Ok(())
    }

    async fn list_saved_exercises(&self, user_id: &str) -> Result<Vec<SavedExerciseRow>> {
        self.enter(collections::SAVED_EXERCISES).await?;
        let mut rows: Vec<SavedExerciseRow> = self
            .saved_exercises
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn is_exercise_saved(&self, user_id: &str, exercise_id: &str) -> Result<bool> {
        self.enter(collections::SAVED_EXERCISES).await?;
        Ok(self
            .saved_exercises
            .contains_key(&event_doc_id(user_id, exercise_id)))
    }

    async fn insert_saved_exercise(&self, row: &SavedExerciseRow) -> Result<()> {
        self.enter(collections::SAVED_EXERCISES).await?;
        match self
            .saved_exercises
            .entry(event_doc_id(&row.user_id, &row.exercise_id))
        {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "exercise {} already saved",
                row.exercise_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(row.clone());
                Ok(())
            }
        }
    }

    async fn delete_saved_exercise(&self, user_id: &str, exercise_id: &str) -> Result<()> {
        self.enter(collections::SAVED_EXERCISES).await?;
        self.saved_exercises
            .remove(&event_doc_id(user_id, exercise_id));
        Ok(())
    }

    async fn list_completed_simulations(
        &self,
        user_id: &str,
    ) -> Result<Vec<CompletedSimulationRow>> {
        self.enter(collections::COMPLETED_SIMULATIONS).await?;
        let mut rows: Vec<CompletedSimulationRow> = self
            .completed_simulations
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.clone())
            .collect();
        rows.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(rows)
    }

    async fn upsert_completed_simulation(&self, row: &CompletedSimulationRow) -> Result<()> {
        self.enter(collections::COMPLETED_SIMULATIONS).await?;
        self.completed_simulations
            .insert(event_doc_id(&row.user_id, &row.simulation_id), row.clone());
        Ok(())
    }

    async fn get_exercise(&self, exercise_id: &str) -> Result<Option<serde_json::Value>> {
        self.enter(collections::EXERCISES).await?;
        Ok(self.exercises.get(exercise_id).map(|d| d.clone()))
    }

    async fn get_simulation(&self, simulation_id: &str) -> Result<Option<serde_json::Value>> {
        self.enter(collections::SIMULATIONS).await?;
        Ok(self.simulations.get(simulation_id).map(|d| d.clone()))
    }
}
