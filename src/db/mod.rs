//! Database layer.
//!
//! `ProgressStore` is the persistence seam the session talks to. Firestore
//! backs it in production; `MemoryDb` is an in-process store for tests.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::error::Result;
use crate::models::{CompletedExerciseRow, CompletedSimulationRow, Profile, SavedExerciseRow};
use async_trait::async_trait;

/// Collection names as constants.
pub mod collections {
    pub const PROFILES: &str = "profiles";
    pub const COMPLETED_EXERCISES: &str = "completed_exercises";
    pub const SAVED_EXERCISES: &str = "saved_exercises";
    pub const COMPLETED_SIMULATIONS: &str = "completed_simulations";
    /// Exercise content (read-only here)
    pub const EXERCISES: &str = "exercises";
    /// Simulation content (read-only here)
    pub const SIMULATIONS: &str = "simulations";
}

/// Document ID for an event keyed by (user, content).
///
/// Both parts are URL-encoded, so the `:` separator cannot occur inside them.
pub fn event_doc_id(user_id: &str, content_id: &str) -> String {
    format!(
        "{}:{}",
        urlencoding::encode(user_id),
        urlencoding::encode(content_id)
    )
}

/// Remote row store holding profiles and progress events.
///
/// Event listings are ordered by event time, newest first.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    // ─── Profiles ────────────────────────────────────────────

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>>;

    /// Insert a new profile.
    ///
    /// Returns `AppError::Conflict` if a profile with the same ID exists.
    async fn create_profile(&self, profile: &Profile) -> Result<()>;

    async fn update_profile(&self, profile: &Profile) -> Result<()>;

    // ─── Completed Exercises ─────────────────────────────────

    async fn list_completed_exercises(&self, user_id: &str) -> Result<Vec<CompletedExerciseRow>>;

    async fn upsert_completed_exercise(&self, row: &CompletedExerciseRow) -> Result<()>;

    // ─── Saved Exercises ─────────────────────────────────────

    async fn list_saved_exercises(&self, user_id: &str) -> Result<Vec<SavedExerciseRow>>;

    async fn is_exercise_saved(&self, user_id: &str, exercise_id: &str) -> Result<bool>;

    async fn insert_saved_exercise(&self, row: &SavedExerciseRow) -> Result<()>;

    async fn delete_saved_exercise(&self, user_id: &str, exercise_id: &str) -> Result<()>;

    // ─── Completed Simulations ───────────────────────────────

    async fn list_completed_simulations(
        &self,
        user_id: &str,
    ) -> Result<Vec<CompletedSimulationRow>>;

    async fn upsert_completed_simulation(&self, row: &CompletedSimulationRow) -> Result<()>;

    // ─── Content ─────────────────────────────────────────────
    //
    // Content documents are returned untyped; callers validate their shape
    // and quarantine what does not parse.

    async fn get_exercise(&self, exercise_id: &str) -> Result<Option<serde_json::Value>>;

    async fn get_simulation(&self, simulation_id: &str) -> Result<Option<serde_json::Value>>;
}
