// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Learner progress: stored event rows and the in-memory snapshot.
//!
//! The snapshot keeps each ID set as the projection of its detail list.
//! Fields are private so every change goes through a method that maintains
//! that projection.

use crate::models::content::{ContentState, Exercise, Simulation};
use crate::models::credits::AiCredits;
use crate::time_utils::active_day_streak;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

// ─── Stored Event Rows ───────────────────────────────────────

fn default_attempt_count() -> u32 {
    1
}

/// Row in `completed_exercises`, one per (user, exercise).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedExerciseRow {
    pub user_id: String,
    pub exercise_id: String,
    pub completed_at: DateTime<Utc>,
    pub is_correct: bool,
    pub time_spent_sec: u32,
    #[serde(default)]
    pub answer_data: Option<serde_json::Value>,
    #[serde(default = "default_attempt_count")]
    pub attempt_count: u32,
}

/// Row in `saved_exercises`, one per (user, exercise).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedExerciseRow {
    pub user_id: String,
    pub exercise_id: String,
    pub created_at: DateTime<Utc>,
}

/// Row in `completed_simulations`, one per (user, simulation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedSimulationRow {
    pub user_id: String,
    pub simulation_id: String,
    pub completed_at: DateTime<Utc>,
    pub duration_min: u32,
    #[serde(default)]
    pub notes: Option<String>,
    pub corrected: bool,
}

/// Outcome reported when a learner finishes an exercise.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExerciseAttempt {
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub time_spent_sec: u32,
    #[serde(default)]
    pub answer_data: Option<serde_json::Value>,
}

/// Outcome reported when a learner finishes a simulation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulationAttempt {
    #[serde(default)]
    pub duration_min: u32,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub corrected: bool,
}

// ─── Detail Records ──────────────────────────────────────────

/// Common view over progress events for ordering and projection.
pub trait ProgressEvent {
    fn content_id(&self) -> &str;
    fn occurred_at(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedExercise {
    pub exercise_id: String,
    pub completed_at: DateTime<Utc>,
    pub is_correct: bool,
    pub time_spent_sec: u32,
    pub attempt_count: u32,
    pub answer_data: Option<serde_json::Value>,
    pub content: ContentState<Exercise>,
}

impl CompletedExercise {
    pub fn from_row(row: CompletedExerciseRow, content: ContentState<Exercise>) -> Self {
        Self {
            exercise_id: row.exercise_id,
            completed_at: row.completed_at,
            is_correct: row.is_correct,
            time_spent_sec: row.time_spent_sec,
            attempt_count: row.attempt_count,
            answer_data: row.answer_data,
            content,
        }
    }
}

impl ProgressEvent for CompletedExercise {
    fn content_id(&self) -> &str {
        &self.exercise_id
    }
    fn occurred_at(&self) -> DateTime<Utc> {
        self.completed_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedExercise {
    pub exercise_id: String,
    pub saved_at: DateTime<Utc>,
    pub content: ContentState<Exercise>,
}

impl SavedExercise {
    pub fn from_row(row: SavedExerciseRow, content: ContentState<Exercise>) -> Self {
        Self {
            exercise_id: row.exercise_id,
            saved_at: row.created_at,
            content,
        }
    }
}

impl ProgressEvent for SavedExercise {
    fn content_id(&self) -> &str {
        &self.exercise_id
    }
    fn occurred_at(&self) -> DateTime<Utc> {
        self.saved_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedSimulation {
    pub simulation_id: String,
    pub completed_at: DateTime<Utc>,
    pub duration_min: u32,
    pub notes: Option<String>,
    pub corrected: bool,
    pub content: ContentState<Simulation>,
}

impl CompletedSimulation {
    pub fn from_row(row: CompletedSimulationRow, content: ContentState<Simulation>) -> Self {
        Self {
            simulation_id: row.simulation_id,
            completed_at: row.completed_at,
            duration_min: row.duration_min,
            notes: row.notes,
            corrected: row.corrected,
            content,
        }
    }
}

impl ProgressEvent for CompletedSimulation {
    fn content_id(&self) -> &str {
        &self.simulation_id
    }
    fn occurred_at(&self) -> DateTime<Utc> {
        self.completed_at
    }
}

/// Sort newest first (ID breaks ties) and keep only the newest event per ID.
fn order_by_recency<T: ProgressEvent>(mut events: Vec<T>) -> Vec<T> {
    events.sort_by(|a, b| {
        b.occurred_at()
            .cmp(&a.occurred_at())
            .then_with(|| a.content_id().cmp(b.content_id()))
    });
    let mut seen = HashSet::new();
    events.retain(|e| seen.insert(e.content_id().to_string()));
    events
}

fn project_ids<T: ProgressEvent>(events: &[T]) -> BTreeSet<String> {
    events.iter().map(|e| e.content_id().to_string()).collect()
}

fn is_projection<T: ProgressEvent>(ids: &BTreeSet<String>, events: &[T]) -> bool {
    ids.len() == events.len() && events.iter().all(|e| ids.contains(e.content_id()))
}

// ─── Snapshot ────────────────────────────────────────────────

/// The three remote collections, resolved and ready to merge.
#[derive(Debug, Clone, Default)]
pub struct LoadedCollections {
    pub completed_exercises: Vec<CompletedExercise>,
    pub saved_exercises: Vec<SavedExercise>,
    pub completed_simulations: Vec<CompletedSimulation>,
}

/// In-memory aggregate of a learner's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    completed_exercise_ids: BTreeSet<String>,
    saved_exercise_ids: BTreeSet<String>,
    completed_simulation_ids: BTreeSet<String>,
    completed_exercise_details: Vec<CompletedExercise>,
    saved_exercise_details: Vec<SavedExercise>,
    completed_simulation_details: Vec<CompletedSimulation>,
    streak: u32,
    last_active: DateTime<Utc>,
    ai_credits: AiCredits,
}

/// Snapshot fields a mutation can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotField {
    CompletedExercises,
    SavedExercises,
    CompletedSimulations,
}

/// Copy of a field taken before an optimistic change.
#[derive(Debug, Clone)]
pub enum PreImage {
    CompletedExercises {
        ids: BTreeSet<String>,
        details: Vec<CompletedExercise>,
        streak: u32,
        last_active: DateTime<Utc>,
    },
    SavedExercises {
        ids: BTreeSet<String>,
        details: Vec<SavedExercise>,
    },
    CompletedSimulations {
        ids: BTreeSet<String>,
        details: Vec<CompletedSimulation>,
        streak: u32,
        last_active: DateTime<Utc>,
    },
}

impl ProgressSnapshot {
    /// Snapshot for a session whose collections have not been fetched yet.
    pub fn empty(ai_credits: AiCredits, now: DateTime<Utc>) -> Self {
        Self::merge(LoadedCollections::default(), ai_credits, now, now.date_naive())
    }

    /// Merge fetched collections into a snapshot.
    ///
    /// The result depends only on the collections' contents, not on the
    /// order rows arrived in. `fallback_last_active` is used when there are
    /// no completion events.
    pub fn merge(
        collections: LoadedCollections,
        ai_credits: AiCredits,
        fallback_last_active: DateTime<Utc>,
        today: NaiveDate,
    ) -> Self {
        let completed_exercise_details = order_by_recency(collections.completed_exercises);
        let saved_exercise_details = order_by_recency(collections.saved_exercises);
        let completed_simulation_details = order_by_recency(collections.completed_simulations);

        let mut snapshot = Self {
            completed_exercise_ids: project_ids(&completed_exercise_details),
            saved_exercise_ids: project_ids(&saved_exercise_details),
            completed_simulation_ids: project_ids(&completed_simulation_details),
            completed_exercise_details,
            saved_exercise_details,
            completed_simulation_details,
            streak: 0,
            last_active: fallback_last_active,
            ai_credits,
        };

        // Saving an exercise is not activity; only completions count
        let latest = snapshot
            .completed_exercise_details
            .iter()
            .map(ProgressEvent::occurred_at)
            .chain(
                snapshot
                    .completed_simulation_details
                    .iter()
                    .map(ProgressEvent::occurred_at),
            )
            .max();
        if let Some(latest) = latest {
            snapshot.last_active = latest;
        }
        snapshot.streak = snapshot.compute_streak(today);
        snapshot
    }

    // ─── Accessors ───────────────────────────────────────────

    pub fn completed_exercise_ids(&self) -> &BTreeSet<String> {
        &self.completed_exercise_ids
    }

    pub fn saved_exercise_ids(&self) -> &BTreeSet<String> {
        &self.saved_exercise_ids
    }

    pub fn completed_simulation_ids(&self) -> &BTreeSet<String> {
        &self.completed_simulation_ids
    }

    pub fn completed_exercise_details(&self) -> &[CompletedExercise] {
        &self.completed_exercise_details
    }

    pub fn saved_exercise_details(&self) -> &[SavedExercise] {
        &self.saved_exercise_details
    }

    pub fn completed_simulation_details(&self) -> &[CompletedSimulation] {
        &self.completed_simulation_details
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    pub fn ai_credits(&self) -> &AiCredits {
        &self.ai_credits
    }

    pub fn ai_credits_mut(&mut self) -> &mut AiCredits {
        &mut self.ai_credits
    }

    /// Every ID set equals the projection of its detail list.
    pub fn is_consistent(&self) -> bool {
        is_projection(&self.completed_exercise_ids, &self.completed_exercise_details)
            && is_projection(&self.saved_exercise_ids, &self.saved_exercise_details)
            && is_projection(
                &self.completed_simulation_ids,
                &self.completed_simulation_details,
            )
    }

    // ─── Mutations ───────────────────────────────────────────

    /// Record a completed exercise. Returns `false` if it was already present.
    pub fn insert_completed_exercise(&mut self, detail: CompletedExercise, today: NaiveDate) -> bool {
        if !self.completed_exercise_ids.insert(detail.exercise_id.clone()) {
            return false;
        }
        let at = detail.completed_at;
        self.completed_exercise_details.insert(0, detail);
        self.touch(at, today);
        true
    }

    /// Record a completed simulation. Returns `false` if it was already present.
    pub fn insert_completed_simulation(
        &mut self,
        detail: CompletedSimulation,
        today: NaiveDate,
    ) -> bool {
        if !self
            .completed_simulation_ids
            .insert(detail.simulation_id.clone())
        {
            return false;
        }
        let at = detail.completed_at;
        self.completed_simulation_details.insert(0, detail);
        self.touch(at, today);
        true
    }

    /// Add a saved exercise. Returns `false` if it was already saved.
    pub fn insert_saved(&mut self, detail: SavedExercise) -> bool {
        if !self.saved_exercise_ids.insert(detail.exercise_id.clone()) {
            return false;
        }
        self.saved_exercise_details.insert(0, detail);
        true
    }

    /// Remove a saved exercise. Returns `false` if it was not saved.
    pub fn remove_saved(&mut self, exercise_id: &str) -> bool {
        if !self.saved_exercise_ids.remove(exercise_id) {
            return false;
        }
        self.saved_exercise_details
            .retain(|d| d.exercise_id != exercise_id);
        true
    }

    /// Attach resolved content to every detail referring to `exercise_id`.
    pub fn set_exercise_content(&mut self, exercise_id: &str, content: ContentState<Exercise>) {
        for detail in self
            .completed_exercise_details
            .iter_mut()
            .filter(|d| d.exercise_id == exercise_id)
        {
            detail.content = content.clone();
        }
        for detail in self
            .saved_exercise_details
            .iter_mut()
            .filter(|d| d.exercise_id == exercise_id)
        {
            detail.content = content.clone();
        }
    }

    /// Attach resolved content to the detail referring to `simulation_id`.
    pub fn set_simulation_content(
        &mut self,
        simulation_id: &str,
        content: ContentState<Simulation>,
    ) {
        if let Some(detail) = self
            .completed_simulation_details
            .iter_mut()
            .find(|d| d.simulation_id == simulation_id)
        {
            detail.content = content;
        }
    }

    // ─── Pre-images ──────────────────────────────────────────

    pub fn capture(&self, field: SnapshotField) -> PreImage {
        match field {
            SnapshotField::CompletedExercises => PreImage::CompletedExercises {
                ids: self.completed_exercise_ids.clone(),
                details: self.completed_exercise_details.clone(),
                streak: self.streak,
                last_active: self.last_active,
            },
            SnapshotField::SavedExercises => PreImage::SavedExercises {
                ids: self.saved_exercise_ids.clone(),
                details: self.saved_exercise_details.clone(),
            },
            SnapshotField::CompletedSimulations => PreImage::CompletedSimulations {
                ids: self.completed_simulation_ids.clone(),
                details: self.completed_simulation_details.clone(),
                streak: self.streak,
                last_active: self.last_active,
            },
        }
    }

    pub fn restore(&mut self, image: PreImage) {
        match image {
            PreImage::CompletedExercises {
                ids,
                details,
                streak,
                last_active,
            } => {
                self.completed_exercise_ids = ids;
                self.completed_exercise_details = details;
                self.streak = streak;
                self.last_active = last_active;
            }
            PreImage::SavedExercises { ids, details } => {
                self.saved_exercise_ids = ids;
                self.saved_exercise_details = details;
            }
            PreImage::CompletedSimulations {
                ids,
                details,
                streak,
                last_active,
            } => {
                self.completed_simulation_ids = ids;
                self.completed_simulation_details = details;
                self.streak = streak;
                self.last_active = last_active;
            }
        }
    }

    // ─── Helpers ─────────────────────────────────────────────

    fn touch(&mut self, at: DateTime<Utc>, today: NaiveDate) {
        if at > self.last_active {
            self.last_active = at;
        }
        self.streak = self.compute_streak(today);
    }

    fn compute_streak(&self, today: NaiveDate) -> u32 {
        let events = self
            .completed_exercise_details
            .iter()
            .map(ProgressEvent::occurred_at)
            .chain(
                self.completed_simulation_details
                    .iter()
                    .map(ProgressEvent::occurred_at),
            );
        active_day_streak(events, today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::SubscriptionTier;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 20).unwrap()
    }

    fn credits() -> AiCredits {
        AiCredits::for_tier(SubscriptionTier::Premium, 20, today())
    }

    fn completed(id: &str, at: &str) -> CompletedExercise {
        CompletedExercise::from_row(
            CompletedExerciseRow {
                user_id: "user-1".to_string(),
                exercise_id: id.to_string(),
                completed_at: ts(at),
                is_correct: true,
                time_spent_sec: 60,
                answer_data: None,
                attempt_count: 1,
            },
            ContentState::Missing,
        )
    }

    fn saved(id: &str, at: &str) -> SavedExercise {
        SavedExercise {
            exercise_id: id.to_string(),
            saved_at: ts(at),
            content: ContentState::Missing,
        }
    }

    fn simulation(id: &str, at: &str) -> CompletedSimulation {
        CompletedSimulation::from_row(
            CompletedSimulationRow {
                user_id: "user-1".to_string(),
                simulation_id: id.to_string(),
                completed_at: ts(at),
                duration_min: 360,
                notes: None,
                corrected: false,
            },
            ContentState::Missing,
        )
    }

    fn merged(collections: LoadedCollections) -> ProgressSnapshot {
        ProgressSnapshot::merge(collections, credits(), ts("2024-01-01T00:00:00Z"), today())
    }

    #[test]
    fn test_merge_three_collections() {
        let snapshot = merged(LoadedCollections {
            completed_exercises: vec![completed("ex1", "2024-06-19T10:00:00Z")],
            saved_exercises: vec![],
            completed_simulations: vec![simulation("sim1", "2024-06-20T09:00:00Z")],
        });

        assert_eq!(
            snapshot.completed_exercise_ids().iter().collect::<Vec<_>>(),
            vec!["ex1"]
        );
        assert!(snapshot.saved_exercise_ids().is_empty());
        assert_eq!(
            snapshot.completed_simulation_ids().iter().collect::<Vec<_>>(),
            vec!["sim1"]
        );
        assert_eq!(snapshot.streak(), 2);
        assert_eq!(snapshot.last_active(), ts("2024-06-20T09:00:00Z"));
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_merge_is_independent_of_arrival_order() {
        let rows = vec![
            completed("ex3", "2024-06-18T10:00:00Z"),
            completed("ex1", "2024-06-20T10:00:00Z"),
            completed("ex7", "2024-06-19T10:00:00Z"),
        ];
        let mut reversed = rows.clone();
        reversed.reverse();

        let a = merged(LoadedCollections {
            completed_exercises: rows,
            ..Default::default()
        });
        let b = merged(LoadedCollections {
            completed_exercises: reversed,
            ..Default::default()
        });

        assert_eq!(a, b);
        let order: Vec<&str> = a
            .completed_exercise_details()
            .iter()
            .map(|d| d.exercise_id.as_str())
            .collect();
        assert_eq!(order, vec!["ex1", "ex7", "ex3"]);
    }

    #[test]
    fn test_merge_keeps_newest_duplicate() {
        let snapshot = merged(LoadedCollections {
            saved_exercises: vec![
                saved("ex2", "2024-06-01T10:00:00Z"),
                saved("ex2", "2024-06-10T10:00:00Z"),
            ],
            ..Default::default()
        });

        assert_eq!(snapshot.saved_exercise_details().len(), 1);
        assert_eq!(
            snapshot.saved_exercise_details()[0].saved_at,
            ts("2024-06-10T10:00:00Z")
        );
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_empty_merge_uses_fallback_last_active() {
        let snapshot = merged(LoadedCollections::default());
        assert_eq!(snapshot.last_active(), ts("2024-01-01T00:00:00Z"));
        assert_eq!(snapshot.streak(), 0);
    }

    #[test]
    fn test_saved_links_do_not_move_last_active() {
        let collections = LoadedCollections {
            completed_exercises: vec![completed("ex1", "2024-06-19T10:00:00Z")],
            saved_exercises: vec![saved("ex2", "2024-06-20T10:00:00Z")],
            ..Default::default()
        };
        let merged_with_saved = merged(collections);
        assert_eq!(merged_with_saved.last_active(), ts("2024-06-19T10:00:00Z"));

        let mut incremental = merged(LoadedCollections {
            completed_exercises: vec![completed("ex1", "2024-06-19T10:00:00Z")],
            ..Default::default()
        });
        incremental.insert_saved(saved("ex2", "2024-06-20T10:00:00Z"));
        assert_eq!(incremental, merged_with_saved);
    }

    #[test]
    fn test_insert_completed_is_idempotent() {
        let mut snapshot = merged(LoadedCollections {
            completed_exercises: vec![
                completed("ex1", "2024-06-19T10:00:00Z"),
                completed("ex3", "2024-06-18T10:00:00Z"),
            ],
            ..Default::default()
        });

        assert!(!snapshot.insert_completed_exercise(completed("ex3", "2024-06-20T10:00:00Z"), today()));
        assert_eq!(snapshot.completed_exercise_ids().len(), 2);
        assert_eq!(snapshot.completed_exercise_details().len(), 2);

        assert!(snapshot.insert_completed_exercise(completed("ex7", "2024-06-20T10:00:00Z"), today()));
        assert_eq!(snapshot.completed_exercise_details()[0].exercise_id, "ex7");
        assert_eq!(snapshot.streak(), 3);
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_saved_insert_remove() {
        let mut snapshot = merged(LoadedCollections::default());

        assert!(snapshot.insert_saved(saved("ex2", "2024-06-20T10:00:00Z")));
        assert!(!snapshot.insert_saved(saved("ex2", "2024-06-20T11:00:00Z")));
        assert_eq!(snapshot.saved_exercise_details().len(), 1);

        assert!(snapshot.remove_saved("ex2"));
        assert!(!snapshot.remove_saved("ex2"));
        assert!(snapshot.saved_exercise_ids().is_empty());
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_restore_pre_image_exactly() {
        let mut snapshot = merged(LoadedCollections {
            completed_simulations: vec![simulation("sim1", "2024-06-10T10:00:00Z")],
            ..Default::default()
        });
        let before = snapshot.clone();

        let image = snapshot.capture(SnapshotField::CompletedSimulations);
        snapshot.insert_completed_simulation(simulation("sim2", "2024-06-20T10:00:00Z"), today());
        assert_ne!(snapshot, before);

        snapshot.restore(image);
        assert_eq!(snapshot, before);
    }

    #[test]
    fn test_set_content_patches_both_exercise_lists() {
        let mut snapshot = merged(LoadedCollections {
            completed_exercises: vec![completed("ex1", "2024-06-19T10:00:00Z")],
            saved_exercises: vec![saved("ex1", "2024-06-18T10:00:00Z")],
            ..Default::default()
        });

        snapshot.set_exercise_content(
            "ex1",
            ContentState::Quarantined {
                reason: "bad".to_string(),
            },
        );

        assert!(matches!(
            snapshot.completed_exercise_details()[0].content,
            ContentState::Quarantined { .. }
        ));
        assert!(matches!(
            snapshot.saved_exercise_details()[0].content,
            ContentState::Quarantined { .. }
        ));
    }
}
