// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod content;
pub mod credits;
pub mod progress;
pub mod user;

pub use content::{ContentState, Exercise, ExerciseRow, Simulation, SimulationRow};
pub use credits::AiCredits;
pub use progress::{
    CompletedExercise, CompletedExerciseRow, CompletedSimulation, CompletedSimulationRow,
    ExerciseAttempt, LoadedCollections, ProgressSnapshot, SavedExercise, SavedExerciseRow,
    SimulationAttempt,
};
pub use user::{Identity, Profile, ProfileUpdate, SubscriptionTier};
