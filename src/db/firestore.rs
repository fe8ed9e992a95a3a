// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides the `ProgressStore` operations for:
//! - Profiles (one document per learner)
//! - Completed exercises, saved exercises, completed simulations
//!   (one document per (learner, content) pair)
//! - Exercise and simulation content lookups

use crate::db::{collections, event_doc_id, ProgressStore};
use crate::error::{AppError, Result};
use crate::models::{CompletedExerciseRow, CompletedSimulationRow, Profile, SavedExerciseRow};
use async_trait::async_trait;
use firestore::errors::FirestoreError;
use firestore::FirestoreQueryDirection;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

/// Map a Firestore error, keeping the duplicate-create signal distinct.
fn db_error(e: FirestoreError) -> AppError {
    match e {
        FirestoreError::DataConflictError(conflict) => AppError::Conflict(conflict.to_string()),
        other => AppError::Database(other.to_string()),
    }
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self> {
        // The emulator rejects real credentials, so connect unauthenticated.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client.
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }
}

#[async_trait]
impl ProgressStore for FirestoreDb {
    // ─── Profile Operations ──────────────────────────────────────

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::PROFILES)
            .obj()
            .one(user_id)
            .await
            .map_err(db_error)
    }

    async fn create_profile(&self, profile: &Profile) -> Result<()> {
        let _: Profile = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::PROFILES)
            .document_id(&profile.id)
            .object(profile)
            .execute()
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn update_profile(&self, profile: &Profile) -> Result<()> {
        let _: Profile = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::PROFILES)
            .document_id(&profile.id)
            .object(profile)
            .execute()
            .await
            .map_err(db_error)?;
        Ok(())
    }

    // ─── Completed Exercise Operations ───────────────────────────

    async fn list_completed_exercises(&self, user_id: &str) -> Result<Vec<CompletedExerciseRow>> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::COMPLETED_EXERCISES)
            .filter(|q| q.for_all([q.field("user_id").eq(user_id)]))
            .order_by([("completed_at", FirestoreQueryDirection::Descending)])
            .obj()
            .query()
            .await
            .map_err(db_error)
    }

    async fn upsert_completed_exercise(&self, row: &CompletedExerciseRow) -> Result<()> {
        let _: CompletedExerciseRow = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::COMPLETED_EXERCISES)
            .document_id(event_doc_id(&row.user_id, &row.exercise_id))
            .object(row)
            .execute()
            .await
            .map_err(db_error)?;
        Ok(())
    }

    // ─── Saved Exercise Operations ───────────────────────────────

    async fn list_saved_exercises(&self, user_id: &str) -> Result<Vec<SavedExerciseRow>> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::SAVED_EXERCISES)
            .filter(|q| q.for_all([q.field("user_id").eq(user_id)]))
            .order_by([("created_at", FirestoreQueryDirection::Descending)])
            .obj()
            .query()
            .await
            .map_err(db_error)
    }

    async fn is_exercise_saved(&self, user_id: &str, exercise_id: &str) -> Result<bool> {
        let row: Option<SavedExerciseRow> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::SAVED_EXERCISES)
            .obj()
            .one(&event_doc_id(user_id, exercise_id))
            .await
            .map_err(db_error)?;
        Ok(row.is_some())
    }

    async fn insert_saved_exercise(&self, row: &SavedExerciseRow) -> Result<()> {
        let _: SavedExerciseRow = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::SAVED_EXERCISES)
            .document_id(event_doc_id(&row.user_id, &row.exercise_id))
            .object(row)
            .execute()
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn delete_saved_exercise(&self, user_id: &str, exercise_id: &str) -> Result<()> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::SAVED_EXERCISES)
            .document_id(event_doc_id(user_id, exercise_id))
            .execute()
            .await
            .map_err(db_error)?;
        Ok(())
    }

    // ─── Completed Simulation Operations ─────────────────────────

    async fn list_completed_simulations(
        &self,
        user_id: &str,
    ) -> Result<Vec<CompletedSimulationRow>> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::COMPLETED_SIMULATIONS)
            .filter(|q| q.for_all([q.field("user_id").eq(user_id)]))
            .order_by([("completed_at", FirestoreQueryDirection::Descending)])
            .obj()
            .query()
            .await
            .map_err(db_error)
    }

    async fn upsert_completed_simulation(&self, row: &CompletedSimulationRow) -> Result<()> {
        let _: CompletedSimulationRow = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::COMPLETED_SIMULATIONS)
            .document_id(event_doc_id(&row.user_id, &row.simulation_id))
            .object(row)
            .execute()
            .await
            .map_err(db_error)?;
        Ok(())
    }

    // ─── Content Lookups ─────────────────────────────────────────

    async fn get_exercise(&self, exercise_id: &str) -> Result<Option<serde_json::Value>> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::EXERCISES)
            .obj::<serde_json::Value>()
            .one(exercise_id)
            .await
            .map_err(db_error)
    }

    async fn get_simulation(&self, simulation_id: &str) -> Result<Option<serde_json::Value>> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::SIMULATIONS)
            .obj::<serde_json::Value>()
            .one(simulation_id)
            .await
            .map_err(db_error)
    }
}
