// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::Utc;
use maturamate::config::Config;
use maturamate::db::{FirestoreDb, MemoryDb};
use maturamate::models::{ExerciseRow, Identity, SimulationRow, SubscriptionTier};
use maturamate::routes::create_router;
use maturamate::services::{ProgressSession, SessionResolver, SessionStatus, StaticAuth};
use maturamate::AppState;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[allow(dead_code)]
pub const TEST_EMAIL: &str = "giulia@example.com";
#[allow(dead_code)]
pub const TEST_PASSWORD: &str = "maturita2026";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Unique user ID for test isolation against a shared emulator.
#[allow(dead_code)]
pub fn unique_user_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("user-{}", nanos)
}

#[allow(dead_code)]
pub fn test_identity(id: &str, tier: SubscriptionTier) -> Identity {
    Identity {
        id: id.to_string(),
        email: TEST_EMAIL.to_string(),
        display_name: "Giulia".to_string(),
        tier,
    }
}

/// A well-formed exercise row.
#[allow(dead_code)]
pub fn exercise_row(id: &str) -> ExerciseRow {
    ExerciseRow {
        id: id.to_string(),
        subject: "matematica".to_string(),
        topic: "integrali".to_string(),
        question_data: json!({
            "question": "Calcola l'integrale di 2x",
            "type": "multiple_choice",
            "options": ["x^2 + c", "2x^2 + c", "x + c"],
            "difficulty": "media"
        }),
        solution_data: json!({ "steps": ["Regola della potenza"], "final_answer": "x^2 + c" }),
        created_at: Utc::now(),
    }
}

/// An exercise row whose question payload fails validation.
#[allow(dead_code)]
pub fn malformed_exercise_row(id: &str) -> ExerciseRow {
    ExerciseRow {
        question_data: json!({ "question": "", "type": "essay" }),
        ..exercise_row(id)
    }
}

#[allow(dead_code)]
pub fn simulation_row(id: &str) -> SimulationRow {
    SimulationRow {
        id: id.to_string(),
        title: "Simulazione seconda prova 2025".to_string(),
        description: "Prova completa di matematica".to_string(),
        pdf_url: "https://cdn.example.com/sim/2025.pdf".to_string(),
        solution_pdf_url: "https://cdn.example.com/sim/2025-sol.pdf".to_string(),
        text_content: None,
        created_at: Utc::now(),
    }
}

/// Block until `session` publishes `status`, failing after a few seconds.
#[allow(dead_code)]
pub async fn wait_for_status(session: &ProgressSession, status: SessionStatus) {
    tokio::time::timeout(Duration::from_secs(5), session.wait_for(|s| *s == status))
        .await
        .unwrap_or_else(|_| panic!("session never reached {:?}", status));
}

/// Test app backed by in-process collaborators.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub db: Arc<MemoryDb>,
    pub auth: Arc<StaticAuth>,
}

/// Create a test app with one learner account of the given tier.
#[allow(dead_code)]
pub async fn create_test_app(tier: SubscriptionTier) -> TestApp {
    let mut config = Config::test_default();
    config.ai_daily_credits = 3;

    let db = Arc::new(MemoryDb::new());
    let auth = Arc::new(
        StaticAuth::new(&config.jwt_signing_key).with_account(
            TEST_EMAIL,
            TEST_PASSWORD,
            test_identity("u1", tier),
        ),
    );

    let session = Arc::new(ProgressSession::new(db.clone(), config.ai_daily_credits));
    let resolver = SessionResolver::start(auth.clone(), session.clone()).await;

    let state = Arc::new(AppState {
        config,
        session,
        resolver,
    });

    TestApp {
        router: create_router(state.clone()),
        state,
        db,
        auth,
    }
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
