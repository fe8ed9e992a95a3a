// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Exercise and simulation content.
//!
//! Rows arrive with loosely typed JSON payloads (`question_data`,
//! `solution_data`). They are parsed and validated here, at the storage
//! boundary, into typed records. Rows that fail are quarantined rather than
//! trusted.

use crate::db::collections;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

// ─── Stored Rows ─────────────────────────────────────────────

/// Exercise row in the `exercises` collection, payloads untyped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExerciseRow {
    pub id: String,
    pub subject: String,
    pub topic: String,
    pub question_data: serde_json::Value,
    pub solution_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Simulation row in the `simulations` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub pdf_url: String,
    pub solution_pdf_url: String,
    #[serde(default)]
    pub text_content: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ─── Validated Content ───────────────────────────────────────

/// Exercise difficulty. Older rows use the Italian labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[serde(alias = "facile")]
    Easy,
    #[serde(alias = "media")]
    Medium,
    #[serde(alias = "difficile")]
    Hard,
}

/// Shape of a question, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    Open,
    MultipleChoice { options: Vec<String> },
    Numeric {
        #[serde(default)]
        unit: Option<String>,
    },
}

fn validate_kind(kind: &QuestionKind) -> Result<(), ValidationError> {
    match kind {
        QuestionKind::MultipleChoice { options } => {
            if options.len() < 2 {
                return Err(ValidationError::new("too_few_options"));
            }
            if options.iter().any(|o| o.trim().is_empty()) {
                return Err(ValidationError::new("empty_option"));
            }
            Ok(())
        }
        QuestionKind::Open | QuestionKind::Numeric { .. } => Ok(()),
    }
}

/// Parsed `question_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Question {
    #[validate(length(min = 1))]
    pub question: String,
    #[serde(flatten)]
    #[validate(custom(function = "validate_kind"))]
    pub kind: QuestionKind,
    pub difficulty: Difficulty,
}

/// Parsed `solution_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Solution {
    #[serde(default)]
    pub steps: Vec<String>,
    #[validate(length(min = 1))]
    pub final_answer: String,
}

/// An exercise whose payloads passed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exercise {
    pub id: String,
    pub subject: String,
    pub topic: String,
    pub question: Question,
    pub solution: Solution,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ExerciseRow> for Exercise {
    type Error = AppError;

    fn try_from(row: ExerciseRow) -> Result<Self, Self::Error> {
        let invalid = |reason: String| AppError::InvalidRecord {
            collection: collections::EXERCISES,
            id: row.id.clone(),
            reason,
        };

        let question: Question = serde_json::from_value(row.question_data.clone())
            .map_err(|e| invalid(format!("question_data: {}", e)))?;
        question
            .validate()
            .map_err(|e| invalid(format!("question_data: {}", e)))?;

        let solution: Solution = serde_json::from_value(row.solution_data.clone())
            .map_err(|e| invalid(format!("solution_data: {}", e)))?;
        solution
            .validate()
            .map_err(|e| invalid(format!("solution_data: {}", e)))?;

        Ok(Self {
            id: row.id,
            subject: row.subject,
            topic: row.topic,
            question,
            solution,
            created_at: row.created_at,
        })
    }
}

/// A simulation whose row passed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
pub struct Simulation {
    pub id: String,
    #[validate(length(min = 1))]
    pub title: String,
    pub description: String,
    #[validate(url)]
    pub pdf_url: String,
    #[validate(url)]
    pub solution_pdf_url: String,
    pub text_content: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SimulationRow> for Simulation {
    type Error = AppError;

    fn try_from(row: SimulationRow) -> Result<Self, Self::Error> {
        let simulation = Self {
            id: row.id,
            title: row.title,
            description: row.description,
            pdf_url: row.pdf_url,
            solution_pdf_url: row.solution_pdf_url,
            text_content: row.text_content,
            created_at: row.created_at,
        };

        simulation
            .validate()
            .map_err(|e| AppError::InvalidRecord {
                collection: collections::SIMULATIONS,
                id: simulation.id.clone(),
                reason: e.to_string(),
            })?;

        Ok(simulation)
    }
}

// ─── Denormalized Payload State ──────────────────────────────

/// Content attached to a progress event.
///
/// The event is kept even when its content cannot be shown, so the ID sets
/// stay the projection of the detail lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "content", rename_all = "snake_case")]
pub enum ContentState<T> {
    Available(T),
    /// Not resolved yet, or the content row no longer exists.
    Missing,
    Quarantined {
        reason: String,
    },
}

impl<T> ContentState<T> {
    /// Classify a raw content document from `collection`.
    ///
    /// `None` means the document does not exist. A document whose shape or
    /// payloads fail validation is quarantined instead of failing the caller.
    pub fn from_document<R>(
        collection: &'static str,
        id: &str,
        document: Option<serde_json::Value>,
    ) -> Self
    where
        R: DeserializeOwned,
        T: TryFrom<R, Error = AppError>,
    {
        let Some(mut document) = document else {
            return ContentState::Missing;
        };
        // Some documents only carry their id as the document key
        if let Some(fields) = document.as_object_mut() {
            fields
                .entry("id")
                .or_insert_with(|| serde_json::Value::from(id));
        }

        let parsed = serde_json::from_value::<R>(document)
            .map_err(|e| AppError::InvalidRecord {
                collection,
                id: id.to_string(),
                reason: format!("row: {}", e),
            })
            .and_then(T::try_from);

        match parsed {
            Ok(content) => ContentState::Available(content),
            Err(e) => {
                tracing::warn!(error = %e, "Quarantining malformed content row");
                ContentState::Quarantined {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ContentState::Available(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(question_data: serde_json::Value, solution_data: serde_json::Value) -> ExerciseRow {
        ExerciseRow {
            id: "ex1".to_string(),
            subject: "matematica".to_string(),
            topic: "limiti".to_string(),
            question_data,
            solution_data,
            created_at: "2024-01-15T10:00:00Z".parse().unwrap(),
        }
    }

    fn solution() -> serde_json::Value {
        json!({ "steps": ["Usa il limite notevole"], "final_answer": "3/5" })
    }

    #[test]
    fn test_open_question_with_italian_difficulty() {
        let exercise = Exercise::try_from(row(
            json!({ "question": "Calcola il limite", "type": "open", "difficulty": "media" }),
            solution(),
        ))
        .unwrap();

        assert_eq!(exercise.question.kind, QuestionKind::Open);
        assert_eq!(exercise.question.difficulty, Difficulty::Medium);
        assert_eq!(exercise.solution.final_answer, "3/5");
    }

    #[test]
    fn test_multiple_choice_requires_two_options() {
        let err = Exercise::try_from(row(
            json!({
                "question": "Quale?",
                "type": "multiple_choice",
                "options": ["solo una"],
                "difficulty": "easy"
            }),
            solution(),
        ))
        .unwrap_err();

        assert!(matches!(err, AppError::InvalidRecord { collection: "exercises", .. }));
    }

    #[test]
    fn test_unknown_question_type_rejected() {
        let result = Exercise::try_from(row(
            json!({ "question": "?", "type": "essay", "difficulty": "hard" }),
            solution(),
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_final_answer_rejected() {
        let result = Exercise::try_from(row(
            json!({ "question": "Calcola", "type": "numeric", "difficulty": "hard" }),
            json!({ "steps": [], "final_answer": "" }),
        ));
        assert!(result.is_err());
    }

    fn document(row: &ExerciseRow) -> Option<serde_json::Value> {
        Some(serde_json::to_value(row).unwrap())
    }

    #[test]
    fn test_content_state_quarantines_bad_payload() {
        let bad = row(json!("not an object"), solution());
        let state: ContentState<Exercise> =
            ContentState::from_document::<ExerciseRow>("exercises", "ex1", document(&bad));
        assert!(matches!(state, ContentState::Quarantined { .. }));

        let missing: ContentState<Exercise> =
            ContentState::from_document::<ExerciseRow>("exercises", "ex1", None);
        assert_eq!(missing, ContentState::Missing);
    }

    #[test]
    fn test_content_state_quarantines_bad_row_shape() {
        // No topic, and a created_at that is not a timestamp
        let doc = json!({
            "subject": "fisica",
            "question_data": { "question": "?", "type": "open", "difficulty": "easy" },
            "solution_data": solution(),
            "created_at": 1700000000
        });
        let state: ContentState<Exercise> =
            ContentState::from_document::<ExerciseRow>("exercises", "ex4", Some(doc));

        match state {
            ContentState::Quarantined { reason } => assert!(reason.contains("ex4"), "{}", reason),
            other => panic!("expected quarantine, got {:?}", other),
        }
    }

    #[test]
    fn test_document_key_fills_missing_id() {
        let mut doc = document(&row(
            json!({ "question": "Calcola", "type": "open", "difficulty": "easy" }),
            solution(),
        ))
        .unwrap();
        doc.as_object_mut().unwrap().remove("id");

        let state: ContentState<Exercise> =
            ContentState::from_document::<ExerciseRow>("exercises", "ex-key", Some(doc));
        match state {
            ContentState::Available(exercise) => assert_eq!(exercise.id, "ex-key"),
            other => panic!("expected available, got {:?}", other),
        }
    }

    #[test]
    fn test_simulation_requires_urls() {
        let row = SimulationRow {
            id: "sim1".to_string(),
            title: "Seconda Prova Matematica 2023".to_string(),
            description: "Prova ufficiale".to_string(),
            pdf_url: "not a url".to_string(),
            solution_pdf_url: "https://example.com/sol.pdf".to_string(),
            text_content: None,
            created_at: "2024-01-15T10:00:00Z".parse().unwrap(),
        };
        assert!(Simulation::try_from(row).is_err());
    }
}
