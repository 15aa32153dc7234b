// src/models/attempt.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use validator::Validate;

use crate::models::question::PublicQuestion;

/// Lifecycle of an attempt. `Completed` and `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Abandoned,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }
}

/// Represents the 'simulado_attempts' table.
/// One user's run through one variation of one package.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub user_id: String,
    pub simulado_id: i64,
    pub variation_index: u32,

    /// Fixed at creation and never rewritten.
    pub question_ids: Json<Vec<i64>>,

    /// Key: Question ID, Value: selected choice.
    pub answers: Json<HashMap<i64, String>>,

    pub current_index: u32,
    pub time_remaining_seconds: u32,

    /// Budget the attempt started with; time spent is measured against it.
    pub time_limit_seconds: u32,

    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Attempt {
    pub fn key(&self) -> AttemptKey {
        AttemptKey {
            user_id: self.user_id.clone(),
            simulado_id: self.simulado_id,
            variation_index: self.variation_index,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            answers: self.answers.0.clone(),
            current_index: self.current_index,
            time_remaining_seconds: self.time_remaining_seconds,
            revision: 0,
        }
    }
}

/// The (user, package, variation) triple that identifies at most one
/// in-progress attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptKey {
    pub user_id: String,
    pub simulado_id: i64,
    pub variation_index: u32,
}

/// Parameters for allocating a fresh attempt.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub key: AttemptKey,
    pub question_ids: Vec<i64>,
    pub time_limit_seconds: u32,
}

/// The three mutable fields of an in-progress attempt, always sent whole.
/// Also the on-disk shape of the crash-recovery backup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub answers: HashMap<i64, String>,
    pub current_index: u32,
    pub time_remaining_seconds: u32,

    /// Session-local counter, bumped on every change. A higher revision is
    /// newer; it is never persisted in the attempt row.
    #[serde(default)]
    pub revision: u64,
}

/// Terminal transition request for `AttemptStore::finalize`.
#[derive(Debug, Clone)]
pub struct Finalization {
    pub status: AttemptStatus,
    pub completed_at: Option<DateTime<Utc>>,
    /// Last in-memory state, written together with the status flip.
    pub snapshot: ProgressSnapshot,
}

/// Outcome of a conditional terminal transition.
#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    /// This call performed the transition.
    Finalized(Attempt),
    /// Another writer got there first; carries the record as stored.
    AlreadyTerminal(Attempt),
}

/// Whether `open` may allocate a new attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Resume the in-progress attempt or allocate a new one.
    #[default]
    Start,
    /// Only resume; never allocate.
    Resume,
}

/// DTO for opening an attempt.
#[derive(Debug, Default, Deserialize)]
pub struct OpenAttemptRequest {
    #[serde(default)]
    pub mode: OpenMode,
}

/// DTO for recording an answer.
#[derive(Debug, Deserialize, Validate)]
pub struct AnswerRequest {
    pub question_id: i64,
    #[validate(length(min = 1, max = 20, message = "Choice must be between 1 and 20 characters."))]
    pub choice: String,
}

/// DTO for jumping to a question. Out-of-range indexes clamp.
#[derive(Debug, Deserialize)]
pub struct GoToRequest {
    pub index: i64,
}

/// DTO for finishing. `confirm` acknowledges unanswered questions.
#[derive(Debug, Default, Deserialize)]
pub struct FinishRequest {
    #[serde(default)]
    pub confirm: bool,
}

/// What the presentation layer renders for a live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub attempt_id: i64,
    pub simulado_id: i64,
    pub variation_index: u32,
    pub status: AttemptStatus,
    pub questions: Vec<PublicQuestion>,
    pub answers: HashMap<i64, String>,
    pub current_index: u32,
    pub time_remaining_seconds: u32,
    pub answered_count: usize,
}
