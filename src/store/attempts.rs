// src/store/attempts.rs

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqlitePool, types::Json};

use crate::{
    error::AppError,
    models::attempt::{
        Attempt, AttemptKey, AttemptStatus, Finalization, FinalizeOutcome, NewAttempt,
        ProgressSnapshot,
    },
    store::{AttemptStore, is_unique_violation},
};

/// `simulado_attempts` table adapter.
#[derive(Clone)]
pub struct SqliteAttemptStore {
    pool: SqlitePool,
}

impl SqliteAttemptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptStore for SqliteAttemptStore {
    async fn get(&self, attempt_id: i64) -> Result<Option<Attempt>, AppError> {
        let attempt = sqlx::query_as::<_, Attempt>("SELECT * FROM simulado_attempts WHERE id = ?")
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(attempt)
    }

    async fn find_in_progress(&self, key: &AttemptKey) -> Result<Option<Attempt>, AppError> {
        let attempt = sqlx::query_as::<_, Attempt>(
            r#"
            SELECT * FROM simulado_attempts
            WHERE user_id = ? AND simulado_id = ? AND variation_index = ?
              AND status = 'in_progress'
            "#,
        )
        .bind(&key.user_id)
        .bind(key.simulado_id)
        .bind(key.variation_index)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempt)
    }

    async fn latest(&self, key: &AttemptKey) -> Result<Option<Attempt>, AppError> {
        let attempt = sqlx::query_as::<_, Attempt>(
            r#"
            SELECT * FROM simulado_attempts
            WHERE user_id = ? AND simulado_id = ? AND variation_index = ?
            ORDER BY started_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(&key.user_id)
        .bind(key.simulado_id)
        .bind(key.variation_index)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempt)
    }

    async fn resolve(&self, new: &NewAttempt) -> Result<Attempt, AppError> {
        if let Some(existing) = self.find_in_progress(&new.key).await? {
            return Ok(existing);
        }

        let inserted = sqlx::query_as::<_, Attempt>(
            r#"
            INSERT INTO simulado_attempts (
                user_id, simulado_id, variation_index, question_ids, answers,
                current_index, time_remaining_seconds, time_limit_seconds, status, started_at
            )
            VALUES (?, ?, ?, ?, '{}', 0, ?, ?, 'in_progress', ?)
            RETURNING *
            "#,
        )
        .bind(&new.key.user_id)
        .bind(new.key.simulado_id)
        .bind(new.key.variation_index)
        .bind(Json(&new.question_ids))
        .bind(new.time_limit_seconds)
        .bind(new.time_limit_seconds)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(attempt) => {
                tracing::info!(
                    "Allocated attempt {} for user {} (simulado {}, variation {})",
                    attempt.id,
                    attempt.user_id,
                    attempt.simulado_id,
                    attempt.variation_index
                );
                Ok(attempt)
            }
            // Lost the race against a concurrent resolve of the same triple
            Err(e) if is_unique_violation(&e) => {
                self.find_in_progress(&new.key).await?.ok_or_else(|| {
                    AppError::FinalizeConflict(
                        "In-progress attempt was finalized during resolve".to_string(),
                    )
                })
            }
            Err(e) => {
                tracing::error!("Failed to allocate attempt: {:?}", e);
                Err(e.into())
            }
        }
    }

    async fn save(&self, attempt_id: i64, snapshot: &ProgressSnapshot) -> Result<(), AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE simulado_attempts
            SET answers = ?, current_index = ?, time_remaining_seconds = ?
            WHERE id = ? AND status = 'in_progress'
            "#,
        )
        .bind(Json(&snapshot.answers))
        .bind(snapshot.current_index)
        .bind(snapshot.time_remaining_seconds)
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return match self.get(attempt_id).await? {
                None => Err(AppError::NotFound(format!("Attempt {} not found", attempt_id))),
                Some(_) => Err(AppError::AlreadyFinalized(format!(
                    "Attempt {} is already finalized",
                    attempt_id
                ))),
            };
        }

        Ok(())
    }

    async fn finalize(
        &self,
        attempt_id: i64,
        finalization: &Finalization,
    ) -> Result<FinalizeOutcome, AppError> {
        if finalization.status == AttemptStatus::InProgress {
            return Err(AppError::BadRequest(
                "Finalization requires a terminal status".to_string(),
            ));
        }

        let snapshot = &finalization.snapshot;
        let finalized = sqlx::query_as::<_, Attempt>(
            r#"
            UPDATE simulado_attempts
            SET status = ?, completed_at = ?,
                answers = ?, current_index = ?, time_remaining_seconds = ?
            WHERE id = ? AND status = 'in_progress'
            RETURNING *
            "#,
        )
        .bind(finalization.status)
        .bind(finalization.completed_at)
        .bind(Json(&snapshot.answers))
        .bind(snapshot.current_index)
        .bind(snapshot.time_remaining_seconds)
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;

        match finalized {
            Some(attempt) => Ok(FinalizeOutcome::Finalized(attempt)),
            None => match self.get(attempt_id).await? {
                Some(attempt) => Ok(FinalizeOutcome::AlreadyTerminal(attempt)),
                None => Err(AppError::NotFound(format!("Attempt {} not found", attempt_id))),
            },
        }
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        simulado_id: i64,
    ) -> Result<Vec<Attempt>, AppError> {
        let attempts = sqlx::query_as::<_, Attempt>(
            r#"
            SELECT * FROM simulado_attempts
            WHERE user_id = ? AND simulado_id = ?
            ORDER BY started_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .bind(simulado_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(attempts)
    }
}
