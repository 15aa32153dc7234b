// src/store/results.rs

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::{
    error::AppError,
    models::result::{NewResult, SimuladoResult},
    store::{ResultStore, is_unique_violation},
};

/// `simulado_results` table adapter.
#[derive(Clone)]
pub struct SqliteResultStore {
    pool: SqlitePool,
}

impl SqliteResultStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn insert(&self, result: &NewResult) -> Result<SimuladoResult, AppError> {
        let inserted = sqlx::query_as::<_, SimuladoResult>(
            r#"
            INSERT INTO simulado_results (
                user_id, simulado_id, variation_index, attempt_id, score,
                correct_count, error_count, total_questions, time_spent_seconds, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&result.user_id)
        .bind(result.simulado_id)
        .bind(result.variation_index)
        .bind(result.attempt_id)
        .bind(result.score)
        .bind(result.correct_count)
        .bind(result.error_count)
        .bind(result.total_questions)
        .bind(result.time_spent_seconds)
        .bind(result.completed_at)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(row),
            Err(e) if is_unique_violation(&e) => {
                self.for_attempt(result.attempt_id).await?.ok_or_else(|| {
                    AppError::FinalizeConflict(format!(
                        "Result for attempt {} vanished after a concurrent insert",
                        result.attempt_id
                    ))
                })
            }
            Err(e) => {
                tracing::error!("Failed to insert result: {:?}", e);
                Err(e.into())
            }
        }
    }

    async fn for_attempt(&self, attempt_id: i64) -> Result<Option<SimuladoResult>, AppError> {
        let result = sqlx::query_as::<_, SimuladoResult>(
            "SELECT * FROM simulado_results WHERE attempt_id = ?",
        )
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SimuladoResult>, AppError> {
        let results = sqlx::query_as::<_, SimuladoResult>(
            r#"
            SELECT * FROM simulado_results
            WHERE user_id = ?
            ORDER BY completed_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch results: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

        Ok(results)
    }
}
