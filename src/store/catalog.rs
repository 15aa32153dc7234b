// src/store/catalog.rs

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::{
    error::AppError,
    models::{question::Question, simulado::Simulado},
    store::{QuestionSource, SimuladoCatalog},
};

/// Read-only view over `simulados`, `questions` and `simulado_questions`.
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SimuladoCatalog for SqliteCatalog {
    async fn simulado(&self, simulado_id: i64) -> Result<Option<Simulado>, AppError> {
        let simulado = sqlx::query_as::<_, Simulado>(
            "SELECT id, name, duration_minutes, variation_count FROM simulados WHERE id = ?",
        )
        .bind(simulado_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch simulado {}: {:?}", simulado_id, e);
            AppError::InternalServerError(e.to_string())
        })?;

        Ok(simulado)
    }
}

#[async_trait]
impl QuestionSource for SqliteCatalog {
    async fn questions_for(
        &self,
        simulado_id: i64,
        variation_index: u32,
    ) -> Result<Vec<Question>, AppError> {
        let questions = sqlx::query_as::<_, Question>(
            r#"
            SELECT q.id, q.content, q.options, q.answer, q.analysis
            FROM simulado_questions sq
            JOIN questions q ON q.id = sq.question_id
            WHERE sq.simulado_id = ? AND sq.variation_index = ?
            ORDER BY sq.position ASC
            "#,
        )
        .bind(simulado_id)
        .bind(variation_index)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch questions: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

        Ok(questions)
    }
}
