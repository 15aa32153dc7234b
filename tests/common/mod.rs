// tests/common/mod.rs

#![allow(dead_code)]

use simulado::config::SimuladoSettings;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::time::Duration;
use tempfile::TempDir;

/// Fresh in-memory database with the schema applied.
///
/// A single connection that never expires keeps the in-memory database
/// alive for the whole test.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    pool
}

/// Settings with backups in a throwaway directory and no autosave.
pub fn test_settings() -> (SimuladoSettings, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let settings = SimuladoSettings {
        time_limit_minutes: 180,
        variations: 3,
        autosave_interval: Duration::ZERO,
        exit_save_timeout: Duration::from_millis(500),
        backup_dir: dir.path().to_path_buf(),
    };
    (settings, dir)
}

pub fn new_user() -> String {
    format!("user_{}", &uuid::Uuid::new_v4().to_string()[..8])
}

/// Inserts a package. `None` columns fall back to the configured defaults.
pub async fn seed_simulado(
    pool: &SqlitePool,
    name: &str,
    duration_minutes: Option<u32>,
    variation_count: Option<u32>,
) -> i64 {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO simulados (name, duration_minutes, variation_count) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(duration_minutes)
    .bind(variation_count)
    .fetch_one(pool)
    .await
    .expect("Failed to insert simulado");
    id
}

/// Inserts the questions of one variation in order. Each entry is
/// `(question id, correct choice)`.
pub async fn seed_variation(
    pool: &SqlitePool,
    simulado_id: i64,
    variation_index: u32,
    questions: &[(i64, &str)],
) {
    for (position, (id, answer)) in questions.iter().enumerate() {
        sqlx::query(
            "INSERT INTO questions (id, content, options, answer) VALUES (?, ?, ?, ?)",
        )
        .bind(*id)
        .bind(format!("Question {}", id))
        .bind(r#"["A","B","C","D"]"#)
        .bind(*answer)
        .execute(pool)
        .await
        .expect("Failed to insert question");

        sqlx::query(
            "INSERT INTO simulado_questions (simulado_id, variation_index, position, question_id) VALUES (?, ?, ?, ?)",
        )
        .bind(simulado_id)
        .bind(variation_index)
        .bind(position as i64)
        .bind(*id)
        .execute(pool)
        .await
        .expect("Failed to link question");
    }
}

/// A one-minute package whose first variation holds questions 1, 2, 3
/// with keys A, C, A.
pub async fn seed_basic(pool: &SqlitePool) -> i64 {
    let simulado_id = seed_simulado(pool, "ENEM 2024", Some(1), Some(2)).await;
    seed_variation(pool, simulado_id, 0, &[(1, "A"), (2, "C"), (3, "A")]).await;
    seed_variation(pool, simulado_id, 1, &[(4, "B"), (5, "D")]).await;
    simulado_id
}
