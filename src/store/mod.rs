// src/store/mod.rs

//! Boundary contracts of the attempt session and their SQLite adapters.

pub mod attempts;
pub mod catalog;
pub mod results;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::{
    error::AppError,
    models::{
        attempt::{Attempt, AttemptKey, Finalization, FinalizeOutcome, NewAttempt, ProgressSnapshot},
        question::Question,
        result::{NewResult, SimuladoResult},
        simulado::Simulado,
    },
};

pub use attempts::SqliteAttemptStore;
pub use catalog::SqliteCatalog;
pub use results::SqliteResultStore;

/// Durable record of exam attempts.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Fetch an attempt by id, whatever its status.
    async fn get(&self, attempt_id: i64) -> Result<Option<Attempt>, AppError>;

    /// The in-progress attempt for the triple, if any.
    async fn find_in_progress(&self, key: &AttemptKey) -> Result<Option<Attempt>, AppError>;

    /// Most recently started attempt for the triple, any status.
    async fn latest(&self, key: &AttemptKey) -> Result<Option<Attempt>, AppError>;

    /// Return the in-progress attempt for the triple or allocate one.
    /// Repeated and concurrent calls never create duplicates.
    async fn resolve(&self, new: &NewAttempt) -> Result<Attempt, AppError>;

    /// Replace answers, cursor and remaining time of an in-progress attempt.
    async fn save(&self, attempt_id: i64, snapshot: &ProgressSnapshot) -> Result<(), AppError>;

    /// Flip an in-progress attempt to a terminal status. Already-terminal
    /// attempts are left untouched and reported back.
    async fn finalize(
        &self,
        attempt_id: i64,
        finalization: &Finalization,
    ) -> Result<FinalizeOutcome, AppError>;

    /// All attempts of a user for one package, newest first.
    async fn list_for_user(&self, user_id: &str, simulado_id: i64)
    -> Result<Vec<Attempt>, AppError>;
}

/// Read-only question catalog.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Ordered, deterministic question set of one variation.
    async fn questions_for(
        &self,
        simulado_id: i64,
        variation_index: u32,
    ) -> Result<Vec<Question>, AppError>;
}

/// Read-only package catalog.
#[async_trait]
pub trait SimuladoCatalog: Send + Sync {
    async fn simulado(&self, simulado_id: i64) -> Result<Option<Simulado>, AppError>;
}

/// Write-once store of scored outcomes.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert the result of an attempt. A second insert for the same
    /// attempt returns the stored row instead.
    async fn insert(&self, result: &NewResult) -> Result<SimuladoResult, AppError>;

    async fn for_attempt(&self, attempt_id: i64) -> Result<Option<SimuladoResult>, AppError>;

    /// All results of a user, newest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SimuladoResult>, AppError>;
}

/// The collaborators a session needs, bundled for cheap cloning.
#[derive(Clone)]
pub struct Stores {
    pub attempts: Arc<dyn AttemptStore>,
    pub questions: Arc<dyn QuestionSource>,
    pub catalog: Arc<dyn SimuladoCatalog>,
    pub results: Arc<dyn ResultStore>,
}

impl Stores {
    pub fn sqlite(pool: SqlitePool) -> Self {
        let catalog = Arc::new(SqliteCatalog::new(pool.clone()));
        Stores {
            attempts: Arc::new(SqliteAttemptStore::new(pool.clone())),
            questions: catalog.clone(),
            catalog,
            results: Arc::new(SqliteResultStore::new(pool)),
        }
    }
}

/// True when the error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traits_are_object_safe() {
        fn _attempts(_: Box<dyn AttemptStore>) {}
        fn _questions(_: Box<dyn QuestionSource>) {}
        fn _catalog(_: Box<dyn SimuladoCatalog>) {}
        fn _results(_: Box<dyn ResultStore>) {}
    }
}
