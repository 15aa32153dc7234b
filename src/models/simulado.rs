// src/models/simulado.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::config::SimuladoSettings;

/// Represents the 'simulados' table: one mock-exam package.
/// Nullable columns fall back to the platform settings.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Simulado {
    pub id: i64,
    pub name: String,
    pub duration_minutes: Option<u32>,
    pub variation_count: Option<u32>,
}

impl Simulado {
    /// Time budget in seconds for a fresh attempt.
    pub fn time_limit_seconds(&self, settings: &SimuladoSettings) -> u32 {
        self.duration_minutes
            .unwrap_or(settings.time_limit_minutes)
            .saturating_mul(60)
    }

    pub fn variations(&self, settings: &SimuladoSettings) -> u32 {
        self.variation_count.unwrap_or(settings.variations)
    }
}
