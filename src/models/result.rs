// src/models/result.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::attempt::Attempt;

/// Represents the 'simulado_results' table.
/// Written once when an attempt completes; `ranking_position` is filled by
/// an external aggregation.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct SimuladoResult {
    pub id: i64,
    pub user_id: String,
    pub simulado_id: i64,
    pub variation_index: u32,
    pub attempt_id: i64,
    pub score: u32,
    pub correct_count: u32,
    pub error_count: u32,
    pub total_questions: u32,
    pub time_spent_seconds: u32,
    pub ranking_position: Option<i64>,
    pub completed_at: DateTime<Utc>,
}

/// Insert payload for a result.
#[derive(Debug, Clone)]
pub struct NewResult {
    pub user_id: String,
    pub simulado_id: i64,
    pub variation_index: u32,
    pub attempt_id: i64,
    pub score: u32,
    pub correct_count: u32,
    pub error_count: u32,
    pub total_questions: u32,
    pub time_spent_seconds: u32,
    pub completed_at: DateTime<Utc>,
}

/// Status of one variation ("prova") of a package for a user.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProvaStatus {
    pub variation_index: u32,
    pub label: String,
    pub is_completed: bool,
    pub is_in_progress: bool,
    pub result: Option<SimuladoResult>,
    pub attempt: Option<Attempt>,
}

/// Aggregated statistics over a user's results.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_completed: usize,
    pub average_score: u32,
    pub best_ranking: Option<i64>,
}

impl UserStats {
    pub fn from_results(results: &[SimuladoResult]) -> Self {
        if results.is_empty() {
            return UserStats {
                total_completed: 0,
                average_score: 0,
                best_ranking: None,
            };
        }

        let sum: u64 = results.iter().map(|r| u64::from(r.score)).sum();
        let count = results.len() as u64;

        UserStats {
            total_completed: results.len(),
            average_score: ((2 * sum + count) / (2 * count)) as u32,
            best_ranking: results.iter().filter_map(|r| r.ranking_position).min(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(score: u32, ranking: Option<i64>) -> SimuladoResult {
        SimuladoResult {
            id: 1,
            user_id: "u".to_string(),
            simulado_id: 1,
            variation_index: 0,
            attempt_id: 1,
            score,
            correct_count: 0,
            error_count: 0,
            total_questions: 0,
            time_spent_seconds: 0,
            ranking_position: ranking,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_stats_empty() {
        let stats = UserStats::from_results(&[]);
        assert_eq!(stats.total_completed, 0);
        assert_eq!(stats.average_score, 0);
        assert_eq!(stats.best_ranking, None);
    }

    #[test]
    fn test_stats_average_rounds_and_best_ranking() {
        let results = vec![
            result_with(70, None),
            result_with(75, Some(12)),
            result_with(80, Some(4)),
            result_with(66, None),
        ];
        let stats = UserStats::from_results(&results);
        // (70 + 75 + 80 + 66) / 4 = 72.75
        assert_eq!(stats.total_completed, 4);
        assert_eq!(stats.average_score, 73);
        assert_eq!(stats.best_ranking, Some(4));
    }
}
