// src/session/scoring.rs

use std::collections::HashMap;

use crate::models::question::Question;

/// Scored outcome of one answer set, before it becomes a stored result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreCard {
    pub score: u32,
    pub correct_count: u32,
    pub error_count: u32,
    pub total_questions: u32,
    pub time_spent_seconds: u32,
}

/// Scores an answer set against the question sequence.
///
/// * Strict string match against each question's answer key.
/// * Unanswered questions count as errors.
/// * Answers for questions outside the sequence are ignored.
/// * Score is the percentage of correct answers, rounded to the nearest integer.
pub fn score_attempt(
    questions: &[Question],
    answers: &HashMap<i64, String>,
    time_spent_seconds: u32,
) -> ScoreCard {
    let total = questions.len() as u32;
    let correct = questions
        .iter()
        .filter(|q| answers.get(&q.id).is_some_and(|choice| choice == &q.answer))
        .count() as u32;

    ScoreCard {
        score: percentage(correct, total),
        correct_count: correct,
        error_count: total - correct,
        total_questions: total,
        time_spent_seconds,
    }
}

/// `round(100 * correct / total)`, halves rounding up; 0 for an empty exam.
fn percentage(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let (correct, total) = (u64::from(correct), u64::from(total));
    ((200 * correct + total) / (2 * total)) as u32
}

/// Budget minus what is left, never negative.
pub fn time_spent(time_limit_seconds: u32, remaining_seconds: u32) -> u32 {
    time_limit_seconds.saturating_sub(remaining_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::types::Json;

    fn question(id: i64, answer: &str) -> Question {
        Question {
            id,
            content: format!("Question {}", id),
            options: Json(vec!["A".into(), "B".into(), "C".into(), "D".into()]),
            answer: answer.to_string(),
            analysis: None,
        }
    }

    fn answers(pairs: &[(i64, &str)]) -> HashMap<i64, String> {
        pairs.iter().map(|(id, c)| (*id, c.to_string())).collect()
    }

    #[test]
    fn test_unanswered_counts_as_error() {
        let questions = vec![question(1, "A"), question(2, "C"), question(3, "A")];
        let card = score_attempt(&questions, &answers(&[(1, "A"), (2, "B")]), 60);

        assert_eq!(card.correct_count, 1);
        assert_eq!(card.error_count, 2);
        assert_eq!(card.total_questions, 3);
        assert_eq!(card.score, 33);
        assert_eq!(card.time_spent_seconds, 60);
    }

    #[test]
    fn test_perfect_and_zero() {
        let questions = vec![question(1, "A"), question(2, "B")];
        assert_eq!(score_attempt(&questions, &answers(&[(1, "A"), (2, "B")]), 0).score, 100);
        assert_eq!(score_attempt(&questions, &HashMap::new(), 0).score, 0);
    }

    #[test]
    fn test_rounds_half_up() {
        // 2/3 = 66.67 -> 67, 1/8 = 12.5 -> 13
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(0, 0), 0);
    }

    #[test]
    fn test_foreign_answers_are_ignored() {
        let questions = vec![question(1, "A")];
        let card = score_attempt(&questions, &answers(&[(1, "A"), (99, "A")]), 0);
        assert_eq!(card.correct_count, 1);
        assert_eq!(card.total_questions, 1);
        assert_eq!(card.correct_count + card.error_count, card.total_questions);
    }

    #[test]
    fn test_time_spent_clamps() {
        assert_eq!(time_spent(600, 120), 480);
        assert_eq!(time_spent(600, 900), 0);
    }
}
