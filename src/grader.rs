//! Answer grading - scoring, rating derivation and progress updates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strsim::{jaro_winkler, levenshtein, normalized_levenshtein};

use crate::config::GradingConfig;
use crate::error::{CoreError, Result};
use crate::models::{
    LearningState, MemoryState, QuizVariant, Rating, ReviewLogEntry, VocabularyItem,
    WrongAnswerRecord,
};
use crate::scheduler::MemoryModel;
use crate::store::{ProgressStore, WrongAnswerLog};

/// Case-folded, whitespace-collapsed form used for comparisons
pub fn normalize_answer(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Scoring of a single answer, before anything is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub correct: bool,
    pub score: u32,
    pub rating: Rating,
}

/// What the learner gets back after submitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeOutcome {
    pub item_id: i64,
    pub correct: bool,
    pub revealed: bool,
    pub score: u32,
    pub rating: Rating,
    pub expected_answer: String,
    pub feedback: String,
    /// Similarity of the submission to the expected answer, 0.0-1.0
    pub similarity: f64,
    pub state_after: LearningState,
    pub due_at: DateTime<Utc>,
}

/// One answer as submitted
#[derive(Debug, Clone)]
pub struct AnswerSubmission<'a> {
    pub user_id: &'a str,
    pub session_id: &'a str,
    pub item: &'a VocabularyItem,
    pub answer: &'a str,
    pub hint_count: u32,
    pub revealed: bool,
    pub variant: QuizVariant,
}

#[derive(Debug, Clone)]
pub struct AnswerGrader {
    model: MemoryModel,
    config: GradingConfig,
    max_write_attempts: u32,
}

impl AnswerGrader {
    pub fn new(model: MemoryModel, config: GradingConfig, max_write_attempts: u32) -> Self {
        Self {
            model,
            config,
            max_write_attempts: max_write_attempts.max(1),
        }
    }

    pub fn model(&self) -> &MemoryModel {
        &self.model
    }

    /// Score an answer without touching storage.
    ///
    /// Either canonical form is accepted, since the direction the question
    /// was asked in is not known here.
    pub fn evaluate(&self, item: &VocabularyItem, answer: &str, hint_count: u32, revealed: bool) -> Evaluation {
        let submitted = normalize_answer(answer);
        let matched = !submitted.is_empty()
            && (submitted == normalize_answer(&item.word) || submitted == normalize_answer(&item.meaning));
        let correct = matched && !revealed;

        let score = if correct {
            self.config
                .points_per_correct
                .saturating_sub(self.config.hint_penalty.saturating_mul(hint_count))
        } else {
            0
        };

        let rating = match (correct, hint_count) {
            (false, _) => Rating::Again,
            (true, 0) => Rating::Good,
            (true, _) => Rating::Hard,
        };

        Evaluation {
            correct,
            score,
            rating,
        }
    }

    /// Grade, update the learner's memory state and log misses
    pub fn grade<S>(&self, store: &S, submission: &AnswerSubmission<'_>, now: DateTime<Utc>) -> Result<GradeOutcome>
    where
        S: ProgressStore + WrongAnswerLog + ?Sized,
    {
        let item = submission.item;
        let eval = self.evaluate(item, submission.answer, submission.hint_count, submission.revealed);
        let expected = submission.variant.expected_answer(item).to_string();

        let updated = self.apply(store, submission.user_id, item.id, eval, now)?;

        if !eval.correct {
            store.append_wrong_answer(&WrongAnswerRecord {
                id: 0,
                user_id: submission.user_id.to_string(),
                item_id: item.id,
                session_id: submission.session_id.to_string(),
                submitted: submission.answer.to_string(),
                expected: expected.clone(),
                variant: submission.variant,
                created_at: now,
                reviewed: false,
                reviewed_at: None,
            })?;
        }

        let (similarity, feedback) = self.feedback(submission, &eval, &expected);
        Ok(GradeOutcome {
            item_id: item.id,
            correct: eval.correct,
            revealed: submission.revealed,
            score: eval.score,
            rating: eval.rating,
            expected_answer: expected,
            feedback,
            similarity,
            state_after: updated.state,
            due_at: updated.due_at,
        })
    }

    /// Optimistic read-modify-write of the memory state
    fn apply<S>(&self, store: &S, user_id: &str, item_id: i64, eval: Evaluation, now: DateTime<Utc>) -> Result<MemoryState>
    where
        S: ProgressStore + ?Sized,
    {
        for attempt in 1..=self.max_write_attempts {
            let current = store
                .memory_state(user_id, item_id)?
                .unwrap_or_else(|| self.model.new_state(user_id, item_id, now));

            let mut next = self.model.advance(&current, eval.rating, now);
            next.total_reviews += 1;
            if eval.correct {
                next.correct_reviews += 1;
            } else if current.state == LearningState::Review {
                next.lapses += 1;
            }
            next.history.push(ReviewLogEntry {
                at: now,
                correct: eval.correct,
                state_after: next.state,
            });

            if store.save_memory_state(&next)? {
                next.version += 1;
                return Ok(next);
            }
            log::debug!(
                "Memory state for user {} item {} changed concurrently (attempt {})",
                user_id,
                item_id,
                attempt
            );
        }

        Err(CoreError::Conflict(format!(
            "memory state for item {} kept changing after {} attempts",
            item_id, self.max_write_attempts
        )))
    }

    fn feedback(&self, submission: &AnswerSubmission<'_>, eval: &Evaluation, expected: &str) -> (f64, String) {
        let input = normalize_answer(submission.answer);
        let target = normalize_answer(expected);

        if eval.correct {
            let msg = match submission.hint_count {
                0 => "Perfect! ✓".to_string(),
                1 => "Correct, with 1 hint ✓".to_string(),
                n => format!("Correct, with {} hints ✓", n),
            };
            return (1.0, msg);
        }

        // Weighted average (Jaro-Winkler is better for typos)
        let similarity = normalized_levenshtein(&input, &target) * 0.4 + jaro_winkler(&input, &target) * 0.6;

        let msg = if submission.revealed {
            format!("Answer revealed: '{}'", expected)
        } else if similarity >= self.config.near_miss_threshold {
            format!(
                "So close! ({}% match) Expected: '{}'",
                (similarity * 100.0) as i32,
                expected
            )
        } else if similarity >= 0.5 {
            format!(
                "Almost! {} characters off. Expected: '{}'",
                levenshtein(&input, &target),
                expected
            )
        } else {
            format!("Incorrect. Expected: '{}'", expected)
        };
        (similarity, msg)
    }
}
