//! Configuration loaded from TOML
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! [session]
//! session_size = 30
//! review_ratio = 0.6
//!
//! [quiz]
//! option_count = 4
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::scheduler::SchedulerParams;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub session: SessionConfig,
    pub quiz: QuizConfig,
    pub grading: GradingConfig,
    pub scheduler: SchedulerParams,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Used by `start` when the caller omits a new-card limit
    pub default_new_limit: u32,
    /// Used by `start` when the caller omits a review limit
    pub default_review_limit: u32,
    pub max_new_limit: u32,
    pub max_review_limit: u32,
    /// Cards per session when limits are derived from a ratio
    pub session_size: u32,
    /// Target share of due reviews when limits are derived from a ratio
    pub review_ratio: f64,
    /// Upper bound accepted by `preview`
    pub max_total_cards: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_new_limit: 10,
            default_review_limit: 50,
            max_new_limit: 100,
            max_review_limit: 500,
            session_size: 20,
            review_ratio: 0.7,
            max_total_cards: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuizConfig {
    /// Options on a multiple-choice card, correct answer included
    pub option_count: usize,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self { option_count: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    pub points_per_correct: u32,
    pub hint_penalty: u32,
    /// Similarity at or above which a wrong answer gets "almost" feedback
    pub near_miss_threshold: f64,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            points_per_correct: 100,
            hint_penalty: 20,
            near_miss_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Attempts for an optimistic read-modify-write before giving up
    pub max_write_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: 5,
        }
    }
}

impl CoreConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        log::debug!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.session;
        if !(0.0..=1.0).contains(&s.review_ratio) {
            return Err(CoreError::Config(format!(
                "session.review_ratio must be within 0..=1, got {}",
                s.review_ratio
            )));
        }
        if s.session_size == 0 || s.max_total_cards == 0 {
            return Err(CoreError::Config(
                "session.session_size and session.max_total_cards must be positive".to_string(),
            ));
        }
        if s.default_new_limit > s.max_new_limit || s.default_review_limit > s.max_review_limit {
            return Err(CoreError::Config(
                "session default limits exceed their maxima".to_string(),
            ));
        }
        if self.quiz.option_count < 2 {
            return Err(CoreError::Config(
                "quiz.option_count must be at least 2".to_string(),
            ));
        }
        if self.storage.max_write_attempts == 0 {
            return Err(CoreError::Config(
                "storage.max_write_attempts must be at least 1".to_string(),
            ));
        }
        self.scheduler.validate()
    }
}
