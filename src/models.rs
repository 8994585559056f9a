//! Data models for vocabulary items, memory state, sessions and answer logs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

pub const DEFAULT_CATEGORY: &str = "Default";

/// Media attached to an item by the media collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Media {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Vocabulary entry from the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyItem {
    pub id: i64,
    pub word: String,
    pub meaning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    /// Pre-authored cloze sentences containing a blank marker
    #[serde(default)]
    pub cloze_sentences: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_rank: Option<i64>,
    #[serde(default)]
    pub media: Media,
}

impl VocabularyItem {
    pub fn new(word: impl Into<String>, meaning: impl Into<String>) -> Self {
        Self {
            id: 0,
            word: word.into(),
            meaning: meaning.into(),
            part_of_speech: None,
            examples: Vec::new(),
            cloze_sentences: Vec::new(),
            tags: Vec::new(),
            category: DEFAULT_CATEGORY.to_string(),
            frequency_rank: None,
            media: Media::default(),
        }
    }
}

/// Learning phase of a user×item pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningState {
    New,
    Learning,
    Review,
    Relearning,
}

impl Default for LearningState {
    fn default() -> Self {
        Self::New
    }
}

impl LearningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningState::New => "new",
            LearningState::Learning => "learning",
            LearningState::Review => "review",
            LearningState::Relearning => "relearning",
        }
    }
}

impl FromStr for LearningState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(LearningState::New),
            "learning" => Ok(LearningState::Learning),
            "review" => Ok(LearningState::Review),
            "relearning" => Ok(LearningState::Relearning),
            other => Err(CoreError::InvalidState(format!(
                "unknown learning state '{}'",
                other
            ))),
        }
    }
}

/// Four-point feedback signal consumed by the memory model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Again,
    Hard,
    Good,
    Easy,
}

impl Rating {
    pub const ALL: [Rating; 4] = [Rating::Again, Rating::Hard, Rating::Good, Rating::Easy];

    pub(crate) fn index(self) -> usize {
        match self {
            Rating::Again => 0,
            Rating::Hard => 1,
            Rating::Good => 2,
            Rating::Easy => 3,
        }
    }
}

/// One entry of the append-only review log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewLogEntry {
    pub at: DateTime<Utc>,
    pub correct: bool,
    pub state_after: LearningState,
}

/// Spaced-repetition record for one user×item pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryState {
    pub user_id: String,
    pub item_id: i64,
    pub state: LearningState,
    /// Days until recall probability decays to the reference threshold
    pub stability: f64,
    /// Item-intrinsic hardness, 1.0-10.0
    pub difficulty: f64,
    pub due_at: DateTime<Utc>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub total_reviews: u32,
    pub correct_reviews: u32,
    pub lapses: u32,
    pub history: Vec<ReviewLogEntry>,
    /// Optimistic concurrency token; 0 means never persisted
    #[serde(default)]
    pub version: i64,
}

impl MemoryState {
    pub fn new(user_id: &str, item_id: i64, initial_difficulty: f64, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            item_id,
            state: LearningState::New,
            stability: 0.0,
            difficulty: initial_difficulty,
            due_at: now,
            last_reviewed_at: None,
            total_reviews: 0,
            correct_reviews: 0,
            lapses: 0,
            history: Vec::new(),
            version: 0,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.due_at
    }
}

/// Lifecycle status of a study session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "abandoned" => Ok(SessionStatus::Abandoned),
            other => Err(CoreError::InvalidState(format!(
                "unknown session status '{}'",
                other
            ))),
        }
    }
}

/// One bounded study run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    /// Item ids, fixed at creation
    pub queue: Vec<i64>,
    /// Index of the next unseen item
    pub cursor: usize,
    pub status: SessionStatus,
    pub correct_count: u32,
    pub wrong_count: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub new_cards_limit: u32,
    pub review_cards_limit: u32,
}

impl Session {
    pub fn new(
        user_id: &str,
        queue: Vec<i64>,
        new_cards_limit: u32,
        review_cards_limit: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            queue,
            cursor: 0,
            status: SessionStatus::Active,
            correct_count: 0,
            wrong_count: 0,
            started_at: now,
            completed_at: None,
            new_cards_limit,
            review_cards_limit,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.queue.len()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len().saturating_sub(self.cursor)
    }
}

/// Question presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizVariant {
    DirectRecall,
    ReverseRecall,
    ClozeDeletion,
    AudioRecall,
    ImageRecall,
}

impl Default for QuizVariant {
    fn default() -> Self {
        Self::DirectRecall
    }
}

impl QuizVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuizVariant::DirectRecall => "direct_recall",
            QuizVariant::ReverseRecall => "reverse_recall",
            QuizVariant::ClozeDeletion => "cloze_deletion",
            QuizVariant::AudioRecall => "audio_recall",
            QuizVariant::ImageRecall => "image_recall",
        }
    }

    /// The answer a card of this variant expects for `item`
    pub fn expected_answer<'a>(&self, item: &'a VocabularyItem) -> &'a str {
        match self {
            QuizVariant::DirectRecall => &item.meaning,
            _ => &item.word,
        }
    }
}

impl fmt::Display for QuizVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuizVariant {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct_recall" | "direct" => Ok(QuizVariant::DirectRecall),
            "reverse_recall" | "reverse" => Ok(QuizVariant::ReverseRecall),
            "cloze_deletion" | "cloze" => Ok(QuizVariant::ClozeDeletion),
            "audio_recall" | "audio" => Ok(QuizVariant::AudioRecall),
            "image_recall" | "image" => Ok(QuizVariant::ImageRecall),
            other => Err(CoreError::PreconditionFailed(format!(
                "unknown quiz variant '{}'",
                other
            ))),
        }
    }
}

/// Log entry for an incorrect or revealed answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrongAnswerRecord {
    pub id: i64,
    pub user_id: String,
    pub item_id: i64,
    pub session_id: String,
    pub submitted: String,
    pub expected: String,
    pub variant: QuizVariant,
    pub created_at: DateTime<Utc>,
    pub reviewed: bool,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Learner-chosen study settings owned by the preferences collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StudyPreferences {
    pub session_size: u32,
    pub review_ratio: f64,
}
