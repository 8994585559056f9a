//! Storage seams consumed by the study core
//!
//! The catalog, progress records, sessions, wrong-answer log and learner
//! preferences are owned by collaborators outside the core. `SqliteStore`
//! in `db.rs` implements all of them over one database.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::grader::GradeOutcome;
use crate::models::{
    MemoryState, Session, SessionStatus, StudyPreferences, VocabularyItem, WrongAnswerRecord,
};

/// How far afield distractor candidates may come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistractorScope {
    /// Shares the target's category, a tag, or part of speech
    Related,
    Any,
}

/// Read-only vocabulary catalog
pub trait Catalog {
    fn item(&self, item_id: i64) -> Result<Option<VocabularyItem>>;

    /// Items the user has no memory state for
    fn count_unseen(&self, user_id: &str) -> Result<u32>;

    /// Unseen item ids ordered by frequency rank, then id
    fn unseen_items(&self, user_id: &str, limit: u32) -> Result<Vec<i64>>;

    fn distractor_candidates(
        &self,
        target: &VocabularyItem,
        scope: DistractorScope,
        exclude: &[i64],
        limit: usize,
    ) -> Result<Vec<VocabularyItem>>;
}

/// Per-(user, item) memory records
pub trait ProgressStore {
    fn memory_state(&self, user_id: &str, item_id: i64) -> Result<Option<MemoryState>>;

    /// Compare-and-swap on `state.version`.
    ///
    /// Version 0 inserts; anything else updates the row only if its stored
    /// version still matches. Returns `false` on a lost race.
    fn save_memory_state(&self, state: &MemoryState) -> Result<bool>;

    fn count_due(&self, user_id: &str, now: DateTime<Utc>) -> Result<u32>;

    /// Due item ids, soonest first
    fn due_items(&self, user_id: &str, now: DateTime<Utc>, limit: u32) -> Result<Vec<i64>>;
}

pub trait SessionStore {
    fn insert_session(&self, session: &Session) -> Result<()>;

    fn session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Move the cursor from `expected` to `expected + 1` if the session is
    /// still active and nobody else moved it first
    fn advance_cursor(&self, session_id: &str, expected: usize) -> Result<bool>;

    /// Claim the (session, item) slot before grading. `false` if another
    /// submission already holds it, pending or finished.
    fn reserve_submission(&self, session_id: &str, item_id: i64) -> Result<bool>;

    /// Drop a pending reservation after grading failed
    fn release_submission(&self, session_id: &str, item_id: i64) -> Result<()>;

    /// Fill a reserved slot with its outcome and bump the matching counter,
    /// atomically. The outcome is always stored; returns `false` when the
    /// session was no longer active and the counters were left alone.
    fn record_submission(&self, session_id: &str, item_id: i64, outcome: &GradeOutcome) -> Result<bool>;

    /// Finished outcome for (session, item); pending reservations are `None`
    fn submission(&self, session_id: &str, item_id: i64) -> Result<Option<GradeOutcome>>;

    /// Leave `Active` for `status`; `false` if the session was not active
    fn close_session(&self, session_id: &str, status: SessionStatus, at: DateTime<Utc>) -> Result<bool>;
}

pub trait WrongAnswerLog {
    fn append_wrong_answer(&self, record: &WrongAnswerRecord) -> Result<i64>;

    fn wrong_answers(&self, user_id: &str, unreviewed_only: bool) -> Result<Vec<WrongAnswerRecord>>;

    fn mark_reviewed(&self, record_id: i64, at: DateTime<Utc>) -> Result<bool>;
}

pub trait PreferenceSource {
    fn preferences(&self, user_id: &str) -> Result<Option<StudyPreferences>>;
}

/// Everything the orchestrator needs from storage
pub trait Store: Catalog + ProgressStore + SessionStore + WrongAnswerLog + PreferenceSource {}

impl<T> Store for T where T: Catalog + ProgressStore + SessionStore + WrongAnswerLog + PreferenceSource {}
