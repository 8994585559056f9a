//! LexIQ Core - spaced-repetition scheduling and study sessions for a vocabulary trainer
//!
//! Provides the memory model, card allocation, quiz formatting, answer grading
//! and session orchestration, plus a SQLite-backed store and catalog import.

pub mod allocator;
pub mod config;
pub mod db;
pub mod error;
pub mod grader;
pub mod import;
pub mod models;
pub mod quiz;
pub mod scheduler;
pub mod session;
pub mod store;

#[cfg(feature = "python")]
mod python;

pub use allocator::{allocate, Allocation, AllocationRequest, Availability};
pub use config::CoreConfig;
pub use db::SqliteStore;
pub use error::{CoreError, Result};
pub use grader::{normalize_answer, AnswerGrader, GradeOutcome};
pub use models::{
    LearningState, MemoryState, QuizVariant, Rating, Session, SessionStatus, StudyPreferences,
    VocabularyItem, WrongAnswerRecord,
};
pub use quiz::{ClozeSource, QuizCard, QuizFormatter};
pub use scheduler::{MemoryModel, SchedulerParams};
pub use session::{
    Clock, LogEvents, ManualClock, NextCard, SessionCompleted, SessionEvents,
    SessionOrchestrator, SessionPreview, SessionSummary, StartRequest, StartedSession,
    SubmitRequest, SystemClock,
};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// LexIQ Core Python Module
#[cfg(feature = "python")]
#[pymodule]
fn lexiq_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::StudyEngine>()?;
    Ok(())
}
