//! Study-session orchestration: preview, start, card/answer loop, close
//!
//! A session is `Active` from `start` until `complete` or `abandon`; no
//! other transition exists. Every public operation validates ownership and
//! lifecycle state up front, and reports failures through the `log` facade
//! at a severity that separates expected conditions from client faults.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::allocator::{allocate, Allocation, AllocationRequest, Availability};
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::grader::{AnswerGrader, AnswerSubmission, GradeOutcome};
use crate::models::{QuizVariant, Session, SessionStatus, StudyPreferences, WrongAnswerRecord};
use crate::quiz::{QuizCard, QuizFormatter};
use crate::scheduler::MemoryModel;
use crate::store::Store;

// ==================== Collaborator seams ====================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Emitted once when a session completes; streaks, XP and daily goals are
/// computed by the progress-aggregation collaborator listening here
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCompleted {
    pub user_id: String,
    pub summary: SessionSummary,
}

pub trait SessionEvents: Send + Sync {
    fn session_completed(&self, event: &SessionCompleted);
}

impl<E: SessionEvents + ?Sized> SessionEvents for std::sync::Arc<E> {
    fn session_completed(&self, event: &SessionCompleted) {
        (**self).session_completed(event)
    }
}

/// Default sink: just log the event
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvents;

impl SessionEvents for LogEvents {
    fn session_completed(&self, event: &SessionCompleted) {
        log::info!(
            "Session {} completed for user {}: {}/{} correct",
            event.summary.session_id,
            event.user_id,
            event.summary.correct_count,
            event.summary.correct_count + event.summary.wrong_count
        );
    }
}

// ==================== Requests and responses ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPreview {
    pub available: Availability,
    pub allocation: Allocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub new_limit: Option<u32>,
    pub review_limit: Option<u32>,
    /// Derive both limits from the learner's preferred size and ratio
    #[serde(default)]
    pub use_derived_ratio: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedSession {
    pub session: Session,
    pub new_count: usize,
    pub review_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NextCard {
    Card {
        card: QuizCard,
        /// 1-based position of this card in the queue
        position: usize,
        remaining: usize,
        total: usize,
    },
    Exhausted {
        total: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub item_id: i64,
    pub answer: String,
    #[serde(default)]
    pub hint_count: u32,
    #[serde(default)]
    pub revealed: bool,
    /// Variant the card was shown as; used for the expected answer in logs
    #[serde(default)]
    pub variant: Option<QuizVariant>,
}

impl SubmitRequest {
    pub fn new(item_id: i64, answer: impl Into<String>) -> Self {
        Self {
            item_id,
            answer: answer.into(),
            hint_count: 0,
            revealed: false,
            variant: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub total_cards: usize,
    pub cards_seen: usize,
    pub correct_count: u32,
    pub wrong_count: u32,
    pub accuracy_percent: f64,
    pub duration_seconds: u64,
}

impl SessionSummary {
    fn from_session(session: &Session, duration_seconds: Option<u64>, now: DateTime<Utc>) -> Self {
        let answered = session.correct_count + session.wrong_count;
        let accuracy = if answered > 0 {
            (session.correct_count as f64 / answered as f64) * 100.0
        } else {
            0.0
        };
        let end = session.completed_at.unwrap_or(now);
        Self {
            session_id: session.id.clone(),
            status: session.status,
            total_cards: session.queue.len(),
            cards_seen: session.cursor,
            correct_count: session.correct_count,
            wrong_count: session.wrong_count,
            accuracy_percent: accuracy,
            duration_seconds: duration_seconds
                .unwrap_or_else(|| (end - session.started_at).num_seconds().max(0) as u64),
        }
    }
}

// ==================== Orchestrator ====================

pub struct SessionOrchestrator<S: Store> {
    store: S,
    config: CoreConfig,
    formatter: QuizFormatter,
    grader: AnswerGrader,
    rng: Mutex<StdRng>,
    clock: Box<dyn Clock>,
    events: Box<dyn SessionEvents>,
}

impl<S: Store> SessionOrchestrator<S> {
    pub fn new(store: S, config: CoreConfig) -> Result<Self> {
        config.validate()?;
        let model = MemoryModel::new(config.scheduler.clone());
        Ok(Self {
            formatter: QuizFormatter::new(config.quiz.option_count),
            grader: AnswerGrader::new(model, config.grading.clone(), config.storage.max_write_attempts),
            store,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
            clock: Box::new(SystemClock),
            events: Box::new(LogEvents),
        })
    }

    /// Reproducible queue and option shuffling
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_events(mut self, events: impl SessionEvents + 'static) -> Self {
        self.events = Box::new(events);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Dry-run allocation; never writes
    pub fn preview(&self, user_id: &str, total_cards: u32, review_ratio: f64) -> Result<SessionPreview> {
        let result = self.preview_inner(user_id, total_cards, review_ratio);
        report("preview", result)
    }

    pub fn start(&self, user_id: &str, request: &StartRequest) -> Result<StartedSession> {
        let result = self.start_inner(user_id, request);
        report("start", result)
    }

    pub fn next_card(&self, user_id: &str, session_id: &str, variant: QuizVariant) -> Result<NextCard> {
        let result = self.next_card_inner(user_id, session_id, variant);
        report("next_card", result)
    }

    pub fn submit_answer(&self, user_id: &str, session_id: &str, request: &SubmitRequest) -> Result<GradeOutcome> {
        let result = self.submit_answer_inner(user_id, session_id, request);
        report("submit_answer", result)
    }

    pub fn complete(&self, user_id: &str, session_id: &str, duration_seconds: Option<u64>) -> Result<SessionSummary> {
        let result = self.close(user_id, session_id, SessionStatus::Completed, duration_seconds);
        report("complete", result)
    }

    /// Close early; answers already graded keep their effect
    pub fn abandon(&self, user_id: &str, session_id: &str) -> Result<SessionSummary> {
        let result = self.close(user_id, session_id, SessionStatus::Abandoned, None);
        report("abandon", result)
    }

    pub fn session(&self, user_id: &str, session_id: &str) -> Result<Session> {
        report("session", self.load_owned(user_id, session_id))
    }

    pub fn wrong_answers(&self, user_id: &str, unreviewed_only: bool) -> Result<Vec<WrongAnswerRecord>> {
        report("wrong_answers", self.store.wrong_answers(user_id, unreviewed_only))
    }

    pub fn mark_wrong_answer_reviewed(&self, user_id: &str, record_id: i64) -> Result<()> {
        let result = (|| {
            let owned = self
                .store
                .wrong_answers(user_id, false)?
                .iter()
                .any(|r| r.id == record_id);
            if !owned {
                return Err(CoreError::NotFound(format!("wrong answer {}", record_id)));
            }
            self.store.mark_reviewed(record_id, self.clock.now())?;
            Ok(())
        })();
        report("mark_wrong_answer_reviewed", result)
    }

    // ---------- internals ----------

    fn availability(&self, user_id: &str, now: DateTime<Utc>) -> Result<Availability> {
        Ok(Availability {
            new_count: self.store.count_unseen(user_id)?,
            due_review_count: self.store.count_due(user_id, now)?,
        })
    }

    fn preview_inner(&self, user_id: &str, total_cards: u32, review_ratio: f64) -> Result<SessionPreview> {
        let max = self.config.session.max_total_cards;
        if total_cards == 0 || total_cards > max {
            return Err(CoreError::PreconditionFailed(format!(
                "total_cards must be between 1 and {}, got {}",
                max, total_cards
            )));
        }
        if !(0.0..=1.0).contains(&review_ratio) {
            return Err(CoreError::PreconditionFailed(format!(
                "review_ratio must be between 0 and 1, got {}",
                review_ratio
            )));
        }

        let available = self.availability(user_id, self.clock.now())?;
        let allocation = allocate(
            available,
            AllocationRequest {
                total_cards,
                review_ratio,
            },
        );
        Ok(SessionPreview {
            available,
            allocation,
            message: allocation.shortage_message(total_cards),
        })
    }

    /// (new, review) caps for a new session
    fn resolve_limits(&self, user_id: &str, request: &StartRequest, now: DateTime<Utc>) -> Result<(u32, u32)> {
        let cfg = &self.config.session;
        if !request.use_derived_ratio {
            return Ok((
                request.new_limit.unwrap_or(cfg.default_new_limit).min(cfg.max_new_limit),
                request
                    .review_limit
                    .unwrap_or(cfg.default_review_limit)
                    .min(cfg.max_review_limit),
            ));
        }

        let prefs = self.store.preferences(user_id)?.unwrap_or(StudyPreferences {
            session_size: cfg.session_size,
            review_ratio: cfg.review_ratio,
        });
        let review_ratio = if prefs.review_ratio.is_finite() {
            prefs.review_ratio.clamp(0.0, 1.0)
        } else {
            cfg.review_ratio
        };
        let allocation = allocate(
            self.availability(user_id, now)?,
            AllocationRequest {
                total_cards: prefs.session_size.clamp(1, cfg.max_total_cards),
                review_ratio,
            },
        );
        Ok((
            allocation.new_count.min(cfg.max_new_limit),
            allocation.review_count.min(cfg.max_review_limit),
        ))
    }

    fn start_inner(&self, user_id: &str, request: &StartRequest) -> Result<StartedSession> {
        let now = self.clock.now();
        let (new_limit, review_limit) = self.resolve_limits(user_id, request, now)?;

        let new_ids = if new_limit > 0 {
            self.store.unseen_items(user_id, new_limit)?
        } else {
            Vec::new()
        };
        let review_ids = if review_limit > 0 {
            self.store.due_items(user_id, now, review_limit)?
        } else {
            Vec::new()
        };

        if new_ids.is_empty() && review_ids.is_empty() {
            return Err(CoreError::Unavailable(
                "No new words or due reviews are available right now".to_string(),
            ));
        }

        let (new_count, review_count) = (new_ids.len(), review_ids.len());
        let mut queue = new_ids;
        queue.extend(review_ids);
        queue.shuffle(&mut *self.rng.lock());

        let session = Session::new(user_id, queue, new_limit, review_limit, now);
        self.store.insert_session(&session)?;
        log::info!(
            "Started session {} for user {} ({} new, {} review)",
            session.id,
            user_id,
            new_count,
            review_count
        );

        Ok(StartedSession {
            session,
            new_count,
            review_count,
        })
    }

    fn load_owned(&self, user_id: &str, session_id: &str) -> Result<Session> {
        let session = self
            .store
            .session(session_id)?
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;
        if session.user_id != user_id {
            return Err(CoreError::InvalidState(format!(
                "session {} does not belong to user {}",
                session_id, user_id
            )));
        }
        Ok(session)
    }

    fn load_active(&self, user_id: &str, session_id: &str) -> Result<Session> {
        let session = self.load_owned(user_id, session_id)?;
        if session.status != SessionStatus::Active {
            return Err(CoreError::InvalidState(format!(
                "session {} is {}",
                session_id,
                session.status.as_str()
            )));
        }
        Ok(session)
    }

    fn next_card_inner(&self, user_id: &str, session_id: &str, variant: QuizVariant) -> Result<NextCard> {
        let attempts = self.config.storage.max_write_attempts;
        for _ in 0..attempts {
            let session = self.load_active(user_id, session_id)?;
            let total = session.queue.len();
            if session.is_exhausted() {
                return Ok(NextCard::Exhausted { total });
            }

            let cursor = session.cursor;
            let item_id = session.queue[cursor];
            let item = self.store.item(item_id)?.ok_or_else(|| {
                CoreError::NotFound(format!("item {} queued in session {}", item_id, session_id))
            })?;
            let is_new = self.store.memory_state(user_id, item_id)?.is_none();
            let card = {
                let mut rng = self.rng.lock();
                self.formatter.format(&self.store, &item, variant, is_new, &mut *rng)?
            };

            if self.store.advance_cursor(session_id, cursor)? {
                return Ok(NextCard::Card {
                    card,
                    position: cursor + 1,
                    remaining: session.remaining() - 1,
                    total,
                });
            }
            log::debug!("Cursor of session {} moved concurrently, retrying", session_id);
        }

        Err(CoreError::Conflict(format!(
            "cursor of session {} kept moving after {} attempts",
            session_id, attempts
        )))
    }

    fn submit_answer_inner(&self, user_id: &str, session_id: &str, request: &SubmitRequest) -> Result<GradeOutcome> {
        let session = self.load_active(user_id, session_id)?;
        let item_id = request.item_id;
        // Answers may arrive ahead of the cursor; only items outside the queue are refused
        if !session.queue.contains(&item_id) {
            return Err(CoreError::InvalidState(format!(
                "item {} is not part of session {}",
                item_id, session_id
            )));
        }

        if let Some(previous) = self.store.submission(session_id, item_id)? {
            log::debug!(
                "Replaying stored result for item {} in session {}",
                item_id,
                session_id
            );
            return Ok(previous);
        }

        if !self.store.reserve_submission(session_id, item_id)? {
            if let Some(previous) = self.store.submission(session_id, item_id)? {
                return Ok(previous);
            }
            return Err(CoreError::Conflict(format!(
                "item {} in session {} is already being graded",
                item_id, session_id
            )));
        }

        let outcome = match self.grade_reserved(user_id, session_id, request) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.store.release_submission(session_id, item_id)?;
                return Err(e);
            }
        };

        if !self.store.record_submission(session_id, item_id, &outcome)? {
            log::warn!(
                "Session {} closed while grading item {}; progress kept, counts unchanged",
                session_id,
                item_id
            );
        }
        Ok(outcome)
    }

    fn grade_reserved(&self, user_id: &str, session_id: &str, request: &SubmitRequest) -> Result<GradeOutcome> {
        let item = self
            .store
            .item(request.item_id)?
            .ok_or_else(|| CoreError::NotFound(format!("item {}", request.item_id)))?;

        self.grader.grade(
            &self.store,
            &AnswerSubmission {
                user_id,
                session_id,
                item: &item,
                answer: &request.answer,
                hint_count: request.hint_count,
                revealed: request.revealed,
                variant: request.variant.unwrap_or_default(),
            },
            self.clock.now(),
        )
    }

    fn close(
        &self,
        user_id: &str,
        session_id: &str,
        status: SessionStatus,
        duration_seconds: Option<u64>,
    ) -> Result<SessionSummary> {
        self.load_active(user_id, session_id)?;

        let now = self.clock.now();
        if !self.store.close_session(session_id, status, now)? {
            return Err(CoreError::InvalidState(format!(
                "session {} is no longer active",
                session_id
            )));
        }

        let session = self
            .store
            .session(session_id)?
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;
        let summary = SessionSummary::from_session(&session, duration_seconds, now);

        match status {
            SessionStatus::Completed => {
                self.events.session_completed(&SessionCompleted {
                    user_id: user_id.to_string(),
                    summary: summary.clone(),
                });
            }
            _ => log::info!(
                "Session {} abandoned after {} of {} cards",
                session_id,
                summary.cards_seen,
                summary.total_cards
            ),
        }
        Ok(summary)
    }
}

fn report<T>(operation: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        log::log!(e.log_level(), "{} failed: {}", operation, e);
    }
    result
}
