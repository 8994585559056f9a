//! Memory model: maps (memory state, rating) to the next memory state
//!
//! Retrievability follows a power forgetting curve,
//! `R(t) = (1 + FACTOR * t / S) ^ DECAY`, tuned so that `R(S) = 0.9`.
//! Stability grows multiplicatively on successful recall, more for easier
//! ratings and for items recalled at lower retrievability, and shrinks only
//! on a lapse (Again while in Review).
//!
//! Review counters and history are maintained by the grader, which sees the
//! raw correctness signal; this module only touches state, stability,
//! difficulty and the due/last-reviewed timestamps.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::models::{LearningState, MemoryState, Rating};

const DECAY: f64 = -0.5;
const FACTOR: f64 = 19.0 / 81.0;

const MIN_DIFFICULTY: f64 = 1.0;
const MAX_DIFFICULTY: f64 = 10.0;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Hundred years; keeps every due date representable
pub const STABILITY_LIMIT_DAYS: f64 = 36_525.0;

/// Gap kept between the Hard, Good and Easy ceilings at the stability cap
const CEILING_STEP_DAYS: f64 = 1.0;

/// Tunable model parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerParams {
    /// Stability in days after the first rating, indexed Again/Hard/Good/Easy
    pub initial_stability: [f64; 4],
    pub initial_difficulty: f64,
    pub hard_growth: f64,
    pub good_growth: f64,
    pub easy_growth: f64,
    /// Difficulty deltas; the Easy step is subtracted
    pub again_difficulty_step: f64,
    pub hard_difficulty_step: f64,
    pub easy_difficulty_step: f64,
    /// Share of stability kept after a lapse, before difficulty scaling
    pub lapse_factor: f64,
    /// Stability (days) needed to leave Learning/Relearning
    pub graduation_stability: f64,
    pub maximum_stability: f64,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            initial_stability: [0.3, 1.0, 2.5, 6.0],
            initial_difficulty: 5.0,
            hard_growth: 0.2,
            good_growth: 1.3,
            easy_growth: 2.8,
            again_difficulty_step: 1.0,
            hard_difficulty_step: 0.5,
            easy_difficulty_step: 0.8,
            lapse_factor: 0.4,
            graduation_stability: 1.0,
            maximum_stability: 36_500.0,
        }
    }
}

impl SchedulerParams {
    pub fn validate(&self) -> Result<()> {
        let s = &self.initial_stability;
        if s.iter().any(|v| *v < 0.0) || !(s[0] <= s[1] && s[1] <= s[2] && s[2] < s[3]) {
            return Err(CoreError::Config(
                "scheduler.initial_stability must be non-negative and ordered Again <= Hard <= Good < Easy"
                    .to_string(),
            ));
        }
        if !(0.0 <= self.hard_growth
            && self.hard_growth <= self.good_growth
            && self.good_growth < self.easy_growth)
        {
            return Err(CoreError::Config(
                "scheduler growth must satisfy 0 <= hard <= good < easy".to_string(),
            ));
        }
        if !(self.lapse_factor > 0.0 && self.lapse_factor < 1.0) {
            return Err(CoreError::Config(
                "scheduler.lapse_factor must be within (0, 1)".to_string(),
            ));
        }
        if self.again_difficulty_step < 0.0
            || self.hard_difficulty_step < 0.0
            || self.easy_difficulty_step < 0.0
        {
            return Err(CoreError::Config(
                "scheduler difficulty steps must be non-negative".to_string(),
            ));
        }
        if !(self.maximum_stability >= s[3] + CEILING_STEP_DAYS
            && self.maximum_stability <= STABILITY_LIMIT_DAYS)
        {
            return Err(CoreError::Config(format!(
                "scheduler.maximum_stability must be between the Easy initial stability + {} and {} days",
                CEILING_STEP_DAYS, STABILITY_LIMIT_DAYS
            )));
        }
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&self.initial_difficulty) {
            return Err(CoreError::Config(
                "scheduler.initial_difficulty must be within 1..=10".to_string(),
            ));
        }
        Ok(())
    }
}

/// Stateless scheduler; cheap to clone and pass around
#[derive(Debug, Clone, Default)]
pub struct MemoryModel {
    params: SchedulerParams,
}

impl MemoryModel {
    pub fn new(params: SchedulerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SchedulerParams {
        &self.params
    }

    /// Fresh state for an item the user has never been graded on
    pub fn new_state(&self, user_id: &str, item_id: i64, now: DateTime<Utc>) -> MemoryState {
        MemoryState::new(user_id, item_id, self.params.initial_difficulty, now)
    }

    /// Probability of recall at `now`
    pub fn retrievability(&self, state: &MemoryState, now: DateTime<Utc>) -> f64 {
        match state.last_reviewed_at {
            Some(last) if state.stability > 0.0 => {
                let elapsed_days =
                    ((now - last).num_milliseconds() as f64 / MS_PER_DAY).max(0.0);
                (1.0 + FACTOR * elapsed_days / state.stability).powf(DECAY)
            }
            _ => 1.0,
        }
    }

    /// Apply one rating and schedule the next review
    pub fn advance(&self, state: &MemoryState, rating: Rating, now: DateTime<Utc>) -> MemoryState {
        let p = &self.params;
        let mut next = state.clone();

        let stability = match (state.state, rating) {
            (LearningState::New, _) => state.stability.max(p.initial_stability[rating.index()]),
            (LearningState::Review, Rating::Again) => {
                let difficulty_scale = (11.0 - state.difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)) / 10.0;
                state.stability * p.lapse_factor * difficulty_scale
            }
            (_, Rating::Again) => state.stability,
            (_, _) => self.grow(state, rating, now),
        };
        next.stability = stability.min(self.ceiling(state, rating)).max(0.0);

        next.difficulty = match rating {
            Rating::Again => state.difficulty + p.again_difficulty_step,
            Rating::Hard => state.difficulty + p.hard_difficulty_step,
            Rating::Good => state.difficulty,
            Rating::Easy => state.difficulty - p.easy_difficulty_step,
        }
        .clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);

        next.state = match (state.state, rating) {
            (LearningState::New, _) => LearningState::Learning,
            (LearningState::Review, Rating::Again) => LearningState::Relearning,
            (LearningState::Review, _) => LearningState::Review,
            (phase, Rating::Again) => phase,
            (phase, _) => {
                if next.stability >= p.graduation_stability {
                    LearningState::Review
                } else {
                    phase
                }
            }
        };

        next.due_at = match rating {
            Rating::Again => now,
            _ => now
                .checked_add_signed(interval_for(next.stability))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        next.last_reviewed_at = Some(now);
        next
    }

    /// Interval each rating would produce, in `Rating::ALL` order
    pub fn preview(&self, state: &MemoryState, now: DateTime<Utc>) -> [Duration; 4] {
        Rating::ALL.map(|rating| self.advance(state, rating, now).due_at - now)
    }

    /// Highest stability a rating may reach. Hard and Good stay below Easy
    /// so that Easy always schedules furthest out, even at the cap.
    fn ceiling(&self, state: &MemoryState, rating: Rating) -> f64 {
        let cap = self.params.maximum_stability.max(state.stability);
        match rating {
            Rating::Again | Rating::Easy => cap,
            Rating::Good => cap - CEILING_STEP_DAYS,
            Rating::Hard => cap - 2.0 * CEILING_STEP_DAYS,
        }
    }

    fn grow(&self, state: &MemoryState, rating: Rating, now: DateTime<Utc>) -> f64 {
        let p = &self.params;
        let base = match rating {
            Rating::Hard => p.hard_growth,
            Rating::Good => p.good_growth,
            Rating::Easy => p.easy_growth,
            Rating::Again => 0.0,
        };
        let ease = (11.0 - state.difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)) / 10.0;
        let recall_bonus = 2.0 - self.retrievability(state, now);
        let grown = state.stability * (1.0 + base * ease * recall_bonus);
        grown.max(p.initial_stability[rating.index()])
    }
}

fn interval_for(stability_days: f64) -> Duration {
    Duration::milliseconds((stability_days * MS_PER_DAY).round().max(1.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn review_state(stability: f64) -> MemoryState {
        let mut state = MemoryModel::default().new_state("u1", 7, now());
        state.state = LearningState::Review;
        state.stability = stability;
        state.last_reviewed_at = Some(now() - Duration::days(stability as i64));
        state
    }

    #[test]
    fn test_first_rating_always_enters_learning() {
        let model = MemoryModel::default();
        let fresh = model.new_state("u1", 1, now());
        for rating in Rating::ALL {
            let next = model.advance(&fresh, rating, now());
            assert_eq!(next.state, LearningState::Learning, "{:?}", rating);
            assert!(next.stability >= fresh.stability);
        }
    }

    #[test]
    fn test_again_requeues_immediately() {
        let model = MemoryModel::default();
        let state = review_state(12.0);
        let next = model.advance(&state, Rating::Again, now());
        assert_eq!(next.due_at, now());
    }

    #[test]
    fn test_easy_interval_exceeds_good() {
        let model = MemoryModel::default();
        let state = review_state(4.0);
        let [again, hard, good, easy] = model.preview(&state, now());
        assert_eq!(again, Duration::zero());
        assert!(hard <= good);
        assert!(easy > good);
    }

    #[test]
    fn test_easy_stays_ahead_of_good_at_cap() {
        let model = MemoryModel::default();
        let state = review_state(30_000.0);
        let good = model.advance(&state, Rating::Good, now());
        let easy = model.advance(&state, Rating::Easy, now());
        assert_eq!(easy.stability, 36_500.0);
        assert_eq!(good.stability, 36_499.0);
        assert!(easy.due_at > good.due_at);

        let [_, hard, good, easy] = model.preview(&state, now());
        assert!(hard < good && good < easy);
    }

    #[test]
    fn test_oversized_stability_saturates_due_date() {
        let model = MemoryModel::default();
        let mut state = review_state(10.0);
        state.stability = 1e12;
        let next = model.advance(&state, Rating::Easy, now());
        assert_eq!(next.due_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_lapse_shrinks_stability_and_relearns() {
        let model = MemoryModel::default();
        let state = review_state(20.0);
        let next = model.advance(&state, Rating::Again, now());
        assert!(next.stability < state.stability);
        assert_eq!(next.state, LearningState::Relearning);
        assert!(next.difficulty > state.difficulty);
    }

    #[test]
    fn test_learning_graduates_once_stable() {
        let model = MemoryModel::default();
        let mut state = model.new_state("u1", 1, now());
        state.state = LearningState::Learning;
        state.stability = 0.3;
        state.last_reviewed_at = Some(now() - Duration::hours(1));

        let hard = model.advance(&state, Rating::Hard, now());
        assert_eq!(hard.state, LearningState::Review);

        let again = model.advance(&state, Rating::Again, now());
        assert_eq!(again.state, LearningState::Learning);
        assert_eq!(again.stability, state.stability);
    }

    #[test]
    fn test_relearning_returns_to_review() {
        let model = MemoryModel::default();
        let lapsed = model.advance(&review_state(10.0), Rating::Again, now());
        assert_eq!(lapsed.state, LearningState::Relearning);

        let later = now() + Duration::minutes(10);
        let recovered = model.advance(&lapsed, Rating::Good, later);
        assert_eq!(recovered.state, LearningState::Review);
        assert!(recovered.stability >= lapsed.stability);
    }

    #[test]
    fn test_difficulty_bounds() {
        let model = MemoryModel::default();
        let mut state = review_state(5.0);
        state.difficulty = 9.8;
        assert_eq!(model.advance(&state, Rating::Again, now()).difficulty, 10.0);

        state.difficulty = 1.2;
        assert_eq!(model.advance(&state, Rating::Easy, now()).difficulty, 1.0);
        assert_eq!(model.advance(&state, Rating::Good, now()).difficulty, 1.2);
    }

    #[test]
    fn test_retrievability_at_stability_is_ninety_percent() {
        let model = MemoryModel::default();
        let state = review_state(10.0);
        let r = model.retrievability(&state, now());
        assert!((r - 0.9).abs() < 1e-9, "r = {}", r);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = SchedulerParams {
            lapse_factor: 1.5,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_maximum_stability_bounds() {
        assert!(SchedulerParams::default().validate().is_ok());
        for maximum_stability in [1e9, STABILITY_LIMIT_DAYS + 1.0, 6.5, f64::NAN] {
            let params = SchedulerParams {
                maximum_stability,
                ..Default::default()
            };
            assert!(params.validate().is_err(), "{}", maximum_stability);
        }
    }
}
