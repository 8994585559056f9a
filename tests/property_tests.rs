//! Property-based tests for lexiq_core
//!
//! These tests verify invariants that must hold for all inputs:
//! - Allocations never exceed the request or availability
//! - Scheduling keeps state within bounds and orders ratings sensibly
//! - Answer normalization is idempotent
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

// ============================================================================
// ALLOCATION TESTS
// ============================================================================

mod allocation_tests {
    use super::*;
    use lexiq_core::{allocate, AllocationRequest, Availability};

    proptest! {
        /// Invariant: allocation respects both pools and the requested total
        #[test]
        fn stays_within_bounds(
            new_count in 0u32..500,
            due_review_count in 0u32..500,
            total_cards in 0u32..300,
            review_ratio in -1.0f64..2.0,
        ) {
            let available = Availability { new_count, due_review_count };
            let a = allocate(available, AllocationRequest { total_cards, review_ratio });

            prop_assert!(a.new_count <= new_count);
            prop_assert!(a.review_count <= due_review_count);
            prop_assert_eq!(a.total() + a.shortfall, total_cards);
            prop_assert_eq!(a.total(), total_cards.min(new_count + due_review_count));
        }

        /// Invariant: a shortfall only exists when both pools are drained
        #[test]
        fn shortfall_means_exhausted(
            new_count in 0u32..50,
            due_review_count in 0u32..50,
            total_cards in 0u32..120,
            review_ratio in 0.0f64..=1.0,
        ) {
            let a = allocate(
                Availability { new_count, due_review_count },
                AllocationRequest { total_cards, review_ratio },
            );
            if a.shortfall > 0 {
                prop_assert_eq!(a.new_count, new_count);
                prop_assert_eq!(a.review_count, due_review_count);
                prop_assert!(a.shortage_message(total_cards).is_some());
            } else {
                prop_assert!(a.shortage_message(total_cards).is_none());
            }
        }

        /// Invariant: NaN ratios are handled without panicking
        #[test]
        fn nan_ratio_is_safe(new_count in 0u32..50, due_review_count in 0u32..50, total_cards in 0u32..60) {
            let a = allocate(
                Availability { new_count, due_review_count },
                AllocationRequest { total_cards, review_ratio: f64::NAN },
            );
            prop_assert_eq!(a.total() + a.shortfall, total_cards);
        }
    }
}

// ============================================================================
// SCHEDULER TESTS
// ============================================================================

mod scheduler_tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use lexiq_core::{LearningState, MemoryModel, MemoryState, Rating};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 2, 12, 0, 0).unwrap()
    }

    fn learning_state() -> impl Strategy<Value = LearningState> {
        prop_oneof![
            Just(LearningState::Learning),
            Just(LearningState::Review),
            Just(LearningState::Relearning),
        ]
    }

    prop_compose! {
        fn seen_state()(
            state in learning_state(),
            stability in 0.1f64..=36_500.0,
            difficulty in 1.0f64..=10.0,
            elapsed_hours in 0i64..(24 * 365),
        ) -> MemoryState {
            let mut m = MemoryState::new("u1", 1, difficulty, now() - Duration::days(400));
            m.state = state;
            m.stability = stability;
            m.last_reviewed_at = Some(now() - Duration::hours(elapsed_hours));
            m.total_reviews = 3;
            m
        }
    }

    proptest! {
        /// Invariant: Again always requeues at the current instant
        #[test]
        fn again_is_due_now(state in seen_state()) {
            let next = MemoryModel::default().advance(&state, Rating::Again, now());
            prop_assert_eq!(next.due_at, now());
            prop_assert_eq!(next.last_reviewed_at, Some(now()));
        }

        /// Invariant: successful ratings schedule strictly into the future,
        /// Easy beyond Good, up to and including the stability cap
        #[test]
        fn easy_outlasts_good(state in seen_state()) {
            let model = MemoryModel::default();
            let good = model.advance(&state, Rating::Good, now());
            let easy = model.advance(&state, Rating::Easy, now());
            prop_assert!(good.due_at > now());
            prop_assert!(easy.due_at > good.due_at);
            prop_assert!(easy.stability > good.stability);
        }

        /// Invariant: stability only shrinks on a lapse, or by at most two
        /// days when Hard/Good are held under the Easy ceiling
        #[test]
        fn stability_only_drops_on_lapse(state in seen_state(), idx in 0usize..4) {
            let model = MemoryModel::default();
            let rating = Rating::ALL[idx];
            let next = model.advance(&state, rating, now());
            let maximum = model.params().maximum_stability;
            prop_assert!(next.stability <= maximum);
            if state.state == LearningState::Review && rating == Rating::Again {
                prop_assert!(next.stability < state.stability);
                prop_assert_eq!(next.state, LearningState::Relearning);
            } else if state.stability <= maximum - 2.0 {
                prop_assert!(next.stability >= state.stability);
            } else {
                prop_assert!(next.stability >= state.stability - 2.0);
            }
        }

        /// Invariant: difficulty stays within 1..=10 and retrievability within 0..=1
        #[test]
        fn values_stay_bounded(state in seen_state(), idx in 0usize..4) {
            let model = MemoryModel::default();
            let next = model.advance(&state, Rating::ALL[idx], now());
            prop_assert!((1.0..=10.0).contains(&next.difficulty));
            let r = model.retrievability(&state, now());
            prop_assert!((0.0..=1.0).contains(&r));
        }

        /// Invariant: preview intervals are ordered Again <= Hard <= Good < Easy
        #[test]
        fn preview_is_ordered(state in seen_state()) {
            let intervals = MemoryModel::default().preview(&state, now());
            prop_assert!(intervals[0] <= intervals[1]);
            prop_assert!(intervals[1] <= intervals[2]);
            prop_assert!(intervals[2] < intervals[3]);
        }
    }
}

// ============================================================================
// ANSWER NORMALIZATION TESTS
// ============================================================================

mod normalization_tests {
    use super::*;
    use lexiq_core::normalize_answer;

    proptest! {
        /// Invariant: normalizing twice yields the same result
        #[test]
        fn idempotent(s in "\\PC{0,60}") {
            let once = normalize_answer(&s);
            prop_assert_eq!(normalize_answer(&once), once);
        }

        /// Invariant: padding and case never change the normalized form
        #[test]
        fn ignores_padding_and_case(s in "[a-zA-Z ]{1,30}") {
            let padded = format!("  {}\t", s.to_uppercase());
            prop_assert_eq!(normalize_answer(&padded), normalize_answer(&s));
        }
    }
}
