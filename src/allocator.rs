//! Split of a session between new items and due reviews

use serde::{Deserialize, Serialize};

/// What the learner has available right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub new_count: u32,
    pub due_review_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub total_cards: u32,
    /// Target share of reviews, 0.0-1.0
    pub review_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub new_count: u32,
    pub review_count: u32,
    /// Cards requested but not available in either pool
    pub shortfall: u32,
}

impl Allocation {
    pub fn total(&self) -> u32 {
        self.new_count + self.review_count
    }

    pub fn shortage_message(&self, requested: u32) -> Option<String> {
        if self.shortfall == 0 {
            return None;
        }
        if self.total() == 0 {
            return Some("No new words or due reviews are available right now".to_string());
        }
        Some(format!(
            "Only {} of {} requested cards are available ({} new, {} review)",
            self.total(),
            requested,
            self.new_count,
            self.review_count
        ))
    }
}

/// Split `request.total_cards` between the pools.
///
/// When one pool runs short the gap is filled from due reviews first,
/// then from new items.
pub fn allocate(available: Availability, request: AllocationRequest) -> Allocation {
    let total = request.total_cards;
    let ratio = if request.review_ratio.is_nan() {
        0.0
    } else {
        request.review_ratio.clamp(0.0, 1.0)
    };

    let desired_review = ((total as f64) * ratio).round().clamp(0.0, total as f64) as u32;
    let desired_new = total - desired_review;

    let mut review_count = desired_review.min(available.due_review_count);
    let mut new_count = desired_new.min(available.new_count);

    let mut shortfall = total - review_count - new_count;
    if shortfall > 0 {
        let extra = shortfall.min(available.due_review_count - review_count);
        review_count += extra;
        shortfall -= extra;
    }
    if shortfall > 0 {
        let extra = shortfall.min(available.new_count - new_count);
        new_count += extra;
        shortfall -= extra;
    }

    Allocation {
        new_count,
        review_count,
        shortfall,
    }
}
