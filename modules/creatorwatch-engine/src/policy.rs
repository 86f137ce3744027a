//! Fallback escalation rules and the quiet-day / technical-failure split.

use creatorwatch_common::{FallbackReason, SourceStatus};

/// Why a source produced nothing in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyResult {
    /// Source healthy, data clean, nothing published that day.
    QuietDay,
    TechnicalFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackDecision {
    pub escalate: bool,
    pub reason: Option<FallbackReason>,
}

impl FallbackDecision {
    fn escalate(reason: FallbackReason) -> Self {
        Self {
            escalate: true,
            reason: Some(reason),
        }
    }

    fn accept() -> Self {
        Self {
            escalate: false,
            reason: None,
        }
    }
}

/// `None` when there is something in range; otherwise quiet day only for a
/// successful, non-empty, clean fetch.
pub fn classify_empty_result(
    status: SourceStatus,
    items_fetched_raw: u32,
    items_in_range: u32,
    has_quality_issue: bool,
) -> Option<EmptyResult> {
    if items_in_range > 0 {
        return None;
    }
    if status == SourceStatus::Succeeded && items_fetched_raw > 0 && !has_quality_issue {
        Some(EmptyResult::QuietDay)
    } else {
        Some(EmptyResult::TechnicalFailure)
    }
}

/// First matching rule wins. Zero raw items must be checked before the quiet-day
/// rule, or a full provider outage would read as a quiet day.
pub fn decide(
    status: SourceStatus,
    items_fetched_raw: u32,
    items_in_range: u32,
    low_results_threshold: u32,
    has_quality_issue: bool,
) -> FallbackDecision {
    if status != SourceStatus::Succeeded {
        return FallbackDecision::escalate(FallbackReason::Failed);
    }
    if items_fetched_raw == 0 {
        return FallbackDecision::escalate(FallbackReason::ZeroResults);
    }
    match classify_empty_result(status, items_fetched_raw, items_in_range, has_quality_issue) {
        Some(EmptyResult::TechnicalFailure) => {
            FallbackDecision::escalate(FallbackReason::ZeroResults)
        }
        Some(EmptyResult::QuietDay) => FallbackDecision::accept(),
        None if items_in_range < low_results_threshold => {
            FallbackDecision::escalate(FallbackReason::LowResults)
        }
        None => FallbackDecision::accept(),
    }
}
