use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(())
}

/// First booking that still holds the space during `span`, if any.
pub(crate) fn find_conflict<'a>(ss: &'a SpaceState, span: &Span) -> Option<&'a Booking> {
    ss.overlapping(span).find(|b| b.holds_space())
}

/// Caller must hold the space's write lock until the new booking is applied.
pub(crate) fn check_no_conflict(ss: &SpaceState, span: &Span) -> Result<(), EngineError> {
    match find_conflict(ss, span) {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}
