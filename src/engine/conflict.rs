use crate::limits::*;
use crate::model::*;
use crate::time::minutes;

use super::store::ScheduleState;
use super::EngineError;

/// Slots starting sooner than this after "now" are never offered.
pub const LEAD_BUFFER_MS: Ms = 5 * 60_000;

/// The blocking appointment starting exactly at `start`. Duration is not
/// considered: slot granularity is fixed by the rule.
pub fn booking_at(schedule: &ScheduleState, start: Ms) -> Option<&Appointment> {
    schedule
        .holder_of(start)
        .filter(|appt| appt.status.is_blocking())
}

/// First block-out overlapping `span` under the half-open test
/// `span.start < b.end && span.end > b.start`.
pub fn blocking_block_out<'a>(schedule: &'a ScheduleState, span: &Span) -> Option<&'a BlockOutTime> {
    schedule.overlapping_block_outs(span).next()
}

pub fn check_slot_free(schedule: &ScheduleState, span: &Span) -> Result<(), EngineError> {
    if booking_at(schedule, span.start).is_some() {
        return Err(EngineError::SlotTaken(span.start));
    }
    if let Some(block) = blocking_block_out(schedule, span) {
        return Err(EngineError::SlotBlocked {
            start: span.start,
            block_out: block.id,
        });
    }
    Ok(())
}

pub(crate) fn validate_instant(t: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_rule(
    day_of_week: u8,
    start: chrono::NaiveTime,
    end: chrono::NaiveTime,
    slot_duration_minutes: i64,
) -> Result<(), EngineError> {
    if day_of_week > 6 {
        return Err(EngineError::Validation(format!(
            "day_of_week must be between 0 and 6, got {day_of_week}"
        )));
    }
    if start >= end {
        return Err(EngineError::Validation(
            "start_time must be before end_time".into(),
        ));
    }
    if slot_duration_minutes <= 0 {
        return Err(EngineError::Validation(
            "slot_duration_minutes must be positive".into(),
        ));
    }
    if slot_duration_minutes > MAX_SLOT_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("slot duration too long"));
    }
    Ok(())
}

pub(crate) fn validate_block_out(start: Ms, end: Ms, reason: Option<&str>) -> Result<Span, EngineError> {
    validate_instant(start)?;
    validate_instant(end)?;
    if start >= end {
        return Err(EngineError::Validation(
            "block-out start_time must be before end_time".into(),
        ));
    }
    if end - start > MAX_BLOCK_OUT_SPAN_MS {
        return Err(EngineError::LimitExceeded("block-out too wide"));
    }
    validate_text(reason, MAX_REASON_LEN, "reason too long")?;
    Ok(Span::new(start, end))
}

pub(crate) fn validate_text(
    value: Option<&str>,
    max: usize,
    what: &'static str,
) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

/// Span of a booking at `start` lasting `duration_minutes`.
pub(crate) fn booking_span(start: Ms, duration_minutes: i64) -> Result<Span, EngineError> {
    validate_instant(start)?;
    let end = start + minutes(duration_minutes);
    validate_instant(end)?;
    Ok(Span::new(start, end))
}
