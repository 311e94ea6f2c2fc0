use crate::config::Config;
use crate::limits::*;
use crate::model::*;
use crate::recurrence::WeeklySeries;
use crate::store::StoreTx;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Validation(format!(
            "start {} is not before end {}",
            span.start, span.end
        )));
    }
    if span.duration() > MAX_SPAN_DURATION {
        return Err(EngineError::Validation("booking longer than 24 hours".into()));
    }
    Ok(())
}

fn validate_text(field: &str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::Validation(format!("{field} longer than {max} bytes")));
    }
    Ok(())
}

pub(crate) fn validate_username(username: &str) -> Result<(), EngineError> {
    if username.trim().is_empty() {
        return Err(EngineError::Validation("empty username".into()));
    }
    validate_text("username", username, MAX_USERNAME_LEN)
}

pub(crate) fn validate_booking(config: &Config, booking: &NewBooking) -> Result<(), EngineError> {
    validate_span(&booking.span)?;
    if booking.facility.trim().is_empty() {
        return Err(EngineError::Validation("empty facility".into()));
    }
    validate_text("facility", &booking.facility, MAX_FACILITY_LEN)?;
    if !config.knows_facility(&booking.facility) {
        return Err(EngineError::Validation(format!(
            "unknown facility {:?}",
            booking.facility
        )));
    }
    validate_text("name", &booking.name, MAX_NAME_LEN)?;
    validate_text("unit", &booking.unit, MAX_UNIT_LEN)?;
    validate_text("purpose", &booking.purpose, MAX_PURPOSE_LEN)?;

    if let Recurrence::Weekly { weeks } = booking.recurrence {
        if !(1..=MAX_RECURRING_WEEKS).contains(&weeks) {
            return Err(EngineError::Validation(format!(
                "recurring week count must be between 1 and {MAX_RECURRING_WEEKS}, got {weeks}"
            )));
        }
        if WeeklySeries::new(booking.span, weeks).is_none() {
            return Err(EngineError::Validation("recurrence runs past the calendar range".into()));
        }
    }
    Ok(())
}

pub(crate) fn validate_window(window: &Span) -> Result<(), EngineError> {
    if window.start >= window.end {
        return Err(EngineError::Validation(format!(
            "window start {} is not before end {}",
            window.start, window.end
        )));
    }
    if window.duration() > MAX_QUERY_WINDOW {
        return Err(EngineError::Validation("query window too wide".into()));
    }
    Ok(())
}

/// Fail with `Conflict` if `occupancy` overlaps any confirmed row other than `exclude`.
/// Runs inside the caller's transaction so the answer holds until it commits.
pub(crate) async fn check_no_conflict<T: StoreTx + ?Sized>(
    tx: &mut T,
    occupancy: &Occupancy,
    exclude: Option<BookingId>,
) -> Result<(), EngineError> {
    match tx.confirmed_overlap(occupancy, exclude).await? {
        Some(conflicting_id) => Err(EngineError::Conflict {
            facility: occupancy.facility.clone(),
            span: occupancy.span,
            conflicting_id,
        }),
        None => Ok(()),
    }
}
