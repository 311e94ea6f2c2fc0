use std::fmt;

use chrono::{Days, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type BookingId = Ulid;
pub type UserId = Ulid;

/// Half-open interval `[start, end)` in facility-local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    /// Unchecked. The engine rejects spans with `start >= end` as invalid input.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Shift by whole calendar weeks. Time-of-day and duration are kept as-is.
    /// `None` on calendar overflow.
    pub fn shift_weeks(&self, weeks: u32) -> Option<Span> {
        let days = Days::new(u64::from(weeks) * 7);
        Some(Span {
            start: self.start.checked_add_days(days)?,
            end: self.end.checked_add_days(days)?,
        })
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A facility plus the span it is occupied for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupancy {
    pub facility: String,
    pub span: Span,
}

impl Occupancy {
    pub fn new(facility: impl Into<String>, span: Span) -> Self {
        Self {
            facility: facility.into(),
            span,
        }
    }

    /// Occupancies on different facilities never overlap.
    pub fn overlaps(&self, other: &Occupancy) -> bool {
        self.facility == other.facility && self.span.overlaps(&other.span)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Recurrence {
    #[default]
    Once,
    /// Same weekday and time-of-day for `weeks` consecutive weeks, starting at the request span.
    Weekly { weeks: u32 },
}

impl Recurrence {
    pub fn is_recurring(&self) -> bool {
        matches!(self, Recurrence::Weekly { .. })
    }
}

/// Booking details as submitted by a caller. The owner comes from the principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub name: String,
    pub unit: String,
    pub facility: String,
    pub span: Span,
    pub purpose: String,
    pub recurrence: Recurrence,
}

/// A REQUESTED row. For recurring requests `span` is the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub id: BookingId,
    pub username: String,
    pub name: String,
    pub unit: String,
    pub facility: String,
    pub span: Span,
    pub purpose: String,
    pub recurrence: Recurrence,
}

impl BookingRequest {
    pub fn from_new(id: BookingId, username: String, new: NewBooking) -> Self {
        Self {
            id,
            username,
            name: new.name,
            unit: new.unit,
            facility: new.facility,
            span: new.span,
            purpose: new.purpose,
            recurrence: new.recurrence,
        }
    }

    pub fn occupancy(&self) -> Occupancy {
        Occupancy::new(self.facility.clone(), self.span)
    }
}

/// Which confirmed table a row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfirmedKind {
    Single,
    Recurring,
}

/// A row of the confirmed store: an approved single booking or one expanded occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedBooking {
    pub id: BookingId,
    pub kind: ConfirmedKind,
    pub username: String,
    pub name: String,
    pub unit: String,
    pub facility: String,
    pub span: Span,
    pub purpose: String,
}

impl ConfirmedBooking {
    /// Copy the owner metadata of `request` onto a confirmed row at `span`.
    pub fn from_request(
        id: BookingId,
        kind: ConfirmedKind,
        request: &BookingRequest,
        span: Span,
    ) -> Self {
        Self {
            id,
            kind,
            username: request.username.clone(),
            name: request.name.clone(),
            unit: request.unit.clone(),
            facility: request.facility.clone(),
            span,
            purpose: request.purpose.clone(),
        }
    }

    pub fn occupancy(&self) -> Occupancy {
        Occupancy::new(self.facility.clone(), self.span)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Opaque salted credential hash produced by the auth layer.
    pub password_hash: String,
    pub is_admin: bool,
}

/// The authenticated caller, as asserted by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub is_admin: bool,
}

impl Principal {
    pub fn new(user_id: UserId, username: impl Into<String>, is_admin: bool) -> Self {
        Self {
            user_id,
            username: username.into(),
            is_admin,
        }
    }

    /// Admins act on any row; everyone else only on their own.
    pub fn may_act_for(&self, owner: &str) -> bool {
        self.is_admin || self.username == owner
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            is_admin: user.is_admin,
        }
    }
}

/// The WAL event types. Each committed transaction is one record holding a list of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RequestSubmitted(BookingRequest),
    RequestRemoved { id: BookingId },
    BookingConfirmed(ConfirmedBooking),
    BookingRemoved { id: BookingId, kind: ConfirmedKind },
    UserCreated(User),
}

// ── Query result types ───────────────────────────────────────────

/// The three collections returned by a listing, each ascending by start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingListing {
    pub recurring: Vec<ConfirmedBooking>,
    pub approved: Vec<ConfirmedBooking>,
    pub requested: Vec<BookingRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceStatus {
    Inserted(BookingId),
    Skipped { conflicting_id: BookingId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceOutcome {
    pub span: Span,
    pub status: OccurrenceStatus,
}

/// Result of approving a request. Single bookings carry exactly one outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub request_id: BookingId,
    pub occurrences: Vec<OccurrenceOutcome>,
}

impl Approval {
    pub fn inserted_ids(&self) -> Vec<BookingId> {
        self.occurrences
            .iter()
            .filter_map(|o| match o.status {
                OccurrenceStatus::Inserted(id) => Some(id),
                OccurrenceStatus::Skipped { .. } => None,
            })
            .collect()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &OccurrenceOutcome> {
        self.occurrences
            .iter()
            .filter(|o| matches!(o.status, OccurrenceStatus::Skipped { .. }))
    }
}

#[cfg(test)]
pub(crate) fn at(date: &str, time: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M")
        .expect("test timestamp")
}
