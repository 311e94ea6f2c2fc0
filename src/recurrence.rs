//! Weekly expansion of recurring booking templates.
//!
//! Occurrence `k` is the template span moved forward by `k` calendar weeks.
//! Spans are wall-clock values, so the shift is by days rather than by a fixed
//! number of seconds and a DST change between weeks does not move the
//! time-of-day.

use std::iter::FusedIterator;

use crate::model::{BookingRequest, Recurrence, Span};

/// A recurring template: first occurrence plus week count. Iterate it with [`WeeklySeries::iter`]
/// as many times as needed; each iteration starts again from week 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySeries {
    first: Span,
    weeks: u32,
}

impl WeeklySeries {
    /// `None` if `weeks` is zero or the last occurrence falls outside the calendar range.
    pub fn new(first: Span, weeks: u32) -> Option<Self> {
        if weeks == 0 {
            return None;
        }
        first.shift_weeks(weeks - 1)?;
        Some(Self { first, weeks })
    }

    /// Series for a request. A one-off request expands to its own span.
    pub fn for_request(request: &BookingRequest) -> Option<Self> {
        match request.recurrence {
            Recurrence::Once => Self::new(request.span, 1),
            Recurrence::Weekly { weeks } => Self::new(request.span, weeks),
        }
    }

    pub fn weeks(&self) -> u32 {
        self.weeks
    }

    pub fn first(&self) -> Span {
        self.first
    }

    pub fn last(&self) -> Span {
        self.first.shift_weeks(self.weeks - 1).unwrap_or(self.first)
    }

    pub fn iter(&self) -> Occurrences {
        Occurrences {
            first: self.first,
            weeks: self.weeks,
            next: 0,
        }
    }
}

impl IntoIterator for &WeeklySeries {
    type Item = Span;
    type IntoIter = Occurrences;

    fn into_iter(self) -> Occurrences {
        self.iter()
    }
}

/// Lazy iterator over the occurrences of a [`WeeklySeries`], in week order.
#[derive(Debug, Clone)]
pub struct Occurrences {
    first: Span,
    weeks: u32,
    next: u32,
}

impl Iterator for Occurrences {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        if self.next >= self.weeks {
            return None;
        }
        let span = self.first.shift_weeks(self.next)?;
        self.next += 1;
        Some(span)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.weeks - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Occurrences {}

impl FusedIterator for Occurrences {}
