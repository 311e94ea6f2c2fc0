use std::collections::HashMap;

use crate::model::*;

/// Confirmed occupancy of one facility, sorted by `span.start`.
#[derive(Debug, Default)]
pub(super) struct FacilityCalendar {
    slots: Vec<(BookingId, Span)>,
}

impl FacilityCalendar {
    /// Insert slot maintaining sort order by span.start.
    fn insert(&mut self, id: BookingId, span: Span) {
        let pos = self
            .slots
            .binary_search_by_key(&span.start, |(_, s)| s.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, (id, span));
    }

    fn remove(&mut self, id: BookingId) {
        if let Some(pos) = self.slots.iter().position(|(sid, _)| *sid == id) {
            self.slots.remove(pos);
        }
    }

    /// Slots whose span overlaps `query`.
    /// Uses binary search to skip slots starting at or after `query.end`.
    pub(super) fn overlapping(&self, query: &Span) -> impl Iterator<Item = &(BookingId, Span)> {
        let right_bound = self.slots.partition_point(|(_, s)| s.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |(_, s)| s.end > query.start)
    }

    fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// How to reverse one applied change.
pub(super) enum Undo {
    Apply(Event),
    DropUser(String),
    Nothing,
}

/// The in-memory state behind the store: three booking tables, the per-facility
/// calendar index over the two confirmed tables, and users.
#[derive(Debug, Default)]
pub(super) struct Tables {
    requested: HashMap<BookingId, BookingRequest>,
    approved: HashMap<BookingId, ConfirmedBooking>,
    recurring: HashMap<BookingId, ConfirmedBooking>,
    calendars: HashMap<String, FacilityCalendar>,
    users: HashMap<String, User>,
}

impl Tables {
    /// Apply an event and return what reverses it.
    pub(super) fn apply(&mut self, event: &Event) -> Undo {
        match event {
            Event::RequestSubmitted(request) => {
                self.requested.insert(request.id, request.clone());
                Undo::Apply(Event::RequestRemoved { id: request.id })
            }
            Event::RequestRemoved { id } => match self.requested.remove(id) {
                Some(request) => Undo::Apply(Event::RequestSubmitted(request)),
                None => Undo::Nothing,
            },
            Event::BookingConfirmed(booking) => {
                self.calendars
                    .entry(booking.facility.clone())
                    .or_default()
                    .insert(booking.id, booking.span);
                self.confirmed_table(booking.kind)
                    .insert(booking.id, booking.clone());
                Undo::Apply(Event::BookingRemoved {
                    id: booking.id,
                    kind: booking.kind,
                })
            }
            Event::BookingRemoved { id, kind } => match self.confirmed_table(*kind).remove(id) {
                Some(booking) => {
                    if let Some(calendar) = self.calendars.get_mut(&booking.facility) {
                        calendar.remove(*id);
                        if calendar.is_empty() {
                            self.calendars.remove(&booking.facility);
                        }
                    }
                    Undo::Apply(Event::BookingConfirmed(booking))
                }
                None => Undo::Nothing,
            },
            Event::UserCreated(user) => {
                self.users.insert(user.username.clone(), user.clone());
                Undo::DropUser(user.username.clone())
            }
        }
    }

    pub(super) fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::Apply(event) => {
                self.apply(&event);
            }
            Undo::DropUser(username) => {
                self.users.remove(&username);
            }
            Undo::Nothing => {}
        }
    }

    fn confirmed_table(&mut self, kind: ConfirmedKind) -> &mut HashMap<BookingId, ConfirmedBooking> {
        match kind {
            ConfirmedKind::Single => &mut self.approved,
            ConfirmedKind::Recurring => &mut self.recurring,
        }
    }

    pub(super) fn confirmed_overlap(
        &self,
        occupancy: &Occupancy,
        exclude: Option<BookingId>,
    ) -> Option<BookingId> {
        self.calendars
            .get(&occupancy.facility)?
            .overlapping(&occupancy.span)
            .map(|(id, _)| *id)
            .find(|id| Some(*id) != exclude)
    }

    pub(super) fn requested(&self, id: &BookingId) -> Option<&BookingRequest> {
        self.requested.get(id)
    }

    pub(super) fn confirmed(&self, id: &BookingId) -> Option<&ConfirmedBooking> {
        self.approved.get(id).or_else(|| self.recurring.get(id))
    }

    pub(super) fn user(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    pub(super) fn listing(&self, owner: Option<&str>) -> BookingListing {
        let owned = |username: &str| owner.is_none_or(|o| o == username);

        let mut recurring: Vec<ConfirmedBooking> = self
            .recurring
            .values()
            .filter(|b| owned(&b.username))
            .cloned()
            .collect();
        let mut approved: Vec<ConfirmedBooking> = self
            .approved
            .values()
            .filter(|b| owned(&b.username))
            .cloned()
            .collect();
        let mut requested: Vec<BookingRequest> = self
            .requested
            .values()
            .filter(|r| owned(&r.username))
            .cloned()
            .collect();

        recurring.sort_by_key(|b| (b.span.start, b.span.end, b.id));
        approved.sort_by_key(|b| (b.span.start, b.span.end, b.id));
        requested.sort_by_key(|r| (r.span.start, r.span.end, r.id));

        BookingListing {
            recurring,
            approved,
            requested,
        }
    }

    pub(super) fn upcoming(&self, window: &Span) -> Vec<ConfirmedBooking> {
        let mut rows: Vec<ConfirmedBooking> = self
            .approved
            .values()
            .chain(self.recurring.values())
            .filter(|b| window.contains_span(&b.span))
            .cloned()
            .collect();
        rows.sort_by_key(|b| (b.span.start, b.span.end, b.id));
        rows
    }

    /// Events that recreate the current state from empty.
    pub(super) fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(
            self.users.len() + self.requested.len() + self.approved.len() + self.recurring.len(),
        );
        events.extend(self.users.values().cloned().map(Event::UserCreated));
        events.extend(self.requested.values().cloned().map(Event::RequestSubmitted));
        events.extend(self.approved.values().cloned().map(Event::BookingConfirmed));
        events.extend(self.recurring.values().cloned().map(Event::BookingConfirmed));
        events
    }
}
