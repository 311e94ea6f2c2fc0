use tracing::{info, warn};

use crate::config::RecurrencePolicy;
use crate::model::*;
use crate::recurrence::WeeklySeries;
use crate::store::StoreTx;

use super::conflict::{check_no_conflict, validate_booking, validate_username};
use super::{Engine, EngineError};

impl Engine {
    /// Store a new REQUESTED booking owned by `principal`. Fails with `Conflict` if the
    /// span (for recurring requests, the first occurrence) overlaps a confirmed booking.
    pub async fn submit(
        &self,
        principal: &Principal,
        booking: NewBooking,
    ) -> Result<BookingRequest, EngineError> {
        self.timed("submit", self.submit_inner(principal, booking)).await
    }

    async fn submit_inner(
        &self,
        principal: &Principal,
        booking: NewBooking,
    ) -> Result<BookingRequest, EngineError> {
        validate_booking(&self.config, &booking)?;

        let (tx, request) = self
            .bounded("submit", async {
                let mut tx = self.store.begin().await?;
                let occupancy = Occupancy::new(booking.facility.clone(), booking.span);
                if let Err(e) = check_no_conflict(&mut *tx, &occupancy, None).await {
                    warn!(username = %principal.username, facility = %occupancy.facility, "submit rejected: {e}");
                    return Err(e);
                }
                let request = tx.insert_requested(&principal.username, booking).await?;
                Ok::<_, EngineError>((tx, request))
            })
            .await?;
        tx.commit().await?;

        info!(
            id = %request.id,
            username = %request.username,
            facility = %request.facility,
            span = %request.span,
            recurring = request.recurrence.is_recurring(),
            "booking requested"
        );
        Ok(request)
    }

    /// Promote a REQUESTED booking into the confirmed store. Admin only.
    ///
    /// One-off requests are re-checked and copied into the approved table. Recurring
    /// requests expand into weekly occurrences in the recurring table, with conflicting
    /// occurrences handled per [`RecurrencePolicy`]. Either way the request row is
    /// deleted in the same transaction.
    pub async fn approve(
        &self,
        principal: &Principal,
        request_id: BookingId,
    ) -> Result<Approval, EngineError> {
        self.timed("approve", self.approve_inner(principal, request_id))
            .await
    }

    async fn approve_inner(
        &self,
        principal: &Principal,
        request_id: BookingId,
    ) -> Result<Approval, EngineError> {
        if !principal.is_admin {
            return Err(EngineError::Unauthorized("only admins can approve bookings"));
        }

        let (tx, request, approval) = self
            .bounded("approve", async {
                let mut tx = self.store.begin().await?;
                let request = tx
                    .load_requested(request_id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(format!("booking request {request_id}")))?;

                let approval = match request.recurrence {
                    Recurrence::Once => approve_single(&mut *tx, &request).await?,
                    Recurrence::Weekly { .. } => {
                        approve_recurring(&mut *tx, &request, self.config.recurrence_policy).await?
                    }
                };
                Ok::<_, EngineError>((tx, request, approval))
            })
            .await?;
        tx.commit().await?;

        let skipped = approval.skipped().count();
        if skipped > 0 {
            metrics::counter!(crate::observability::OCCURRENCES_SKIPPED_TOTAL)
                .increment(skipped as u64);
            warn!(
                id = %request_id,
                facility = %request.facility,
                skipped,
                "recurring approval skipped conflicting occurrences"
            );
        }
        info!(
            id = %request_id,
            username = %request.username,
            facility = %request.facility,
            approved_by = %principal.username,
            inserted = approval.occurrences.len() - skipped,
            "booking approved"
        );
        Ok(approval)
    }

    /// Delete a REQUESTED booking: an admin rejecting it or the owner withdrawing it.
    pub async fn reject(
        &self,
        principal: &Principal,
        request_id: BookingId,
    ) -> Result<BookingRequest, EngineError> {
        self.timed("reject", self.reject_inner(principal, request_id))
            .await
    }

    async fn reject_inner(
        &self,
        principal: &Principal,
        request_id: BookingId,
    ) -> Result<BookingRequest, EngineError> {
        let (tx, removed) = self
            .bounded("reject", async {
                let mut tx = self.store.begin().await?;
                let request = tx
                    .load_requested(request_id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(format!("booking request {request_id}")))?;
                if !principal.may_act_for(&request.username) {
                    return Err(EngineError::Unauthorized("not the owner of this request"));
                }
                let removed = tx.delete_requested(request_id).await?;
                Ok::<_, EngineError>((tx, removed))
            })
            .await?;
        tx.commit().await?;

        info!(id = %request_id, username = %removed.username, by = %principal.username, "booking request deleted");
        Ok(removed)
    }

    /// Delete a confirmed booking (single or one occurrence), freeing its span.
    /// Allowed for admins and the booking's owner.
    pub async fn delete_approved(
        &self,
        principal: &Principal,
        booking_id: BookingId,
    ) -> Result<ConfirmedBooking, EngineError> {
        self.timed("delete_approved", self.delete_approved_inner(principal, booking_id))
            .await
    }

    async fn delete_approved_inner(
        &self,
        principal: &Principal,
        booking_id: BookingId,
    ) -> Result<ConfirmedBooking, EngineError> {
        let (tx, removed) = self
            .bounded("delete_approved", async {
                let mut tx = self.store.begin().await?;
                let booking = tx
                    .load_confirmed(booking_id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;
                if !principal.may_act_for(&booking.username) {
                    return Err(EngineError::Unauthorized("not the owner of this booking"));
                }
                let removed = tx.delete_approved(booking_id).await?;
                Ok::<_, EngineError>((tx, removed))
            })
            .await?;
        tx.commit().await?;

        info!(
            id = %booking_id,
            facility = %removed.facility,
            span = %removed.span,
            by = %principal.username,
            "confirmed booking deleted"
        );
        Ok(removed)
    }

    /// Create a user. `password_hash` is stored as given; hashing belongs to the auth layer.
    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<User, EngineError> {
        self.timed("create_user", self.create_user_inner(username, password_hash, is_admin))
            .await
    }

    async fn create_user_inner(
        &self,
        username: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<User, EngineError> {
        validate_username(username)?;
        let (tx, user) = self
            .bounded("create_user", async {
                let mut tx = self.store.begin().await?;
                let user = tx.create_user(username, password_hash, is_admin).await?;
                Ok::<_, EngineError>((tx, user))
            })
            .await?;
        tx.commit().await?;
        info!(id = %user.id, username = %user.username, is_admin, "user created");
        Ok(user)
    }
}

async fn approve_single<T: StoreTx + ?Sized>(
    tx: &mut T,
    request: &BookingRequest,
) -> Result<Approval, EngineError> {
    // Another approval may have taken the slot since submission.
    check_no_conflict(tx, &request.occupancy(), Some(request.id)).await?;
    let booking = tx.promote_to_approved(request.id).await?;
    Ok(Approval {
        request_id: request.id,
        occurrences: vec![OccurrenceOutcome {
            span: booking.span,
            status: OccurrenceStatus::Inserted(booking.id),
        }],
    })
}

/// Decide every occurrence up front, then hand the accepted ones to the store in one call.
async fn approve_recurring<T: StoreTx + ?Sized>(
    tx: &mut T,
    request: &BookingRequest,
    policy: RecurrencePolicy,
) -> Result<Approval, EngineError> {
    let series = WeeklySeries::for_request(request)
        .ok_or_else(|| EngineError::Validation("invalid recurrence on stored request".into()))?;

    // `None` marks an accepted occurrence whose id is filled in after insertion.
    let mut decisions: Vec<(Span, Option<BookingId>)> = Vec::with_capacity(series.weeks() as usize);
    let mut accepted: Vec<Span> = Vec::with_capacity(series.weeks() as usize);

    for span in &series {
        let occupancy = Occupancy::new(request.facility.clone(), span);
        let conflicting = match tx.confirmed_overlap(&occupancy, None).await? {
            Some(id) => Some(id),
            // Occurrences of one series are compared in memory as well.
            None => accepted
                .iter()
                .any(|a| a.overlaps(&span))
                .then_some(request.id),
        };

        match (conflicting, policy) {
            (Some(conflicting_id), RecurrencePolicy::AllOrNothing) => {
                return Err(EngineError::Conflict {
                    facility: occupancy.facility,
                    span,
                    conflicting_id,
                });
            }
            (Some(conflicting_id), RecurrencePolicy::SkipConflicts) => {
                decisions.push((span, Some(conflicting_id)));
            }
            (None, _) => {
                accepted.push(span);
                decisions.push((span, None));
            }
        }
    }

    let mut inserted = tx
        .expand_and_approve_recurring(request.id, &accepted)
        .await?
        .into_iter();

    let mut occurrences = Vec::with_capacity(decisions.len());
    for (span, conflict) in decisions {
        let status = match conflict {
            Some(conflicting_id) => OccurrenceStatus::Skipped { conflicting_id },
            None => {
                let id = inserted.next().ok_or_else(|| {
                    EngineError::Storage(crate::store::StoreError::Wal(
                        "store returned fewer occurrence ids than inserted".into(),
                    ))
                })?;
                OccurrenceStatus::Inserted(id)
            }
        };
        occurrences.push(OccurrenceOutcome { span, status });
    }

    Ok(Approval {
        request_id: request.id,
        occurrences,
    })
}
