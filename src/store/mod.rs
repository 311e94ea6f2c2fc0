//! Persistence gateway: the storage contract the workflow engine depends on,
//! and the WAL-backed store that implements it.

mod tables;
mod wal_store;

pub use wal_store::{WalStore, WalTx};

use async_trait::async_trait;
use thiserror::Error;

use crate::model::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage operation timed out")]
    Timeout,
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("store is shut down")]
    Closed,
    #[error("row not found: {0}")]
    MissingRow(BookingId),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
}

/// One open transaction. Every call sees the writes made earlier in the same
/// transaction. Nothing is visible to others until [`StoreTx::commit`]; dropping
/// the transaction without committing rolls every write back.
#[async_trait]
pub trait StoreTx: Send {
    /// Id of a confirmed row (approved or recurring) on the same facility whose
    /// span overlaps `occupancy`, ignoring `exclude`.
    async fn confirmed_overlap(
        &mut self,
        occupancy: &Occupancy,
        exclude: Option<BookingId>,
    ) -> Result<Option<BookingId>, StoreError>;

    /// Insert a REQUESTED row. The store assigns the id.
    async fn insert_requested(
        &mut self,
        username: &str,
        booking: NewBooking,
    ) -> Result<BookingRequest, StoreError>;

    async fn load_requested(&mut self, id: BookingId) -> Result<Option<BookingRequest>, StoreError>;

    async fn load_confirmed(&mut self, id: BookingId) -> Result<Option<ConfirmedBooking>, StoreError>;

    /// Copy a REQUESTED row into the approved table under a new id and delete the original.
    async fn promote_to_approved(&mut self, id: BookingId) -> Result<ConfirmedBooking, StoreError>;

    /// Insert one occurrence of `template` into the recurring table.
    async fn insert_occurrence(
        &mut self,
        template: &BookingRequest,
        span: Span,
    ) -> Result<BookingId, StoreError>;

    async fn delete_requested(&mut self, id: BookingId) -> Result<BookingRequest, StoreError>;

    /// Delete a confirmed row from whichever confirmed table holds it.
    async fn delete_approved(&mut self, id: BookingId) -> Result<ConfirmedBooking, StoreError>;

    async fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>, StoreError>;

    async fn create_user(
        &mut self,
        username: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<User, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Insert every span in `occurrences` as a recurring row of request `id`, then delete the request.
    async fn expand_and_approve_recurring(
        &mut self,
        id: BookingId,
        occurrences: &[Span],
    ) -> Result<Vec<BookingId>, StoreError> {
        let template = self
            .load_requested(id)
            .await?
            .ok_or(StoreError::MissingRow(id))?;
        let mut ids = Vec::with_capacity(occurrences.len());
        for span in occurrences {
            ids.push(self.insert_occurrence(&template, *span).await?);
        }
        self.delete_requested(id).await?;
        Ok(ids)
    }
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError>;

    /// All three collections, restricted to `owner` when given, each ascending by start.
    async fn list(&self, owner: Option<&str>) -> Result<BookingListing, StoreError>;

    /// Confirmed rows whose span lies inside `window`, ascending by start.
    async fn upcoming(&self, window: Span) -> Result<Vec<ConfirmedBooking>, StoreError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
}
