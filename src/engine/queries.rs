use chrono::NaiveDateTime;
use tracing::debug;

use crate::model::*;

use super::conflict::validate_window;
use super::{Engine, EngineError};

impl Engine {
    /// Recurring occurrences, approved bookings and pending requests, each ascending by start.
    /// Non-admins only see their own rows.
    pub async fn list_for_user(&self, principal: &Principal) -> Result<BookingListing, EngineError> {
        self.timed("list_for_user", async {
            let owner = (!principal.is_admin).then_some(principal.username.as_str());
            let listing = self
                .bounded("list_for_user", async {
                    Ok::<_, EngineError>(self.store.list(owner).await?)
                })
                .await?;
            debug!(
                username = %principal.username,
                is_admin = principal.is_admin,
                recurring = listing.recurring.len(),
                approved = listing.approved.len(),
                requested = listing.requested.len(),
                "listed bookings"
            );
            Ok::<_, EngineError>(listing)
        })
        .await
    }

    /// Confirmed bookings lying inside `[start, end)`, across all users.
    pub async fn list_upcoming(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ConfirmedBooking>, EngineError> {
        let window = Span::new(start, end);
        self.timed("list_upcoming", async {
            validate_window(&window)?;
            let rows = self
                .bounded("list_upcoming", async {
                    Ok::<_, EngineError>(self.store.upcoming(window).await?)
                })
                .await?;
            debug!(window = %window, rows = rows.len(), "listed upcoming bookings");
            Ok::<_, EngineError>(rows)
        })
        .await
    }

    pub async fn find_user(&self, username: &str) -> Result<User, EngineError> {
        self.timed("find_user", async {
            let user = self
                .bounded("find_user", async {
                    Ok::<_, EngineError>(self.store.find_user_by_username(username).await?)
                })
                .await?;
            debug!(username, found = user.is_some(), "user lookup");
            user.ok_or_else(|| EngineError::NotFound(format!("user {username}")))
        })
        .await
    }
}
