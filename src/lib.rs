//! Booking core for shared facilities: conflict checking, weekly recurrence
//! expansion, and the request → approve/reject workflow over a WAL-backed store.

pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod recurrence;
pub mod store;
pub mod wal;
