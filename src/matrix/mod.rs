//! Matrix client-server API façade (component B).
//!
//! [`MatrixApi`] wraps an [`crate::http::HttpTransport`] with one method per
//! endpoint the rest of the crate needs; [`discover`] resolves a homeserver
//! base URL for a bare domain per the Matrix server discovery algorithm.

mod api;
mod discovery;
mod error;
mod events;
mod txn;

pub use api::MatrixApi;
pub use discovery::{discover, DiscoveryTarget};
pub use error::MatrixApiError;
pub use events::{MatrixEvent, PresenceSection, RoomEvents, SyncResponse, SyncRooms};
pub use txn::TransactionIdGenerator;
