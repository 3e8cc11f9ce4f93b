//! Per-agent Matrix client: the listener state machine and `/sync` loop
//! (component F), plus the room/user caches backing it (component E).

mod client;
mod room;
mod user;

pub use client::{Client, ClientCacheMode, ListenerState, RoomLookup, SyncConfig, SyncEventHandler};
pub use room::{PowerLevels, Room, MEMBER_CACHE_TTL};
pub use user::{UserProfile, DISPLAY_NAME_CACHE_TTL};
