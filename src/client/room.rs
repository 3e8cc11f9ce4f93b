//! A materialized room: display-name derivation, the member/alias/power-level
//! caches, and the state-event hooks that keep them fresh (component E).
//!
//! Grounded on the write-through discipline already used by
//! `crate::memory::agent_memory::AgentMemory`: the member list is pinned
//! locally on the room (an `Instant`-stamped copy, avoiding repeated
//! reconstruction) and mirrored into the shared [`Cache`] so other room
//! objects referencing the same id see the same 1-hour-TTL value.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::cache::Cache;
use crate::domain_types::{EventType, RoomId, UserId};
use crate::matrix::{MatrixApi, MatrixApiError, MatrixEvent};

/// Default TTL for the joined-members cache.
pub const MEMBER_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Parsed `m.room.power_levels` content.
#[derive(Debug, Clone, Default)]
pub struct PowerLevels {
    /// Per-user overrides
    pub users: HashMap<UserId, i64>,
    /// Power level assumed for users with no explicit override
    pub users_default: i64,
    /// Per-event-type power level required to send
    pub events: HashMap<EventType, i64>,
    /// Power level required for message events with no explicit override
    pub events_default: i64,
    /// Power level required for state events with no explicit override
    pub state_default: i64,
}

impl PowerLevels {
    /// Parses power levels from an `m.room.power_levels` event's content.
    pub fn from_content(content: &Value) -> Self {
        let users = content
            .get("users")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| {
                        let user = UserId::try_new(k.clone()).ok()?;
                        Some((user, v.as_i64().unwrap_or(0)))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let events = content
            .get("events")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| {
                        let event_type = EventType::try_new(k.clone()).ok()?;
                        Some((event_type, v.as_i64().unwrap_or(0)))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            users,
            users_default: content.get("users_default").and_then(Value::as_i64).unwrap_or(0),
            events,
            events_default: content.get("events_default").and_then(Value::as_i64).unwrap_or(0),
            state_default: content.get("state_default").and_then(Value::as_i64).unwrap_or(50),
        }
    }

    /// Effective power level for `user`, falling back to `users_default`.
    pub fn user_powerlevel(&self, user: &UserId) -> i64 {
        self.users.get(user).copied().unwrap_or(self.users_default)
    }

    /// Whether `user` may send `event_type`, comparing against the per-event
    /// override or the state/message default depending on `is_state`.
    pub fn user_can_send(&self, user: &UserId, event_type: &EventType, is_state: bool) -> bool {
        let required = self
            .events
            .get(event_type)
            .copied()
            .unwrap_or(if is_state { self.state_default } else { self.events_default });
        self.user_powerlevel(user) >= required
    }

    /// Whether `user` is an admin (power level ≥ 100).
    pub fn is_admin(&self, user: &UserId) -> bool {
        self.user_powerlevel(user) >= 100
    }

    /// Whether `user` is a moderator (power level ≥ 50).
    pub fn is_moderator(&self, user: &UserId) -> bool {
        self.user_powerlevel(user) >= 50
    }
}

struct PinnedMembers {
    fetched_at: Instant,
    members: Vec<UserId>,
}

/// A room this client has joined, invited to, or otherwise knows about.
pub struct Room {
    /// This room's id
    pub room_id: RoomId,
    matrix: Arc<MatrixApi>,
    cache: Arc<dyn Cache>,
    name: RwLock<Option<String>>,
    canonical_alias: RwLock<Option<String>>,
    power_levels: RwLock<Option<PowerLevels>>,
    members: RwLock<Option<PinnedMembers>>,
    account_data: RwLock<HashMap<EventType, Value>>,
}

impl Room {
    /// Materializes a room object with empty caches.
    pub fn new(room_id: RoomId, matrix: Arc<MatrixApi>, cache: Arc<dyn Cache>) -> Self {
        Self {
            room_id,
            matrix,
            cache,
            name: RwLock::new(None),
            canonical_alias: RwLock::new(None),
            power_levels: RwLock::new(None),
            members: RwLock::new(None),
            account_data: RwLock::new(HashMap::new()),
        }
    }

    fn member_cache_key(&self) -> String {
        format!("room_members/{}", self.room_id)
    }

    /// Returns the room's joined members, consulting the pinned local copy,
    /// then the shared cache, and finally the homeserver.
    ///
    /// # Errors
    ///
    /// Returns an error if the homeserver request fails.
    pub async fn joined_members(&self) -> Result<Vec<UserId>, MatrixApiError> {
        if let Some(pinned) = self.members.read().expect("lock poisoned").as_ref() {
            if pinned.fetched_at.elapsed() < MEMBER_CACHE_TTL {
                return Ok(pinned.members.clone());
            }
        }

        let cache_key = self.member_cache_key();
        if let Some(bytes) = self.cache.read(&cache_key).await {
            if let Ok(members) = serde_json::from_slice::<Vec<UserId>>(&bytes) {
                *self.members.write().expect("lock poisoned") = Some(PinnedMembers {
                    fetched_at: Instant::now(),
                    members: members.clone(),
                });
                return Ok(members);
            }
        }

        let response = self.matrix.get_room_joined_members(&self.room_id).await?;
        let members: Vec<UserId> = response
            .get("joined")
            .and_then(Value::as_object)
            .map(|map| map.keys().filter_map(|k| UserId::try_new(k.clone()).ok()).collect())
            .unwrap_or_default();

        if let Ok(bytes) = serde_json::to_vec(&members) {
            self.cache.write(&cache_key, bytes, Some(MEMBER_CACHE_TTL)).await;
        }
        *self.members.write().expect("lock poisoned") = Some(PinnedMembers {
            fetched_at: Instant::now(),
            members: members.clone(),
        });
        Ok(members)
    }

    /// Drops both the pinned and shared member caches.
    pub async fn invalidate_members(&self) {
        *self.members.write().expect("lock poisoned") = None;
        self.cache.delete(&self.member_cache_key()).await;
    }

    /// Returns this room's display name per the derivation order: explicit
    /// name, else canonical alias, else a description of joined members
    /// (excluding `self_user`).
    ///
    /// # Errors
    ///
    /// Returns an error if a member or profile lookup against the homeserver
    /// is required and fails.
    pub async fn display_name(&self, self_user: &UserId) -> Result<String, MatrixApiError> {
        if let Some(name) = self.name.read().expect("lock poisoned").clone() {
            if !name.is_empty() {
                return Ok(name);
            }
        }
        if let Some(alias) = self.canonical_alias.read().expect("lock poisoned").clone() {
            return Ok(alias);
        }

        let others: Vec<UserId> = self
            .joined_members()
            .await?
            .into_iter()
            .filter(|u| u != self_user)
            .collect();

        match others.len() {
            0 => Ok("Empty Room".to_string()),
            1 => Ok(self.display_name_of(&others[0]).await),
            2 => Ok(format!(
                "{} and {}",
                self.display_name_of(&others[0]).await,
                self.display_name_of(&others[1]).await
            )),
            n => Ok(format!("{} and {} others", self.display_name_of(&others[0]).await, n - 1)),
        }
    }

    async fn display_name_of(&self, user: &UserId) -> String {
        match self.matrix.get_display_name(user).await {
            Ok(value) => value
                .get("displayname")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| user.to_string()),
            Err(_) => user.to_string(),
        }
    }

    /// Returns this room's aliases, sorted and deduplicated. When
    /// `canonical_only` is false, also merges in `GET .../aliases`.
    ///
    /// # Errors
    ///
    /// Returns an error if `canonical_only` is false and the homeserver
    /// request fails.
    pub async fn aliases(&self, canonical_only: bool) -> Result<Vec<String>, MatrixApiError> {
        let mut aliases: Vec<String> = self.canonical_alias.read().expect("lock poisoned").clone().into_iter().collect();
        if !canonical_only {
            let response = self.matrix.get_room_aliases(&self.room_id).await?;
            if let Some(extra) = response.get("aliases").and_then(Value::as_array) {
                aliases.extend(extra.iter().filter_map(Value::as_str).map(str::to_string));
            }
        }
        aliases.sort();
        aliases.dedup();
        Ok(aliases)
    }

    /// Current power levels, if `m.room.power_levels` has been observed.
    pub fn power_levels(&self) -> Option<PowerLevels> {
        self.power_levels.read().expect("lock poisoned").clone()
    }

    /// Stores a room account-data entry (keyed by event type).
    pub fn set_account_data(&self, event_type: EventType, content: Value) {
        self.account_data.write().expect("lock poisoned").insert(event_type, content);
    }

    /// Reads a previously-stored room account-data entry.
    pub fn account_data(&self, event_type: &EventType) -> Option<Value> {
        self.account_data.read().expect("lock poisoned").get(event_type).cloned()
    }

    /// Updates this room's caches in response to a state event, invalidating
    /// whichever derived value the event type affects.
    pub async fn apply_state_event(&self, event: &MatrixEvent) {
        match event.event_type.to_string().as_str() {
            "m.room.name" => {
                let name = event.content.get("name").and_then(Value::as_str).map(str::to_string);
                *self.name.write().expect("lock poisoned") = name;
            }
            "m.room.canonical_alias" => {
                let alias = event.content.get("alias").and_then(Value::as_str).map(str::to_string);
                *self.canonical_alias.write().expect("lock poisoned") = alias;
            }
            "m.room.member" => {
                self.invalidate_members().await;
            }
            "m.room.power_levels" => {
                *self.power_levels.write().expect("lock poisoned") = Some(PowerLevels::from_content(&event.content));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn power_levels_admin_and_moderator_thresholds() {
        let levels = PowerLevels::from_content(&json!({
            "users": {"@alice:example.org": 100, "@mallory:example.org": 50},
            "users_default": 0,
        }));
        let alice = UserId::try_new("@alice:example.org").unwrap();
        let mallory = UserId::try_new("@mallory:example.org").unwrap();
        let bob = UserId::try_new("@bob:example.org").unwrap();
        assert!(levels.is_admin(&alice));
        assert!(!levels.is_admin(&bob));
        assert!(!levels.is_admin(&mallory));
        assert!(levels.is_moderator(&mallory));
        assert_eq!(levels.user_powerlevel(&bob), 0);
    }

    #[test]
    fn user_can_send_falls_back_to_state_default() {
        let levels = PowerLevels::from_content(&json!({"state_default": 50, "events_default": 0}));
        let bob = UserId::try_new("@bob:example.org").unwrap();
        let event_type = EventType::try_new("m.room.topic").unwrap();
        assert!(!levels.user_can_send(&bob, &event_type, true));
        assert!(levels.user_can_send(&bob, &event_type, false));
    }
}
