//! Per-user profile cache used only when `client_cache` is `all`
//! (component E).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cache::Cache;
use crate::domain_types::UserId;
use crate::matrix::{MatrixApi, MatrixApiError};

/// TTL applied to cached display names.
pub const DISPLAY_NAME_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// A remembered Matrix user, caching the one profile field this crate needs.
pub struct UserProfile {
    user_id: UserId,
    matrix: Arc<MatrixApi>,
    cache: Arc<dyn Cache>,
}

impl UserProfile {
    /// Builds a profile handle for `user_id`.
    pub fn new(user_id: UserId, matrix: Arc<MatrixApi>, cache: Arc<dyn Cache>) -> Self {
        Self { user_id, matrix, cache }
    }

    fn cache_key(&self) -> String {
        format!("user_displayname/{}", self.user_id)
    }

    /// Returns the user's display name, or the mxid if none is set or the
    /// homeserver is unreachable.
    pub async fn display_name(&self) -> Result<String, MatrixApiError> {
        let cache_key = self.cache_key();
        if let Some(bytes) = self.cache.read(&cache_key).await {
            if let Ok(name) = String::from_utf8(bytes) {
                return Ok(name);
            }
        }
        let response = self.matrix.get_display_name(&self.user_id).await?;
        let name = response
            .get("displayname")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.user_id.to_string());
        self.cache
            .write(&cache_key, name.clone().into_bytes(), Some(DISPLAY_NAME_CACHE_TTL))
            .await;
        Ok(name)
    }
}
