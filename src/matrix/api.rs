//! Thin typed façade over the Matrix client-server API (component B).
//!
//! Every method builds a `/_matrix/<protocol>/<version>/...` path and
//! delegates to [`HttpTransport`]; this module holds no state beyond the
//! transport and a transaction ID generator, matching the teacher's
//! "stateless façade on top of the HTTP layer" shape.

use std::collections::HashMap;

use reqwest::Method;
use serde_json::{Value, json};

use crate::domain_types::{EventId, EventType, RoomId, UserId};
use crate::http::HttpTransport;

use super::error::MatrixApiError;
use super::events::SyncResponse;
use super::txn::TransactionIdGenerator;

/// Stateless façade over the Matrix client-server and admin APIs.
pub struct MatrixApi {
    transport: HttpTransport,
    txn_ids: TransactionIdGenerator,
}

type ApiResult<T> = Result<T, MatrixApiError>;

impl MatrixApi {
    /// Wraps an [`HttpTransport`] with the Matrix endpoint surface.
    pub fn new(transport: HttpTransport) -> Self {
        Self {
            transport,
            txn_ids: TransactionIdGenerator::new(),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> ApiResult<Value> {
        self.call(Method::GET, path, query, None, false).await
    }

    async fn authed_call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> ApiResult<Value> {
        self.call(method, path, &[], body, false).await
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
        skip_auth: bool,
    ) -> ApiResult<Value> {
        let response = self
            .transport
            .request(method, path, query, body, &HashMap::new(), skip_auth)
            .await
            .map_err(MatrixApiError::classify)?;
        Ok(response.parsed.unwrap_or(Value::Null))
    }

    /// `POST /_matrix/client/v3/login`
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<Value> {
        let body = json!({
            "type": "m.login.password",
            "identifier": {"type": "m.id.user", "user": username},
            "password": password,
        });
        self.call(Method::POST, "/_matrix/client/v3/login", &[], Some(body), true)
            .await
    }

    /// `POST /_matrix/client/v3/logout`
    pub async fn logout(&self) -> ApiResult<Value> {
        self.authed_call(Method::POST, "/_matrix/client/v3/logout", None)
            .await
    }

    /// `GET /_matrix/client/v3/account/whoami`
    pub async fn whoami(&self) -> ApiResult<Value> {
        self.get("/_matrix/client/v3/account/whoami", &[]).await
    }

    /// `POST /_matrix/client/v3/register`
    pub async fn register(&self, username: &str, password: &str) -> ApiResult<Value> {
        let body = json!({"username": username, "password": password, "auth": {"type": "m.login.dummy"}});
        self.call(Method::POST, "/_matrix/client/v3/register", &[], Some(body), true)
            .await
    }

    /// `GET /_matrix/client/v3/sync`
    pub async fn sync(&self, timeout_ms: u64, since: Option<&str>) -> ApiResult<SyncResponse> {
        let timeout_str = timeout_ms.to_string();
        let mut query = vec![("timeout", timeout_str.as_str())];
        if let Some(token) = since {
            query.push(("since", token));
        }
        let value = self.get("/_matrix/client/v3/sync", &query).await?;
        serde_json::from_value(value)
            .map_err(|e| MatrixApiError::RequestError {
                status: 200,
                code: "M_BAD_JSON".to_string(),
                message: format!("failed to decode sync response: {e}"),
            })
    }

    /// `POST /_matrix/client/v3/rooms/{roomId}/join`
    pub async fn join(&self, room_id: &RoomId) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/rooms/{room_id}/join");
        self.authed_call(Method::POST, &path, None).await
    }

    /// `POST /_matrix/client/v3/rooms/{roomId}/leave`
    pub async fn leave(&self, room_id: &RoomId) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/rooms/{room_id}/leave");
        self.authed_call(Method::POST, &path, None).await
    }

    /// `POST /_matrix/client/v3/rooms/{roomId}/invite`
    pub async fn invite(&self, room_id: &RoomId, user_id: &UserId) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/rooms/{room_id}/invite");
        self.authed_call(Method::POST, &path, Some(json!({"user_id": user_id.to_string()})))
            .await
    }

    /// `POST /_matrix/client/v3/rooms/{roomId}/kick`
    pub async fn kick(&self, room_id: &RoomId, user_id: &UserId, reason: Option<&str>) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/rooms/{room_id}/kick");
        self.authed_call(
            Method::POST,
            &path,
            Some(json!({"user_id": user_id.to_string(), "reason": reason})),
        )
        .await
    }

    /// `POST /_matrix/client/v3/rooms/{roomId}/ban`
    pub async fn ban(&self, room_id: &RoomId, user_id: &UserId, reason: Option<&str>) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/rooms/{room_id}/ban");
        self.authed_call(
            Method::POST,
            &path,
            Some(json!({"user_id": user_id.to_string(), "reason": reason})),
        )
        .await
    }

    /// `POST /_matrix/client/v3/rooms/{roomId}/unban`
    pub async fn unban(&self, room_id: &RoomId, user_id: &UserId) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/rooms/{room_id}/unban");
        self.authed_call(Method::POST, &path, Some(json!({"user_id": user_id.to_string()})))
            .await
    }

    /// `PUT /_matrix/client/v3/rooms/{roomId}/send/{eventType}/{txnId}`
    pub async fn send_message_event(
        &self,
        room_id: &RoomId,
        event_type: &EventType,
        content: Value,
    ) -> ApiResult<Value> {
        let txn_id = self.txn_ids.next();
        let path = format!("/_matrix/client/v3/rooms/{room_id}/send/{event_type}/{txn_id}");
        self.authed_call(Method::PUT, &path, Some(content)).await
    }

    /// `PUT /_matrix/client/v3/rooms/{roomId}/state/{eventType}[/{stateKey}]`
    pub async fn send_state_event(
        &self,
        room_id: &RoomId,
        event_type: &EventType,
        state_key: Option<&str>,
        content: Value,
    ) -> ApiResult<Value> {
        let path = match state_key {
            Some(key) => format!("/_matrix/client/v3/rooms/{room_id}/state/{event_type}/{key}"),
            None => format!("/_matrix/client/v3/rooms/{room_id}/state/{event_type}"),
        };
        self.authed_call(Method::PUT, &path, Some(content)).await
    }

    /// `GET /_matrix/client/v3/rooms/{roomId}/state`
    pub async fn get_room_state(&self, room_id: &RoomId) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/rooms/{room_id}/state");
        self.get(&path, &[]).await
    }

    /// `GET /_matrix/client/v3/rooms/{roomId}/joined_members`
    pub async fn get_room_joined_members(&self, room_id: &RoomId) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/rooms/{room_id}/joined_members");
        self.get(&path, &[]).await
    }

    /// `GET /_matrix/client/v3/rooms/{roomId}/members`
    pub async fn get_room_members(&self, room_id: &RoomId) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/rooms/{room_id}/members");
        self.get(&path, &[]).await
    }

    /// `GET /_matrix/client/v3/rooms/{roomId}/aliases`
    pub async fn get_room_aliases(&self, room_id: &RoomId) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/rooms/{room_id}/aliases");
        self.get(&path, &[]).await
    }

    /// `GET /_matrix/client/v3/user/{userId}/account_data/{type}`
    pub async fn get_account_data(&self, user_id: &UserId, event_type: &EventType) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/user/{user_id}/account_data/{event_type}");
        self.get(&path, &[]).await
    }

    /// `PUT /_matrix/client/v3/user/{userId}/account_data/{type}`
    pub async fn set_account_data(
        &self,
        user_id: &UserId,
        event_type: &EventType,
        content: Value,
    ) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/user/{user_id}/account_data/{event_type}");
        self.authed_call(Method::PUT, &path, Some(content)).await
    }

    /// `GET /_matrix/client/v3/presence/{userId}/status`
    pub async fn get_presence_status(&self, user_id: &UserId) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/presence/{user_id}/status");
        self.get(&path, &[]).await
    }

    /// `PUT /_matrix/client/v3/presence/{userId}/status`
    pub async fn set_presence_status(&self, user_id: &UserId, presence: &str, status_msg: Option<&str>) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/presence/{user_id}/status");
        self.authed_call(Method::PUT, &path, Some(json!({"presence": presence, "status_msg": status_msg})))
            .await
    }

    /// `GET /_matrix/client/v3/profile/{userId}/displayname`
    pub async fn get_display_name(&self, user_id: &UserId) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/profile/{user_id}/displayname");
        self.get(&path, &[]).await
    }

    /// `PUT /_matrix/client/v3/profile/{userId}/displayname`
    pub async fn set_display_name(&self, user_id: &UserId, display_name: &str) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/profile/{user_id}/displayname");
        self.authed_call(Method::PUT, &path, Some(json!({"displayname": display_name})))
            .await
    }

    /// `POST /_matrix/client/v3/createRoom`
    pub async fn create_room(&self, options: Value) -> ApiResult<Value> {
        self.authed_call(Method::POST, "/_matrix/client/v3/createRoom", Some(options))
            .await
    }

    /// `GET /_matrix/client/v3/publicRooms`
    pub async fn get_public_rooms(&self) -> ApiResult<Value> {
        self.get("/_matrix/client/v3/publicRooms", &[]).await
    }

    /// `GET /_matrix/client/v3/user/{userId}/rooms/{roomId}/tags`
    pub async fn get_user_tags(&self, user_id: &UserId, room_id: &RoomId) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/user/{user_id}/rooms/{room_id}/tags");
        self.get(&path, &[]).await
    }

    /// `PUT /_matrix/client/v3/user/{userId}/rooms/{roomId}/tags/{tag}`
    pub async fn add_user_tag(&self, user_id: &UserId, room_id: &RoomId, tag: &str, order: Option<f64>) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/user/{user_id}/rooms/{room_id}/tags/{tag}");
        self.authed_call(Method::PUT, &path, Some(json!({"order": order}))).await
    }

    /// `DELETE /_matrix/client/v3/user/{userId}/rooms/{roomId}/tags/{tag}`
    pub async fn remove_user_tag(&self, user_id: &UserId, room_id: &RoomId, tag: &str) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/user/{user_id}/rooms/{room_id}/tags/{tag}");
        self.authed_call(Method::DELETE, &path, None).await
    }

    /// `POST /_matrix/client/v3/rooms/{roomId}/report/{eventId}`
    pub async fn report_event(&self, room_id: &RoomId, event_id: &EventId, reason: &str, score: i64) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/rooms/{room_id}/report/{event_id}");
        self.authed_call(Method::POST, &path, Some(json!({"reason": reason, "score": score})))
            .await
    }

    /// `PUT /_matrix/client/v3/rooms/{roomId}/redact/{eventId}/{txnId}`
    pub async fn redact_event(&self, room_id: &RoomId, event_id: &EventId, reason: Option<&str>) -> ApiResult<Value> {
        let txn_id = self.txn_ids.next();
        let path = format!("/_matrix/client/v3/rooms/{room_id}/redact/{event_id}/{txn_id}");
        self.authed_call(Method::PUT, &path, Some(json!({"reason": reason}))).await
    }

    /// `PUT /_matrix/client/v3/rooms/{roomId}/typing/{userId}`
    pub async fn set_typing(&self, room_id: &RoomId, user_id: &UserId, typing: bool, timeout_ms: u64) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v3/rooms/{room_id}/typing/{user_id}");
        self.authed_call(Method::PUT, &path, Some(json!({"typing": typing, "timeout": timeout_ms})))
            .await
    }

    /// `POST /_matrix/client/v3/keys/query`
    pub async fn keys_query(&self, device_keys: Value) -> ApiResult<Value> {
        self.authed_call(Method::POST, "/_matrix/client/v3/keys/query", Some(json!({"device_keys": device_keys})))
            .await
    }

    /// `GET /_matrix/client/v1/rooms/{roomId}/hierarchy`
    pub async fn get_hierarchy(&self, room_id: &RoomId) -> ApiResult<Value> {
        let path = format!("/_matrix/client/v1/rooms/{room_id}/hierarchy");
        self.get(&path, &[]).await
    }

    /// `GET /_synapse/admin/v1/...` — generic admin endpoint passthrough used
    /// by operator tooling that needs Synapse-specific administration calls
    /// not otherwise exposed by this façade.
    pub async fn admin_get(&self, subpath: &str) -> ApiResult<Value> {
        let path = format!("/_synapse/admin/{subpath}");
        self.get(&path, &[]).await
    }

    /// Grants the underlying transport access to an access token obtained
    /// via [`MatrixApi::login`] or `/register`.
    pub fn set_access_token(&self, token: Option<String>) {
        self.transport.set_access_token(token);
    }
}
