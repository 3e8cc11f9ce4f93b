//! Verifies the persisted chat history bound end to end, against a real
//! SQLite file (not a mock), matching the teacher's convention of one
//! integration test file per subsystem under `tests/`.

use conclave::agent::{AgentRecord, AgentState};
use conclave::domain_types::{AgentId, AgentName, BotClassId, HomeserverUrl, MessagesHandled, RoomId, UserId};
use conclave::storage::{
    AgentStorage, ChatSessionStorage, DatabaseConfig, DatabaseConnection, DatabasePath, HistoryMessage,
    SqliteAgentStorage, SqliteChatSessionStorage,
};

async fn test_connection() -> DatabaseConnection {
    let dir = tempfile::tempdir().unwrap();
    let path = DatabasePath::new(dir.path().join("conclave-test.db")).unwrap();
    let connection = DatabaseConnection::initialize(DatabaseConfig::new(path)).await.unwrap();
    std::mem::forget(dir);
    connection
}

fn test_agent() -> AgentRecord {
    AgentRecord {
        id: AgentId::generate(),
        name: AgentName::try_new("history-bound-agent").unwrap(),
        homeserver: HomeserverUrl::try_new("https://matrix.example.org").unwrap(),
        username: "history-bound".to_string(),
        bot_class: BotClassId::try_new("standard").unwrap(),
        state: AgentState::OnlineIdle,
        access_token: None,
        encrypted_password: None,
        settings: serde_json::json!({}),
        last_sync_token: None,
        last_active_at: None,
        messages_handled: MessagesHandled::default(),
    }
}

fn message(n: usize) -> HistoryMessage {
    HistoryMessage {
        event_id: format!("$event{n}"),
        sender: "@alice:example.org".to_string(),
        content: serde_json::json!({"body": format!("message {n}")}),
        timestamp: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn history_is_capped_at_twenty_and_count_matches_len() {
    let connection = test_connection().await;
    let agents = SqliteAgentStorage::new(connection.clone());
    let sessions = SqliteChatSessionStorage::new(connection);

    let agent = test_agent();
    agents.upsert_agent(&agent).await.unwrap();

    let user_id = UserId::try_new("@bob:example.org").unwrap();
    let room_id = RoomId::try_new("!room:example.org").unwrap();

    let mut last_session = None;
    for n in 0..30 {
        let session = sessions.add_message(agent.id, &user_id, &room_id, message(n)).await.unwrap();
        last_session = Some(session);
    }

    let session = last_session.unwrap();
    assert_eq!(session.message_history.len(), 20);
    assert_eq!(session.message_count, session.message_history.len() as u64);
    // the oldest 10 of 30 messages should have been dropped, newest kept
    assert_eq!(session.message_history.first().unwrap().event_id, "$event10");
    assert_eq!(session.message_history.last().unwrap().event_id, "$event29");
}

#[tokio::test]
async fn add_message_bumps_the_agents_handled_counter() {
    let connection = test_connection().await;
    let agents = SqliteAgentStorage::new(connection.clone());
    let sessions = SqliteChatSessionStorage::new(connection);

    let agent = test_agent();
    agents.upsert_agent(&agent).await.unwrap();

    let user_id = UserId::try_new("@bob:example.org").unwrap();
    let room_id = RoomId::try_new("!room:example.org").unwrap();

    sessions.add_message(agent.id, &user_id, &room_id, message(0)).await.unwrap();
    sessions.add_message(agent.id, &user_id, &room_id, message(1)).await.unwrap();

    let reloaded = agents.find_agent(agent.id).await.unwrap().unwrap();
    assert_eq!(reloaded.messages_handled.into_inner(), 2);
}
