//! Persistent storage for agent registry, agent key/value store, chat
//! sessions, and the global knowledge base.
//!
//! Functional core / imperative shell, per [`database::DatabaseConnection`]:
//! domain validation stays pure, `SQLx` queries live only in the
//! `Sqlite*Storage` implementations below.

mod agent_storage;
mod agent_store;
mod chat_session_storage;
mod database;
mod knowledge_base_storage;
mod traits;

pub use agent_storage::SqliteAgentStorage;
pub use agent_store::SqliteAgentStoreStorage;
pub use chat_session_storage::SqliteChatSessionStorage;
pub use database::{
    DatabaseConfig, DatabaseConnection, DatabaseError, DatabasePath, DatabaseResult, StorageError,
    StorageResult,
};
pub use knowledge_base_storage::SqliteKnowledgeBaseStorage;
pub use traits::{
    AgentStorage, AgentStoreStorage, ChatSession, ChatSessionStorage, HistoryMessage,
    KnowledgeBaseEntry, KnowledgeBaseStorage,
};
