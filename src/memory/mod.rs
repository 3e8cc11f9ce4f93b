//! Agent memory, conversation memory, and the global knowledge base
//! (component D), plus the reaper that expires all three.

mod agent_memory;
mod conversation_memory;
mod knowledge_base;
mod reaper;

pub use agent_memory::AgentMemory;
pub use conversation_memory::ConversationMemory;
pub use knowledge_base::{KnowledgeBase, BROADCAST_EVENT_TYPE, DEFAULT_BROADCAST_TTL};
pub use reaper::{Reaper, DEFAULT_CONVERSATION_STALE_AFTER, DEFAULT_REAPER_INTERVAL};
