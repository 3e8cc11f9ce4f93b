//! Agent records, lifecycle state machine, and the process-local registry
//! of running agents (components I and J).

mod record;
mod registry;

pub use record::{AgentLifecycleEvent, AgentRecord, AgentState};
pub use registry::{AgentRegistry, RegistryEntry};
