pub mod agent_registry;
pub mod approval_log;
pub mod checkpoint_store;
pub mod knowledge_store;

pub use agent_registry::AgentRegistry;
pub use approval_log::ApprovalLog;
pub use checkpoint_store::CheckpointStore;
pub use knowledge_store::{KnowledgeRepository, ScoredInsight};
