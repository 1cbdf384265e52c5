pub mod compiler;
pub mod constraint_resolver;
pub mod entity_index;
pub mod executor;
pub mod field_selector;
pub mod nlg;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod prompts;
