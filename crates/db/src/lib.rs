//! Storage side of scriptor: the persisted mapping protocol, the script
//! registry that reconciles it with the engine, and an in-process engine.

pub mod mapping;
pub mod memory;
pub mod registry;

pub use mapping::{MappingRepo, MappingTemplates};
pub use memory::MemoryStore;
pub use registry::ScriptRegistry;
