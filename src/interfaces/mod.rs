//! Outbound adapter contracts.
//!
//! The engine talks to the outside world through the traits in this
//! module: object storage, the vision LLM, and (in
//! [`crate::generation::adapters`]) the image models. Implementations
//! are injected; nothing in the core reaches for a global client.

pub mod object_store;
pub mod vision;

pub use object_store::{FsObjectStore, ObjectMetadata, ObjectStore, StoredObject};
pub use vision::{
    AnalysisInput, AnalysisRequest, OpenAiVisionModel, ScriptedVisionModel, VisionModel,
};
