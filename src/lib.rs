//! # atelier
//!
//! Personal-style image-generation engine for fashion designers.
//!
//! A designer uploads a ZIP of reference photos; the engine extracts a
//! validated descriptor per image, aggregates them into a style
//! profile, and then synthesizes new on-brand images through a
//! Thompson-Sampling prompt builder, an over-generating orchestrator,
//! and a diversity-aware selector. Likes, dislikes, critiques, and
//! passive interactions feed back into the bandit posteriors and
//! token-level RLHF weights, closing the loop.

pub mod bandit;
pub mod config;
pub mod error;
pub mod extraction;
pub mod feedback;
pub mod generation;
pub mod ingestion;
pub mod interfaces;
pub mod profile;
pub mod prompting;
pub mod rlhf;
pub mod selection;
pub mod server;
pub mod storage;
pub mod taxonomy;
pub mod types;

pub use bandit::BanditStore;
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use extraction::DescriptorExtractor;
pub use feedback::FeedbackProcessor;
pub use generation::GenerationOrchestrator;
pub use ingestion::IngestionPipeline;
pub use prompting::PromptBuilder;
pub use rlhf::RlhfStore;
pub use selection::Selector;
pub use types::{Descriptor, Generation, PromptSpec, StyleProfile};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
