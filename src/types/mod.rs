//! Core domain types for the atelier engine.
//!
//! Everything that crosses a component boundary is defined here as a
//! serde-first struct or enum: portfolios and their images, the validated
//! descriptor schema, the aggregated style profile, prompt specs,
//! generations, and feedback events. Component-local types (bandit
//! posteriors, coverage reports, adapter payloads) live with their
//! components.

pub mod descriptor;
pub mod feedback;
pub mod generation;
pub mod portfolio;
pub mod profile;
pub mod prompt;

pub use descriptor::{
    ColorEntry, ContextualAttributes, Descriptor, DescriptorCorrection, DescriptorMetadata,
    FabricAnalysis, GarmentAnalysis, ModelDemographics, Photography, UNCERTAIN,
};
pub use feedback::{FeedbackEvent, FeedbackKind};
pub use generation::{Generation, GenerationStatus};
pub use portfolio::{ImageStatus, Portfolio, PortfolioImage, PortfolioStatus};
pub use profile::{SignaturePiece, SlotDistribution, StyleProfile};
pub use prompt::{AttributeSlot, PromptSpec, Specificity};

/// Opaque user identity. The HTTP layer authenticates; the engine trusts.
pub type UserId = String;
