//! HTTP server: application state wiring and the axum router.

pub mod routes;

use std::sync::Arc;

use dashmap::DashMap;

use crate::bandit::BanditStore;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::extraction::DescriptorExtractor;
use crate::feedback::{CritiqueParser, FeedbackProcessor};
use crate::generation::{GenerationOrchestrator, ImageModelAdapter};
use crate::ingestion::{IngestionPipeline, ProgressStream};
use crate::interfaces::object_store::ObjectStore;
use crate::interfaces::vision::VisionModel;
use crate::prompting::PromptBuilder;
use crate::rlhf::RlhfStore;
use crate::selection::Selector;
use crate::storage::{
    BanditStateStore, CoverageStore, Database, DescriptorStore, FeedbackLogStore,
    GenerationStore, PortfolioStore, ProfileStore, PromptStore, RlhfWeightStore,
};

pub use routes::app_router;

/// Shared application state, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub portfolios: PortfolioStore,
    pub descriptors: DescriptorStore,
    pub profiles: ProfileStore,
    pub prompts: PromptStore,
    pub generations: GenerationStore,
    pub coverage: CoverageStore,
    pub bandit: BanditStore,
    pub rlhf: RlhfStore,
    pub pipeline: IngestionPipeline,
    pub orchestrator: GenerationOrchestrator,
    pub feedback: FeedbackProcessor,
    pub object_store: Arc<dyn ObjectStore>,
    /// Progress streams parked between POST /ingest and the SSE
    /// subscription, keyed by portfolio id.
    pub progress_streams: Arc<DashMap<String, ProgressStream>>,
}

impl AppState {
    /// Wire the full engine from its injected externals.
    pub fn new(
        config: Arc<EngineConfig>,
        db: Database,
        object_store: Arc<dyn ObjectStore>,
        vision: Arc<dyn VisionModel>,
        adapter: Arc<dyn ImageModelAdapter>,
    ) -> EngineResult<Self> {
        let portfolios = PortfolioStore::new(db.clone());
        let descriptors = DescriptorStore::new(db.clone());
        let profiles = ProfileStore::new(db.clone());
        let prompts = PromptStore::new(db.clone());
        let generations = GenerationStore::new(db.clone());
        let coverage = CoverageStore::new(db.clone());
        let bandit = BanditStore::new(BanditStateStore::new(db.clone()), config.bandit_floor);
        let rlhf = RlhfStore::new(
            RlhfWeightStore::new(db.clone()),
            config.rlhf_learning_rate,
            config.rlhf_epsilon,
        );

        let extractor = DescriptorExtractor::new(vision.clone(), config.clone());
        let pipeline = IngestionPipeline::new(
            config.clone(),
            portfolios.clone(),
            descriptors.clone(),
            profiles.clone(),
            extractor,
            object_store.clone(),
        );

        let builder = PromptBuilder::new(
            config.clone(),
            bandit.clone(),
            rlhf.clone(),
            coverage.clone(),
            prompts.clone(),
        );
        let orchestrator = GenerationOrchestrator::new(
            config.clone(),
            builder,
            Selector::with_default_scorer(config.coverage_target_pct),
            adapter,
            object_store.clone(),
            generations.clone(),
            coverage.clone(),
            profiles.clone(),
        );

        let feedback = FeedbackProcessor::new(
            FeedbackLogStore::new(db.clone()),
            generations.clone(),
            prompts.clone(),
            bandit.clone(),
            rlhf.clone(),
            CritiqueParser::new(vision),
        );

        Ok(Self {
            config,
            portfolios,
            descriptors,
            profiles,
            prompts,
            generations,
            coverage,
            bandit,
            rlhf,
            pipeline,
            orchestrator,
            feedback,
            object_store,
            progress_streams: Arc::new(DashMap::new()),
        })
    }
}
