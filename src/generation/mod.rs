//! Generation orchestration.
//!
//! For a requested batch of N images: build over-generated prompt
//! specs, fan out to the image-model adapter with bounded parallelism,
//! upload every output to object storage, persist generation rows, then
//! hand the survivors to the selector and return exactly the best N.
//! A single adapter failure never cancels siblings; cancelled requests
//! stop persisting but let in-flight provider calls finish.

pub mod adapters;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::interfaces::object_store::{ObjectMetadata, ObjectStore};
use crate::prompting::{BuildOptions, BuiltPrompt, PromptBuilder};
use crate::selection::{SelectionCandidate, Selector};
use crate::storage::{CoverageStore, GenerationStore, ProfileStore};
use crate::types::{Generation, GenerationStatus, StyleProfile};

pub use adapters::{
    AdapterOutput, FluxAdapter, GenerationSettings, ImageModelAdapter, ImagePayload, QualityTier,
    StubAdapter,
};

/// Upload attempts per image on transient object-store failures.
const UPLOAD_ATTEMPTS: u32 = 3;

/// Options for one generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// How many images the user wants back.
    pub count: usize,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub is_exploration: bool,
    #[serde(default)]
    pub tier: QualityTier,
    /// Seed for deterministic builds (tests, replays).
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Progress event emitted while a batch runs, SSE-shaped.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationProgress {
    pub processed: usize,
    pub total: usize,
    pub preview_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_prompt: Option<String>,
}

/// Cooperative cancellation flag for one request.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One produced candidate kept in memory until selection.
struct ProducedCandidate {
    generation: Generation,
    spec: crate::types::PromptSpec,
    bytes: Option<Bytes>,
    reported_quality: Option<f64>,
}

/// The generation orchestrator.
#[derive(Clone)]
pub struct GenerationOrchestrator {
    config: Arc<EngineConfig>,
    builder: PromptBuilder,
    selector: Selector,
    adapter: Arc<dyn ImageModelAdapter>,
    object_store: Arc<dyn ObjectStore>,
    generations: GenerationStore,
    coverage: CoverageStore,
    profiles: ProfileStore,
    client: reqwest::Client,
}

impl GenerationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<EngineConfig>,
        builder: PromptBuilder,
        selector: Selector,
        adapter: Arc<dyn ImageModelAdapter>,
        object_store: Arc<dyn ObjectStore>,
        generations: GenerationStore,
        coverage: CoverageStore,
        profiles: ProfileStore,
    ) -> Self {
        Self {
            config,
            builder,
            selector,
            adapter,
            object_store,
            generations,
            coverage,
            profiles,
            client: reqwest::Client::new(),
        }
    }

    pub fn adapter(&self) -> &Arc<dyn ImageModelAdapter> {
        &self.adapter
    }

    /// Run one batch end to end. Returns the selected generations in
    /// pick order; per-item failures ride along as `failed` rows, never
    /// as batch errors.
    pub async fn generate(
        &self,
        user_id: &str,
        request: &GenerateRequest,
        progress: Option<mpsc::Sender<GenerationProgress>>,
        cancel: CancelToken,
    ) -> EngineResult<Vec<Generation>> {
        if request.count == 0 {
            return Err(EngineError::validation("count must be at least 1"));
        }
        let profile = self
            .profiles
            .get(user_id)?
            .unwrap_or_else(|| StyleProfile {
                user_id: user_id.to_string(),
                ..Default::default()
            });

        // Over-generation plan: ⌈N·(1+b)⌉ candidates as whole prompts
        // of k paired outputs.
        let k = self.config.images_per_prompt;
        let total_candidates = self.config.overgen_candidates(request.count);
        let prompt_count = total_candidates / k;

        let mut prompts: Vec<BuiltPrompt> = Vec::with_capacity(prompt_count);
        for i in 0..prompt_count {
            let options = BuildOptions {
                command: request.command.clone(),
                is_exploration: request.is_exploration,
                seed: request.seed.map(|s| s.wrapping_add(i as u64)),
            };
            prompts.push(self.builder.build(user_id, &profile, &options)?);
        }

        let settings = GenerationSettings {
            tier: request.tier,
            seed: request.seed,
            ..Default::default()
        };

        // Fan out prompt × index pairs with bounded parallelism.
        let jobs: Vec<(usize, usize)> = (0..prompt_count)
            .flat_map(|p| (0..k).map(move |i| (p, i)))
            .collect();
        let total = jobs.len();
        let in_flight = self.config.generation_concurrency * k;
        let state = Arc::new(Mutex::new(ProgressState {
            processed: 0,
            previews: VecDeque::new(),
        }));
        let produced: Arc<Mutex<Vec<ProducedCandidate>>> =
            Arc::new(Mutex::new(Vec::with_capacity(total)));

        futures::stream::iter(jobs)
            .for_each_concurrent(in_flight, |(prompt_index, generation_index)| {
                let prompt = prompts[prompt_index].clone();
                let settings = settings.clone();
                let cancel = cancel.clone();
                let progress = progress.clone();
                let state = state.clone();
                let produced = produced.clone();
                let user_id = user_id.to_string();
                async move {
                    let candidate = self
                        .produce_one(&user_id, &prompt, generation_index, &settings, &cancel)
                        .await;

                    let mut state = state.lock().await;
                    state.processed += 1;
                    if let Some(candidate) = &candidate {
                        if candidate.generation.status != GenerationStatus::Failed {
                            state.previews.push_back(candidate.generation.url.clone());
                            while state.previews.len() > crate::ingestion::PREVIEW_WINDOW {
                                state.previews.pop_front();
                            }
                        }
                    }
                    let event = GenerationProgress {
                        processed: state.processed,
                        total,
                        preview_urls: state.previews.iter().cloned().collect(),
                        current_prompt: Some(prompt.text.clone()),
                    };
                    // Sent under the lock so delivered events stay
                    // monotone in `processed`; slow consumers lose
                    // events, never stall generation.
                    if let Some(tx) = &progress {
                        let _ = tx.try_send(event);
                    }
                    drop(state);
                    if let Some(candidate) = candidate {
                        produced.lock().await.push(candidate);
                    }
                }
            })
            .await;

        if cancel.is_cancelled() {
            return Err(EngineError::cancelled("generation request cancelled"));
        }

        let produced = Arc::try_unwrap(produced)
            .map_err(|_| EngineError::capacity("generation workers still running"))?
            .into_inner();
        self.select_and_persist(user_id, request.count, &profile, produced)
            .await
    }

    /// Generate, upload, and persist one candidate. Failures become
    /// synthetic failed rows rather than batch errors.
    async fn produce_one(
        &self,
        user_id: &str,
        prompt: &BuiltPrompt,
        generation_index: usize,
        settings: &GenerationSettings,
        cancel: &CancelToken,
    ) -> Option<ProducedCandidate> {
        if cancel.is_cancelled() {
            return None;
        }

        let result = self
            .adapter
            .generate(&prompt.text, &prompt.negative_text, settings)
            .await;

        // Provider calls run to completion, but nothing is persisted
        // once the request is cancelled.
        if cancel.is_cancelled() {
            return None;
        }

        let generation_id = Uuid::new_v4().to_string();
        match result {
            Ok(output) => {
                match self
                    .store_output(user_id, &generation_id, &output)
                    .await
                {
                    Ok((url, bytes, width, height)) => {
                        let generation = Generation {
                            id: generation_id,
                            user_id: user_id.to_string(),
                            prompt_id: prompt.spec.id.clone(),
                            generation_index,
                            provider: self.adapter.name().to_string(),
                            url,
                            width,
                            height,
                            cost_cents: output.cost_cents,
                            created_at: Utc::now(),
                            quality_score: None,
                            status: GenerationStatus::Pending,
                            error: None,
                        };
                        if let Err(e) = self.generations.insert(&generation) {
                            tracing::error!(error = %e, "generation row insert failed");
                            return None;
                        }
                        Some(ProducedCandidate {
                            generation,
                            spec: prompt.spec.clone(),
                            bytes: Some(bytes),
                            reported_quality: output.reported_quality,
                        })
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "candidate upload failed");
                        self.persist_failure(user_id, &generation_id, prompt, generation_index, &e)
                    }
                }
            }
            Err(e) => {
                tracing::warn!(provider = self.adapter.name(), error = %e, "adapter call failed");
                self.persist_failure(user_id, &generation_id, prompt, generation_index, &e)
            }
        }
    }

    /// Synthetic failure record: visible per-item error, excluded from
    /// selection.
    fn persist_failure(
        &self,
        user_id: &str,
        generation_id: &str,
        prompt: &BuiltPrompt,
        generation_index: usize,
        error: &EngineError,
    ) -> Option<ProducedCandidate> {
        let generation = Generation {
            id: generation_id.to_string(),
            user_id: user_id.to_string(),
            prompt_id: prompt.spec.id.clone(),
            generation_index,
            provider: self.adapter.name().to_string(),
            url: String::new(),
            width: 0,
            height: 0,
            cost_cents: 0,
            created_at: Utc::now(),
            quality_score: None,
            status: GenerationStatus::Failed,
            error: Some(error.user_message()),
        };
        if let Err(e) = self.generations.insert(&generation) {
            tracing::error!(error = %e, "failure row insert failed");
            return None;
        }
        Some(ProducedCandidate {
            generation,
            spec: prompt.spec.clone(),
            bytes: None,
            reported_quality: None,
        })
    }

    /// Fetch provider output bytes if needed, upload with bounded
    /// retries, and return (cdn_url, bytes, width, height).
    async fn store_output(
        &self,
        user_id: &str,
        generation_id: &str,
        output: &AdapterOutput,
    ) -> EngineResult<(String, Bytes, u32, u32)> {
        let bytes = match &output.payload {
            ImagePayload::Bytes(bytes) => bytes.clone(),
            ImagePayload::Url(url) => {
                let response = self.client.get(url).send().await.map_err(|e| {
                    EngineError::transient(self.adapter.name(), e.to_string())
                })?;
                if !response.status().is_success() {
                    return Err(EngineError::transient(
                        self.adapter.name(),
                        format!("image fetch returned {}", response.status()),
                    ));
                }
                response.bytes().await.map_err(|e| {
                    EngineError::transient(self.adapter.name(), e.to_string())
                })?
            }
        };

        let (width, height) = image::load_from_memory(&bytes)
            .map(|img| {
                use image::GenericImageView;
                img.dimensions()
            })
            .unwrap_or((0, 0));

        let key = format!("users/{user_id}/generations/{generation_id}.png");
        let mut metadata = ObjectMetadata::new();
        metadata.insert("content-type".into(), "image/png".into());
        metadata.insert("generation-id".into(), generation_id.to_string());

        let mut last_error = None;
        for attempt in 0..UPLOAD_ATTEMPTS {
            match self
                .object_store
                .put(&key, bytes.clone(), metadata.clone())
                .await
            {
                Ok(stored) => return Ok((stored.cdn_url, bytes, width, height)),
                Err(e) if e.is_retryable() && attempt + 1 < UPLOAD_ATTEMPTS => {
                    tracing::debug!(attempt, error = %e, "upload retry");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| EngineError::capacity("upload retries exhausted")))
    }

    /// Run selection, persist scores and the coverage report, and
    /// return the chosen generations.
    async fn select_and_persist(
        &self,
        user_id: &str,
        count: usize,
        profile: &StyleProfile,
        produced: Vec<ProducedCandidate>,
    ) -> EngineResult<Vec<Generation>> {
        let candidates: Vec<SelectionCandidate> = produced
            .iter()
            .filter(|c| c.generation.status != GenerationStatus::Failed)
            .map(|c| SelectionCandidate {
                generation_id: c.generation.id.clone(),
                prompt_id: c.generation.prompt_id.clone(),
                spec: c.spec.clone(),
                bytes: c.bytes.clone(),
                width: c.generation.width,
                height: c.generation.height,
                adapter_score: c.reported_quality,
            })
            .collect();

        if candidates.is_empty() {
            // Whole batch failed: surface per-item errors, not a 500.
            return Ok(Vec::new());
        }

        let outcome = self.selector.select(&candidates, count, profile);
        for candidate in &candidates {
            let score = outcome.scores[&candidate.generation_id];
            let status = if outcome.selected_ids.contains(&candidate.generation_id) {
                GenerationStatus::Selected
            } else {
                GenerationStatus::Rejected
            };
            self.generations
                .set_score(&candidate.generation_id, score, status)?;
        }
        self.coverage.record(user_id, &outcome.report)?;

        let mut selected = Vec::with_capacity(outcome.selected_ids.len());
        for id in &outcome.selected_ids {
            if let Some(generation) = self.generations.get(id)? {
                selected.push(generation);
            }
        }
        Ok(selected)
    }
}

struct ProgressState {
    processed: usize,
    previews: VecDeque<String>,
}
