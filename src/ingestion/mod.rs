//! Portfolio ingestion pipeline.
//!
//! ZIP in, analyzed portfolio out: unpack, filter to images, dedupe by
//! content hash, store originals, then fan the extractor out over the
//! novel images with bounded parallelism, streaming progress the whole
//! way. Runs are cancellable; a superseded or deleted portfolio stops
//! persisting results even though in-flight model calls complete.

pub mod progress;

use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::extraction::DescriptorExtractor;
use crate::interfaces::object_store::{ObjectMetadata, ObjectStore};
use crate::interfaces::vision::AnalysisInput;
use crate::storage::{DescriptorStore, PortfolioStore, ProfileStore};
use crate::types::{ImageStatus, Portfolio, PortfolioImage, PortfolioStatus};

pub use progress::{ProgressEvent, ProgressStream, PREVIEW_WINDOW};

/// One image file pulled out of an upload archive.
struct UnpackedImage {
    name: String,
    bytes: Bytes,
    mime: &'static str,
    ext: &'static str,
    hash: String,
}

/// Live state for a running ingestion, registered per portfolio.
struct ActiveJob {
    cancelled: Arc<AtomicBool>,
}

/// The ingestion pipeline. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct IngestionPipeline {
    config: Arc<EngineConfig>,
    portfolios: PortfolioStore,
    descriptors: DescriptorStore,
    profiles: ProfileStore,
    extractor: DescriptorExtractor,
    object_store: Arc<dyn ObjectStore>,
    jobs: Arc<DashMap<String, Arc<ActiveJob>>>,
}

impl IngestionPipeline {
    pub fn new(
        config: Arc<EngineConfig>,
        portfolios: PortfolioStore,
        descriptors: DescriptorStore,
        profiles: ProfileStore,
        extractor: DescriptorExtractor,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            portfolios,
            descriptors,
            profiles,
            extractor,
            object_store,
            jobs: Arc::new(DashMap::new()),
        }
    }

    /// Ingest a fresh portfolio from a ZIP upload. Returns the created
    /// portfolio and the progress stream; analysis continues in the
    /// background.
    pub async fn ingest_zip(
        &self,
        user_id: &str,
        zip_bytes: Bytes,
    ) -> EngineResult<(Portfolio, ProgressStream)> {
        let portfolio = self.portfolios.create(user_id)?;
        // A new active portfolio supersedes any still-running ingestion.
        self.cancel_other_jobs(&portfolio.id);
        self.profiles.invalidate(user_id)?;
        let stream = self
            .ingest_into(portfolio.clone(), zip_bytes, Vec::new())
            .await?;
        Ok((portfolio, stream))
    }

    /// Add images to an existing portfolio: dedupe against what is
    /// already there, analyze only the novelties, and invalidate the
    /// cached profile.
    pub async fn add_images(
        &self,
        portfolio_id: &str,
        zip_bytes: Bytes,
    ) -> EngineResult<(Portfolio, ProgressStream)> {
        let portfolio = self.portfolios.get(portfolio_id)?;
        let known = self.portfolios.existing_hashes(portfolio_id)?;
        self.portfolios
            .set_status(portfolio_id, PortfolioStatus::Processing)?;
        self.profiles.invalidate(&portfolio.user_id)?;
        let stream = self.ingest_into(portfolio.clone(), zip_bytes, known).await?;
        Ok((portfolio, stream))
    }

    /// Cancel a running ingestion. In-flight model calls complete but
    /// their results are discarded.
    pub fn cancel(&self, portfolio_id: &str) {
        if let Some(job) = self.jobs.get(portfolio_id) {
            job.cancelled.store(true, Ordering::SeqCst);
        }
    }

    /// Flip the cancellation flag on every job except `keep`. Used when
    /// a new upload supersedes a user's active portfolio, and by
    /// graceful shutdown (with an empty `keep`).
    pub fn cancel_other_jobs(&self, keep: &str) {
        for entry in self.jobs.iter() {
            if entry.key() != keep {
                entry.value().cancelled.store(true, Ordering::SeqCst);
            }
        }
    }

    async fn ingest_into(
        &self,
        portfolio: Portfolio,
        zip_bytes: Bytes,
        known_hashes: Vec<String>,
    ) -> EngineResult<ProgressStream> {
        let unpacked = tokio::task::spawn_blocking(move || unpack_zip(&zip_bytes))
            .await
            .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;

        let (tx, rx) = progress::channel();

        // Dedupe within the archive and against existing images.
        let mut seen: std::collections::HashSet<String> = known_hashes.into_iter().collect();
        let mut novel = Vec::new();
        for image in unpacked {
            if seen.insert(image.hash.clone()) {
                novel.push(image);
            } else {
                tracing::debug!(hash = %image.hash, "duplicate image dropped");
            }
        }

        if novel.is_empty() {
            // Nothing analyzable: terminal failure without a single
            // extractor call.
            self.portfolios
                .set_status(&portfolio.id, PortfolioStatus::Failed)?;
            let _ = tx
                .send(ProgressEvent {
                    portfolio_id: portfolio.id.clone(),
                    processed: 0,
                    total: 0,
                    current_image: None,
                    status: "failed".to_string(),
                    errors: vec!["archive contained no new images".to_string()],
                    preview_urls: Vec::new(),
                })
                .await;
            return Ok(rx);
        }

        // Persist originals and image rows up front.
        let mut images: Vec<(PortfolioImage, &'static str)> = Vec::new();
        for (order, unpacked_image) in novel.iter().enumerate() {
            let key = format!(
                "portfolios/{}/{}.{}",
                portfolio.id, unpacked_image.hash, unpacked_image.ext
            );
            let mut metadata = ObjectMetadata::new();
            metadata.insert("content-type".into(), unpacked_image.mime.into());
            metadata.insert("original-name".into(), unpacked_image.name.clone());
            self.object_store
                .put(&key, unpacked_image.bytes.clone(), metadata)
                .await?;
            if let Some(row) = self.portfolios.insert_image(
                &portfolio.id,
                &key,
                &unpacked_image.hash,
                order as u32,
            )? {
                images.push((row, unpacked_image.mime));
            }
        }

        let job = Arc::new(ActiveJob {
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        self.jobs.insert(portfolio.id.clone(), job.clone());

        let pipeline = self.clone();
        let portfolio_id = portfolio.id.clone();
        tokio::spawn(async move {
            pipeline.analyze_batch(&portfolio_id, images, job, tx).await;
            pipeline.jobs.remove(&portfolio_id);
        });

        Ok(rx)
    }

    /// Run the extractor over the batch with bounded parallelism,
    /// streaming progress.
    async fn analyze_batch(
        &self,
        portfolio_id: &str,
        images: Vec<(PortfolioImage, &'static str)>,
        job: Arc<ActiveJob>,
        tx: progress::ProgressSender,
    ) {
        let total = images.len() as u32;
        let shared = Arc::new(Mutex::new(BatchState {
            processed: 0,
            errors: Vec::new(),
            previews: VecDeque::new(),
        }));

        futures::stream::iter(images)
            .for_each_concurrent(self.config.analysis_concurrency, |(image, mime)| {
                let pipeline = self.clone();
                let job = job.clone();
                let tx = tx.clone();
                let shared = shared.clone();
                let portfolio_id = portfolio_id.to_string();
                async move {
                    pipeline
                        .analyze_one(&portfolio_id, image, mime, job, tx, shared, total)
                        .await;
                }
            })
            .await;

        // Terminal status: analyzed when at least one descriptor
        // landed, failed otherwise. A cancelled run never reaches a
        // terminal transition.
        if job.cancelled.load(Ordering::SeqCst) {
            tracing::info!(portfolio_id, "ingestion cancelled before completion");
            return;
        }
        let analyzed = self
            .portfolios
            .count_by_status(portfolio_id, ImageStatus::Analyzed)
            .unwrap_or(0);
        let status = if analyzed > 0 {
            PortfolioStatus::Analyzed
        } else {
            PortfolioStatus::Failed
        };
        if let Err(e) = self.portfolios.set_status(portfolio_id, status) {
            tracing::error!(portfolio_id, error = %e, "failed to finalize portfolio");
        }

        let state = shared.lock().await;
        let _ = tx.try_send(ProgressEvent {
            portfolio_id: portfolio_id.to_string(),
            processed: state.processed,
            total,
            current_image: None,
            status: status.as_str().to_string(),
            errors: state.errors.clone(),
            preview_urls: state.previews.iter().cloned().collect(),
        });
    }

    async fn analyze_one(
        &self,
        portfolio_id: &str,
        image: PortfolioImage,
        mime: &'static str,
        job: Arc<ActiveJob>,
        tx: progress::ProgressSender,
        shared: Arc<Mutex<BatchState>>,
        total: u32,
    ) {
        if job.cancelled.load(Ordering::SeqCst) {
            return;
        }

        let result = match self.object_store.get(&image.storage_key).await {
            Ok(bytes) => {
                self.extractor
                    .extract(AnalysisInput::ImageBytes {
                        bytes: bytes.to_vec(),
                        mime,
                    })
                    .await
            }
            Err(e) => Err(e),
        };

        // Results from a cancelled or superseded run are discarded; the
        // external call was allowed to finish.
        if job.cancelled.load(Ordering::SeqCst)
            || !self.portfolios.is_active(portfolio_id).unwrap_or(false)
        {
            tracing::debug!(image = %image.id, "discarding result for inactive portfolio");
            return;
        }

        let mut failure: Option<String> = None;
        match result {
            Ok(extraction) => {
                let persisted = self
                    .descriptors
                    .replace(&image.id, portfolio_id, &extraction.descriptor)
                    .and_then(|_| {
                        self.descriptors.record_corrections(
                            &image.id,
                            portfolio_id,
                            &extraction.corrections,
                        )
                    })
                    .and_then(|_| {
                        self.portfolios
                            .set_image_status(&image.id, ImageStatus::Analyzed, None)
                    });
                if let Err(e) = persisted {
                    tracing::error!(image = %image.id, error = %e, "descriptor persistence failed");
                    failure = Some(e.user_message());
                }
            }
            Err(e) => {
                tracing::warn!(image = %image.id, error = %e, "image analysis failed");
                failure = Some(e.user_message());
            }
        }
        if let Some(reason) = &failure {
            let _ = self
                .portfolios
                .set_image_status(&image.id, ImageStatus::Failed, Some(reason));
        }

        let mut state = shared.lock().await;
        state.processed += 1;
        if let Some(reason) = failure {
            state.errors.push(format!("{}: {reason}", image.storage_key));
        } else {
            state.previews.push_back(self.object_store.signed_url(&image.storage_key, 3600));
            while state.previews.len() > PREVIEW_WINDOW {
                state.previews.pop_front();
            }
        }
        let event = ProgressEvent {
            portfolio_id: portfolio_id.to_string(),
            processed: state.processed,
            total,
            current_image: Some(image.storage_key.clone()),
            status: "processing".to_string(),
            errors: state.errors.clone(),
            preview_urls: state.previews.iter().cloned().collect(),
        };
        // Sent under the lock so delivered events stay monotone in
        // `processed`; a full or abandoned channel drops the event
        // rather than stalling analysis.
        let _ = tx.try_send(event);
    }
}

struct BatchState {
    processed: u32,
    errors: Vec<String>,
    previews: VecDeque<String>,
}

/// Unpack a ZIP archive, keeping only entries that sniff as images.
fn unpack_zip(zip_bytes: &Bytes) -> EngineResult<Vec<UnpackedImage>> {
    let cursor = std::io::Cursor::new(zip_bytes.as_ref());
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| EngineError::validation(format!("invalid zip archive: {e}")))?;

    let mut images = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| EngineError::validation(format!("corrupt zip entry: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        // macOS resource forks and hidden files are never portfolio
        // content.
        if name.contains("__MACOSX") || name.rsplit('/').next().is_some_and(|n| n.starts_with('.'))
        {
            continue;
        }
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        let Some((mime, ext)) = sniff_image(&bytes) else {
            tracing::debug!(entry = %name, "skipping non-image entry");
            continue;
        };
        let hash = hex::encode(Sha256::digest(&bytes));
        images.push(UnpackedImage {
            name,
            bytes: Bytes::from(bytes),
            mime,
            ext,
            hash,
        });
    }
    Ok(images)
}

/// Identify an image by magic bytes.
fn sniff_image(bytes: &[u8]) -> Option<(&'static str, &'static str)> {
    if bytes.len() < 12 {
        return None;
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(("image/jpeg", "jpg"));
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some(("image/png", "png"));
    }
    if bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some(("image/webp", "webp"));
    }
    if bytes.starts_with(b"GIF8") {
        return Some(("image/gif", "gif"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::object_store::FsObjectStore;
    use crate::interfaces::vision::ScriptedVisionModel;
    use crate::storage::test_support::temp_db;
    use std::io::Write;

    /// Minimal one-pixel PNG.
    pub(crate) fn tiny_png(seed: u8) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(1, 1, image::Rgb([seed, 0, 0]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    pub(crate) fn zip_of(files: &[(&str, Vec<u8>)]) -> Bytes {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::FileOptions::default();
            for (name, data) in files {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        Bytes::from(cursor.into_inner())
    }

    fn good_answer() -> serde_json::Value {
        serde_json::json!({
            "executive_summary": "Navy wool blazer.",
            "garments": [{
                "type": "blazer",
                "silhouette": "tailored",
                "fabric": { "primary_material": "wool suiting" },
                "color_palette": [{ "color_name": "navy" }],
                "construction_details": ["notched lapel"],
                "sleeve_length": "long",
                "collar": "notched lapel",
                "pattern": "solid",
                "confidence": 0.92
            }],
            "photography": {
                "shot_composition": { "type": "editorial" },
                "lighting": { "type": "studio lighting", "direction": "front" },
                "camera": { "angle": "eye level", "height": "full length" },
                "background": "seamless studio"
            },
            "styling_context": "tailored",
            "contextual_attributes": { "season": "autumn", "occasion": "work",
                                       "mood_aesthetic": "tailored/minimalist" }
        })
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        pipeline: IngestionPipeline,
        portfolios: PortfolioStore,
        descriptors: DescriptorStore,
        vision: Arc<ScriptedVisionModel>,
    }

    fn fixture() -> Fixture {
        let (dir, db) = temp_db();
        let vision = Arc::new(ScriptedVisionModel::new());
        let config = Arc::new(EngineConfig::default());
        let object_store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(
            dir.path().join("objects"),
            "http://cdn.test",
            b"secret".to_vec(),
        ));
        let portfolios = PortfolioStore::new(db.clone());
        let descriptors = DescriptorStore::new(db.clone());
        let pipeline = IngestionPipeline::new(
            config.clone(),
            portfolios.clone(),
            descriptors.clone(),
            ProfileStore::new(db.clone()),
            crate::extraction::DescriptorExtractor::new(vision.clone(), config),
            object_store,
        );
        Fixture {
            _dir: dir,
            pipeline,
            portfolios,
            descriptors,
            vision,
        }
    }

    async fn drain(mut rx: ProgressStream) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_five_image_zip_analyzes_all() {
        let f = fixture();
        for _ in 0..5 {
            f.vision.push(Ok(good_answer()));
        }
        let files: Vec<(String, Vec<u8>)> = (0..5)
            .map(|i| (format!("img{i}.png"), tiny_png(i as u8)))
            .collect();
        let refs: Vec<(&str, Vec<u8>)> = files
            .iter()
            .map(|(n, d)| (n.as_str(), d.clone()))
            .collect();
        let (portfolio, rx) = f
            .pipeline
            .ingest_zip("u1", zip_of(&refs))
            .await
            .unwrap();

        let events = drain(rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.status, "analyzed");
        assert_eq!(last.processed, 5);
        assert_eq!(last.total, 5);
        assert!(last.errors.is_empty());

        // Monotone processed counter.
        let mut prev = 0;
        for event in &events {
            assert!(event.processed >= prev);
            prev = event.processed;
        }

        assert_eq!(
            f.portfolios.get(&portfolio.id).unwrap().status,
            PortfolioStatus::Analyzed
        );
        assert_eq!(
            f.descriptors.list_for_portfolio(&portfolio.id).unwrap().len(),
            5
        );
    }

    #[tokio::test]
    async fn test_empty_zip_fails_without_model_calls() {
        let f = fixture();
        let (portfolio, rx) = f
            .pipeline
            .ingest_zip("u1", zip_of(&[("readme.txt", b"not an image".to_vec())]))
            .await
            .unwrap();
        let events = drain(rx).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, "failed");
        assert_eq!(events[0].errors.len(), 1);
        assert_eq!(f.vision.call_count(), 0);
        assert_eq!(
            f.portfolios.get(&portfolio.id).unwrap().status,
            PortfolioStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_duplicate_hashes_analyzed_once() {
        let f = fixture();
        f.vision.push(Ok(good_answer()));
        let png = tiny_png(1);
        let (portfolio, rx) = f
            .pipeline
            .ingest_zip(
                "u1",
                zip_of(&[("a.png", png.clone()), ("copy-of-a.png", png)]),
            )
            .await
            .unwrap();
        drain(rx).await;
        assert_eq!(f.vision.call_count(), 1);
        assert_eq!(f.portfolios.list_images(&portfolio.id).unwrap().len(), 1);
        assert_eq!(
            f.descriptors.list_for_portfolio(&portfolio.id).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_partial_failure_is_still_analyzed() {
        let f = fixture();
        f.vision.push(Ok(good_answer()));
        // Three rejected answers exhaust the retries for one image.
        for _ in 0..3 {
            f.vision.push(Ok(serde_json::json!({"garments": []})));
        }
        let (portfolio, rx) = f
            .pipeline
            .ingest_zip(
                "u1",
                zip_of(&[("a.png", tiny_png(1)), ("b.png", tiny_png(2))]),
            )
            .await
            .unwrap();
        let events = drain(rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.status, "analyzed");
        assert_eq!(last.errors.len(), 1);
        assert_eq!(
            f.portfolios
                .count_by_status(&portfolio.id, ImageStatus::Failed)
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_add_images_dedupes_against_existing() {
        let f = fixture();
        f.vision.push(Ok(good_answer()));
        let first = tiny_png(1);
        let (portfolio, rx) = f
            .pipeline
            .ingest_zip("u1", zip_of(&[("a.png", first.clone())]))
            .await
            .unwrap();
        drain(rx).await;

        f.vision.push(Ok(good_answer()));
        let (_, rx) = f
            .pipeline
            .add_images(
                &portfolio.id,
                zip_of(&[("a-again.png", first), ("b.png", tiny_png(2))]),
            )
            .await
            .unwrap();
        let events = drain(rx).await;
        // Only the novel image was analyzed.
        assert_eq!(events.last().unwrap().total, 1);
        assert_eq!(f.vision.call_count(), 2);
        assert_eq!(f.portfolios.list_images(&portfolio.id).unwrap().len(), 2);
    }

    #[test]
    fn test_sniff_image_magic_bytes() {
        assert_eq!(sniff_image(&tiny_png(1)).unwrap().1, "png");
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0];
        jpeg.extend_from_slice(&[0; 16]);
        assert_eq!(sniff_image(&jpeg).unwrap().0, "image/jpeg");
        assert!(sniff_image(b"plain text here").is_none());
    }
}
