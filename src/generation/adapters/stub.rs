//! Deterministic in-process adapter.
//!
//! Renders a flat-color PNG derived from the prompt hash. Used by tests
//! and by local installs without a provider key; also handy as a load
//! generator since it never leaves the process.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::{EngineError, EngineResult};

use super::{
    cost_cents, AdapterOutput, GenerationSettings, ImageModelAdapter, ImagePayload,
};

/// Stub image model with scriptable failures.
#[derive(Default)]
pub struct StubAdapter {
    calls: AtomicUsize,
    /// Call indexes (0-based) that should fail, and how.
    failures: Mutex<Vec<(usize, bool)>>,
}

impl StubAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make call number `index` fail; `transient` picks the error kind.
    pub fn fail_call(&self, index: usize, transient: bool) {
        self.failures.lock().push((index, transient));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn render_png(prompt: &str, width: u32, height: u32) -> Vec<u8> {
        let digest = Sha256::digest(prompt.as_bytes());
        // High-contrast checker in a prompt-derived hue, so the quality
        // scorer's edge statistics see real gradients.
        let dark = image::Rgb([digest[0] / 4, digest[1] / 4, digest[2] / 4]);
        let light = image::Rgb([
            192 + digest[0] / 16,
            192 + digest[1] / 16,
            192 + digest[2] / 16,
        ]);
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                dark
            } else {
                light
            }
        });
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png)
            .expect("png encode of in-memory image");
        out.into_inner()
    }
}

#[async_trait]
impl ImageModelAdapter for StubAdapter {
    async fn generate(
        &self,
        prompt: &str,
        _negative_prompt: &str,
        settings: &GenerationSettings,
    ) -> EngineResult<AdapterOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(&(_, transient)) = self
            .failures
            .lock()
            .iter()
            .find(|(index, _)| *index == call)
        {
            return Err(if transient {
                EngineError::transient(self.name(), "scripted transient failure")
            } else {
                EngineError::permanent(self.name(), "scripted permanent failure")
            });
        }

        let bytes = Self::render_png(prompt, settings.width, settings.height);
        Ok(AdapterOutput {
            payload: ImagePayload::Bytes(Bytes::from(bytes)),
            seed: settings.seed,
            cost_cents: self.calculate_cost(settings, 1),
            params: serde_json::json!({ "model": "stub", "prompt_len": prompt.len() }),
            reported_quality: Some(85.0),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn calculate_cost(&self, settings: &GenerationSettings, count: usize) -> u32 {
        cost_cents(1.0, settings, count)
    }

    fn name(&self) -> &str {
        "stub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic_output() {
        let adapter = StubAdapter::new();
        let settings = GenerationSettings::default();
        let a = adapter.generate("blazer", "", &settings).await.unwrap();
        let b = adapter.generate("blazer", "", &settings).await.unwrap();
        let (ImagePayload::Bytes(a), ImagePayload::Bytes(b)) = (a.payload, b.payload) else {
            panic!("stub returns bytes");
        };
        assert_eq!(a, b);
        assert_eq!(adapter.call_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let adapter = StubAdapter::new();
        adapter.fail_call(0, true);
        let settings = GenerationSettings::default();
        let err = adapter.generate("x", "", &settings).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(adapter.generate("x", "", &settings).await.is_ok());
    }
}
