//! Per-image quality scoring.
//!
//! The exact formula is deliberately pluggable; the fixed contract is
//! the [0, 100] range and the acceptance threshold. The default scorer
//! combines resolution adequacy, an edge-statistics sharpness proxy,
//! and adapter-reported metadata.

use image::GenericImageView;

/// Candidates below this score are dropped before selection.
pub const ACCEPTANCE_THRESHOLD: f64 = 60.0;

/// Pixel count considered fully adequate.
const TARGET_PIXELS: f64 = 1024.0 * 1024.0;

/// Mean-gradient value treated as fully sharp.
const SHARPNESS_CEILING: f64 = 24.0;

/// Scores one candidate image into [0, 100].
pub trait QualityScorer: Send + Sync {
    fn score(&self, bytes: Option<&[u8]>, width: u32, height: u32, adapter_score: Option<f64>)
        -> f64;
}

/// Default heuristic scorer: 40% resolution, 40% sharpness, 20%
/// adapter metadata.
#[derive(Debug, Default, Clone)]
pub struct DefaultScorer;

impl QualityScorer for DefaultScorer {
    fn score(
        &self,
        bytes: Option<&[u8]>,
        width: u32,
        height: u32,
        adapter_score: Option<f64>,
    ) -> f64 {
        let resolution = resolution_adequacy(width, height);
        let sharpness = bytes.and_then(sharpness_proxy);
        let adapter = adapter_score
            .filter(|s| s.is_finite())
            .map(|s| (s / 100.0).clamp(0.0, 1.0));

        // Missing signals fall back to the resolution component rather
        // than zeroing the score.
        let sharpness = sharpness.unwrap_or(resolution);
        let adapter = adapter.unwrap_or(0.7);

        (40.0 * resolution + 40.0 * sharpness + 20.0 * adapter).clamp(0.0, 100.0)
    }
}

fn resolution_adequacy(width: u32, height: u32) -> f64 {
    let pixels = f64::from(width) * f64::from(height);
    (pixels / TARGET_PIXELS).clamp(0.0, 1.0)
}

/// Mean absolute horizontal+vertical gradient over the luma channel.
/// Soft proxy for focus; flat or tiny images score low.
fn sharpness_proxy(bytes: &[u8]) -> Option<f64> {
    let img = image::load_from_memory(bytes).ok()?;
    let (w, h) = img.dimensions();
    if w < 2 || h < 2 {
        return Some(0.0);
    }
    let gray = img.to_luma8();
    // Sample a coarse grid so scoring stays cheap on large outputs.
    let step = ((w.max(h)) / 256).max(1);
    let mut total = 0f64;
    let mut count = 0u64;
    let mut y = 0;
    while y + step < h {
        let mut x = 0;
        while x + step < w {
            let here = f64::from(gray.get_pixel(x, y).0[0]);
            let right = f64::from(gray.get_pixel(x + step, y).0[0]);
            let down = f64::from(gray.get_pixel(x, y + step).0[0]);
            total += (here - right).abs() + (here - down).abs();
            count += 2;
            x += step;
        }
        y += step;
    }
    if count == 0 {
        return Some(0.0);
    }
    Some(((total / count as f64) / SHARPNESS_CEILING).clamp(0.0, 1.0))
}
