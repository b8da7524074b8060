//! Ingestion progress events.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// How many recent image URLs ride along in each event for live
/// previews.
pub const PREVIEW_WINDOW: usize = 6;

/// One progress event on the ingestion stream.
///
/// `processed` is monotone non-decreasing within a run;
/// `current_image` may be any image from the active pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub portfolio_id: String,
    pub processed: u32,
    pub total: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_image: Option<String>,
    /// "processing", then a terminal "analyzed" or "failed".
    pub status: String,
    /// Scrubbed per-image failure messages accumulated so far.
    pub errors: Vec<String>,
    /// Up to [`PREVIEW_WINDOW`] most recently finished image URLs.
    pub preview_urls: Vec<String>,
}

/// Sender half used by the pipeline; events to a closed receiver are
/// dropped silently (the client went away, the work continues).
pub type ProgressSender = mpsc::Sender<ProgressEvent>;

/// Receiver half handed to the HTTP layer for SSE consumption.
pub type ProgressStream = mpsc::Receiver<ProgressEvent>;

/// Channel sized for a burst of per-image events without backpressure
/// on the analysis workers.
pub fn channel() -> (ProgressSender, ProgressStream) {
    mpsc::channel(64)
}
