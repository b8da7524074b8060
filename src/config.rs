//! Engine configuration.
//!
//! All tunables are read once from the environment at startup and shared
//! immutably via `Arc<EngineConfig>`. Invalid values fall back to the
//! documented default with a warning rather than aborting startup.

use std::str::FromStr;

/// Default bounded parallelism for portfolio analysis.
pub const DEFAULT_ANALYSIS_CONCURRENCY: usize = 4;

/// Default hard word budget for rendered prompts.
pub const DEFAULT_PROMPT_MAX_WORDS: usize = 50;

/// Default over-generation buffer, percent.
pub const DEFAULT_OVERGEN_BUFFER_PCT: u32 = 20;

/// Default generated images per prompt (paired outputs).
pub const DEFAULT_IMAGES_PER_PROMPT: usize = 2;

/// Default Beta-posterior floor for both alpha and beta.
pub const DEFAULT_BANDIT_FLOOR: f64 = 1.0;

/// Default RLHF exponential-moving-average learning rate.
pub const DEFAULT_RLHF_LEARNING_RATE: f64 = 0.1;

/// Default epsilon for epsilon-greedy token selection.
pub const DEFAULT_RLHF_EPSILON: f64 = 0.15;

/// Default per-slot coverage target, percent.
pub const DEFAULT_COVERAGE_TARGET_PCT: u32 = 80;

/// Default frequency threshold above which a profile attribute counts as
/// a signature.
pub const DEFAULT_SIGNATURE_THRESHOLD: f64 = 0.4;

/// Default low-confidence threshold that triggers an extraction retry.
pub const DEFAULT_CONFIDENCE_RETRY: f64 = 0.5;

/// Runtime configuration for the engine, loaded from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `ANALYSIS_CONCURRENCY` — bounded parallelism in the ingestion
    /// pipeline (typical 3–5).
    pub analysis_concurrency: usize,
    /// `PROMPT_MAX_WORDS` — hard budget for rendered prompt text.
    pub prompt_max_words: usize,
    /// `OVERGEN_BUFFER_PCT` — over-generation buffer b, percent.
    pub overgen_buffer_pct: u32,
    /// `IMAGES_PER_PROMPT` — k outputs per prompt spec.
    pub images_per_prompt: usize,
    /// `BANDIT_FLOOR` — prior floor for alpha and beta.
    pub bandit_floor: f64,
    /// `RLHF_LEARNING_RATE` — eta for weight updates.
    pub rlhf_learning_rate: f64,
    /// `RLHF_EPSILON` — exploration probability for token selection.
    pub rlhf_epsilon: f64,
    /// `COVERAGE_TARGET_PCT` — per-slot coverage target.
    pub coverage_target_pct: u32,
    /// `SIGNATURE_THRESHOLD` — frequency above which an attribute is a
    /// signature and earns a weight boost.
    pub signature_threshold: f64,
    /// `CONFIDENCE_RETRY` — extraction retry threshold for confidence
    /// and completeness (completeness compared on a 0–100 scale).
    pub confidence_retry: f64,
    /// Maximum concurrent prompt fan-out in the orchestrator.
    pub generation_concurrency: usize,
    /// Per-call timeout for external HTTP providers, seconds.
    pub provider_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analysis_concurrency: DEFAULT_ANALYSIS_CONCURRENCY,
            prompt_max_words: DEFAULT_PROMPT_MAX_WORDS,
            overgen_buffer_pct: DEFAULT_OVERGEN_BUFFER_PCT,
            images_per_prompt: DEFAULT_IMAGES_PER_PROMPT,
            bandit_floor: DEFAULT_BANDIT_FLOOR,
            rlhf_learning_rate: DEFAULT_RLHF_LEARNING_RATE,
            rlhf_epsilon: DEFAULT_RLHF_EPSILON,
            coverage_target_pct: DEFAULT_COVERAGE_TARGET_PCT,
            signature_threshold: DEFAULT_SIGNATURE_THRESHOLD,
            confidence_retry: DEFAULT_CONFIDENCE_RETRY,
            generation_concurrency: 3,
            provider_timeout_secs: 60,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.analysis_concurrency =
            env_or("ANALYSIS_CONCURRENCY", cfg.analysis_concurrency).clamp(1, 16);
        cfg.prompt_max_words = env_or("PROMPT_MAX_WORDS", cfg.prompt_max_words).max(10);
        cfg.overgen_buffer_pct = env_or("OVERGEN_BUFFER_PCT", cfg.overgen_buffer_pct);
        cfg.images_per_prompt = env_or("IMAGES_PER_PROMPT", cfg.images_per_prompt).clamp(1, 4);
        cfg.bandit_floor = env_or("BANDIT_FLOOR", cfg.bandit_floor).max(1.0);
        cfg.rlhf_learning_rate =
            env_or("RLHF_LEARNING_RATE", cfg.rlhf_learning_rate).clamp(0.0, 1.0);
        cfg.rlhf_epsilon = env_or("RLHF_EPSILON", cfg.rlhf_epsilon).clamp(0.0, 1.0);
        cfg.coverage_target_pct = env_or("COVERAGE_TARGET_PCT", cfg.coverage_target_pct).min(100);
        cfg.signature_threshold =
            env_or("SIGNATURE_THRESHOLD", cfg.signature_threshold).clamp(0.0, 1.0);
        cfg.confidence_retry = env_or("CONFIDENCE_RETRY", cfg.confidence_retry).clamp(0.0, 1.0);
        cfg.generation_concurrency =
            env_or("GENERATION_CONCURRENCY", cfg.generation_concurrency).clamp(1, 8);
        cfg.provider_timeout_secs = env_or("PROVIDER_TIMEOUT_SECS", cfg.provider_timeout_secs);
        cfg
    }

    /// Planned candidate count for a requested batch of `n` images:
    /// ⌈n·(1+b)⌉ rounded up to a whole number of prompts.
    pub fn overgen_candidates(&self, n: usize) -> usize {
        let buffered = (n as f64) * (1.0 + self.overgen_buffer_pct as f64 / 100.0);
        let k = self.images_per_prompt.max(1);
        let prompts = (buffered / k as f64).ceil() as usize;
        prompts.max(1) * k
    }
}

fn env_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("invalid {key}={raw:?}, using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.prompt_max_words, 50);
        assert_eq!(cfg.overgen_buffer_pct, 20);
        assert_eq!(cfg.images_per_prompt, 2);
        assert!((cfg.rlhf_epsilon - 0.15).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overgen_candidates_rounds_to_whole_prompts() {
        let cfg = EngineConfig::default();
        // ⌈5·1.2⌉ = 6 candidates from 3 prompts at k=2.
        assert_eq!(cfg.overgen_candidates(5), 6);
        // ⌈1·1.2⌉ = 2 candidates from 1 prompt.
        assert_eq!(cfg.overgen_candidates(1), 2);
        // Zero requested still plans one prompt.
        assert_eq!(cfg.overgen_candidates(0), 2);
    }
}
