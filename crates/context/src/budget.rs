//! Token budget thresholds.

use roundclaw_config::ContextSettings;

/// Thresholds derived from the context window.
///
/// Crossing `compact_threshold` triggers tool-result compression. Only after
/// that pass is the estimate compared with `summarize_threshold`; when the
/// summarize threshold is the lower one it acts as the target the history
/// is squeezed down towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub window_tokens: usize,
    pub compact_threshold: usize,
    pub summarize_threshold: usize,
    pub compress_batch: usize,
}

impl ContextBudget {
    pub fn from_settings(settings: &ContextSettings) -> Self {
        Self {
            window_tokens: settings.window_tokens,
            compact_threshold: settings.compact_threshold_tokens(),
            summarize_threshold: settings.summarize_threshold_tokens(),
            compress_batch: settings.compress_batch,
        }
    }

    pub fn needs_compaction(&self, tokens: usize) -> bool {
        tokens > self.compact_threshold
    }

    pub fn needs_summary(&self, tokens: usize) -> bool {
        tokens > self.summarize_threshold
    }

    /// Share of the window used, in percent (for status displays).
    pub fn usage_percent(&self, tokens: usize) -> f64 {
        if self.window_tokens == 0 {
            return 0.0;
        }
        tokens as f64 * 100.0 / self.window_tokens as f64
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::from_settings(&ContextSettings::default())
    }
}

/// What one maintenance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub compressed: usize,
    pub summarized: bool,
}
