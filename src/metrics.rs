//! Translation metrics and observability module.
//!
//! Tracks how often each provider is called, how often it fails, and how
//! often a phrase's translations were served from storage instead of the
//! providers.

use crate::model::{Provider, ProviderSet};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

#[derive(Default)]
struct ProviderCounters {
    calls: AtomicUsize,
    failures: AtomicUsize,
}

/// Translation metrics, usually accessed through the global instance.
#[derive(Default)]
pub struct TranslationMetrics {
    /// Translations found already recorded for the (phrase, language) pair
    stored_hits: AtomicUsize,

    /// Translations that had to be requested from the providers
    stored_misses: AtomicUsize,

    providers: ProviderSet<ProviderCounters>,
}

/// Global metrics instance (initialized lazily)
static METRICS: OnceLock<TranslationMetrics> = OnceLock::new();

impl TranslationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the global translation metrics instance.
    pub fn global() -> &'static TranslationMetrics {
        METRICS.get_or_init(TranslationMetrics::new)
    }

    fn counters(&self, provider: Provider) -> &ProviderCounters {
        self.providers.get(provider)
    }

    /// Record that stored translations were reused.
    pub fn record_stored_hit(&self) {
        self.stored_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that translations had to be requested from the providers.
    pub fn record_stored_miss(&self) {
        self.stored_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an API call to a translation provider.
    pub fn record_api_call(&self, provider: Provider) {
        self.counters(provider).calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed provider call (after the provider's own retries).
    pub fn record_api_failure(&self, provider: Provider) {
        self.counters(provider)
            .failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn stored_hits(&self) -> usize {
        self.stored_hits.load(Ordering::Relaxed)
    }

    pub fn stored_misses(&self) -> usize {
        self.stored_misses.load(Ordering::Relaxed)
    }

    pub fn api_calls(&self, provider: Provider) -> usize {
        self.counters(provider).calls.load(Ordering::Relaxed)
    }

    pub fn api_failures(&self, provider: Provider) -> usize {
        self.counters(provider).failures.load(Ordering::Relaxed)
    }

    /// Generate a metrics report.
    pub fn report(&self) -> MetricsReport {
        let hits = self.stored_hits();
        let misses = self.stored_misses();

        MetricsReport {
            stored_hits: hits,
            stored_misses: misses,
            stored_hit_rate: percentage(hits, hits + misses),
            providers: ProviderSet::from_fn(|provider| {
                let calls = self.api_calls(provider);
                let failures = self.api_failures(provider);
                ProviderReport {
                    api_calls: calls,
                    api_failures: failures,
                    api_success_rate: percentage(calls.saturating_sub(failures), calls),
                }
            }),
        }
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// Per-provider call statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderReport {
    pub api_calls: usize,
    pub api_failures: usize,
    /// API success rate as a percentage (0-100)
    pub api_success_rate: f64,
}

/// Metrics report containing current translation statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub stored_hits: usize,
    pub stored_misses: usize,
    /// Stored-translation reuse rate as a percentage (0-100)
    pub stored_hit_rate: f64,
    pub providers: ProviderSet<ProviderReport>,
}
