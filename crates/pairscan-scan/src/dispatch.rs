//! Adaptive batching of results for a downstream consumer.

use std::time::{Duration, Instant};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use pairscan_core::ScanError;

use crate::governor::{GovernorHandle, MemorySampler, ResourceGovernor};

/// Limits for [`BatchSizer`].
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct BatchSizerConfig {
    /// Smallest batch ever recommended.
    #[builder(default = "5")]
    pub floor: usize,
    /// Largest batch ever recommended.
    #[builder(default = "200")]
    pub ceiling: usize,
    /// Processing time per batch the sizer steers towards.
    #[builder(default = "Duration::from_millis(50)")]
    pub target_batch_time: Duration,
}

impl BatchSizerConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        let floor = self.floor.unwrap_or(5);
        let ceiling = self.ceiling.unwrap_or(200);
        if floor == 0 || floor > ceiling {
            return Err(format!("invalid batch bounds {floor}..={ceiling}"));
        }
        Ok(())
    }
}

impl BatchSizerConfig {
    pub fn builder() -> BatchSizerConfigBuilder {
        BatchSizerConfigBuilder::default()
    }

    /// Bounds usable for clamping: a floor of at least 1 and a ceiling no
    /// lower than the floor. Configs built by hand or deserialized skip the
    /// builder's validation.
    pub fn normalized(mut self) -> Self {
        self.floor = self.floor.max(1);
        self.ceiling = self.ceiling.max(self.floor);
        self
    }
}

impl Default for BatchSizerConfig {
    fn default() -> Self {
        Self {
            floor: 5,
            ceiling: 200,
            target_batch_time: Duration::from_millis(50),
        }
    }
}

/// Picks batch sizes from item count, memory pressure and measured
/// throughput.
#[derive(Debug, Clone)]
pub struct BatchSizer {
    config: BatchSizerConfig,
    base: usize,
}

impl BatchSizer {
    /// Create a sizer for a run of `total_items`.
    pub fn new(config: BatchSizerConfig, total_items: usize) -> Self {
        let config = config.normalized();
        let base = Self::tier_for(total_items).clamp(config.floor, config.ceiling);
        Self { config, base }
    }

    /// Starting size for a given number of items.
    pub fn tier_for(total_items: usize) -> usize {
        match total_items {
            0..=50 => 10,
            51..=500 => 25,
            501..=5000 => 50,
            _ => 100,
        }
    }

    /// Size before any memory scaling.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Recommended size under the given pressure multiplier.
    pub fn next_size(&self, pressure_scale: f64) -> usize {
        let scale = if pressure_scale.is_finite() { pressure_scale.clamp(0.0, 1.0) } else { 1.0 };
        let size = (self.base as f64 * scale).round() as usize;
        size.clamp(self.config.floor, self.config.ceiling)
    }

    /// Feed back how long a batch took, nudging the base towards the target time.
    pub fn record(&mut self, items: usize, elapsed: Duration) {
        if items == 0 {
            return;
        }
        let target = self.config.target_batch_time;
        let next = if elapsed > target.mul_f64(1.5) {
            let ratio = target.as_secs_f64() / elapsed.as_secs_f64();
            (self.base as f64 * ratio.max(0.5)).floor() as usize
        } else if elapsed < target / 2 {
            (self.base as f64 * 1.25).ceil() as usize
        } else {
            self.base
        };
        let next = next.clamp(self.config.floor, self.config.ceiling);
        if next != self.base {
            trace!(from = self.base, to = next, ?elapsed, "Batch size adjusted");
        }
        self.base = next;
    }
}

/// What a dispatch run delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Number of consumer calls.
    pub batches: usize,
    /// Items handed to the consumer.
    pub items: usize,
    /// Size of the last batch recommended.
    pub final_batch_size: usize,
}

/// Feeds items to a consumer in adaptively sized batches, aborting when
/// memory runs out or the caller cancels.
pub struct BatchDispatcher<S> {
    governor: ResourceGovernor,
    sampler: S,
    sizer_config: BatchSizerConfig,
    handle: Option<GovernorHandle>,
}

impl<S: MemorySampler> BatchDispatcher<S> {
    pub fn new(governor: ResourceGovernor, sampler: S) -> Self {
        Self {
            governor,
            sampler,
            sizer_config: BatchSizerConfig::default(),
            handle: None,
        }
    }

    pub fn with_sizer_config(mut self, config: BatchSizerConfig) -> Self {
        self.sizer_config = config;
        self
    }

    /// Publish every governor decision to `handle` as well.
    pub fn with_handle(mut self, handle: GovernorHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Hand `items` to `consumer` batch by batch.
    ///
    /// The consumer is called synchronously; the next batch waits for it to
    /// return. Memory is sampled on the governor's schedule, and an open
    /// circuit stops the run before the next batch.
    pub fn dispatch<T, F>(
        &mut self,
        items: Vec<T>,
        interrupt: &dyn Fn() -> bool,
        mut consumer: F,
    ) -> Result<DispatchSummary, ScanError>
    where
        F: FnMut(Vec<T>),
    {
        let total = items.len();
        let mut sizer = BatchSizer::new(self.sizer_config.clone(), total);
        let mut summary = DispatchSummary {
            final_batch_size: sizer.base(),
            ..DispatchSummary::default()
        };
        let mut remaining = items.into_iter();
        let mut scale = 1.0;
        let mut next_sample = Instant::now();

        while summary.items < total {
            if interrupt() {
                debug!(delivered = summary.items, total, "Dispatch interrupted");
                return Err(ScanError::Interrupted);
            }

            if Instant::now() >= next_sample {
                let decision = self.governor.observe(self.sampler.sample_mb());
                if let Some(handle) = &self.handle {
                    handle.apply(&decision);
                }
                if let Some(reason) = decision.reason {
                    warn!(%reason, delivered = summary.items, total, "Dispatch aborted");
                    return Err(ScanError::MemoryCircuitOpen { reason });
                }
                scale = decision.batch_scale;
                next_sample = Instant::now() + decision.next_sample_in;
            }

            let size = sizer.next_size(scale);
            let batch: Vec<T> = remaining.by_ref().take(size).collect();
            let count = batch.len();

            let started = Instant::now();
            consumer(batch);
            sizer.record(count, started.elapsed());

            summary.batches += 1;
            summary.items += count;
            summary.final_batch_size = size;
        }

        debug!(
            batches = summary.batches,
            items = summary.items,
            "Dispatch finished"
        );
        Ok(summary)
    }
}
