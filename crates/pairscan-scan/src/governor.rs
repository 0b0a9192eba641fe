//! Memory pressure tracking and the circuit breaker.
//!
//! [`ResourceGovernor`] is a pure state machine: feed it a memory sample,
//! get back a [`GovernorDecision`]. Timers, threads and OS queries live
//! with the caller ([`MemorySampler`], [`MemoryMonitor`]).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use derive_builder::Builder;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum::Display;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pairscan_core::CircuitOpenReason;

/// How close memory use is to the configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
pub enum PressureLevel {
    Normal,
    Elevated,
    High,
    Critical,
    Emergency,
}

/// Thresholds and pacing for the governor.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct GovernorConfig {
    /// Memory budget for the process.
    #[builder(default = "2048.0")]
    pub memory_limit_mb: f64,
    /// Usage percent at which each level starts.
    #[builder(default = "70.0")]
    pub elevated_percent: f64,
    #[builder(default = "85.0")]
    pub high_percent: f64,
    #[builder(default = "95.0")]
    pub critical_percent: f64,
    #[builder(default = "100.0")]
    pub emergency_percent: f64,
    /// An open circuit closes once usage drops below this percent.
    #[builder(default = "75.0")]
    pub recovery_percent: f64,
    /// Consecutive emergency samples that open the circuit.
    #[builder(default = "2")]
    pub consecutive_emergency_to_open: u32,
    /// Growth per sample that counts as rising while critical.
    #[builder(default = "1.0")]
    pub rising_trend_mb: f64,
    /// Samples averaged for the trend.
    #[builder(default = "5")]
    pub trend_window: usize,
    /// Sampling interval per level, Normal through Emergency.
    #[builder(default = "default_intervals()")]
    pub sample_intervals: [Duration; 5],
    /// Batch size multiplier per level, Normal through Emergency.
    #[builder(default = "[1.0, 0.75, 0.5, 0.25, 0.1]")]
    pub batch_scales: [f64; 5],
}

fn default_intervals() -> [Duration; 5] {
    [
        Duration::from_millis(5000),
        Duration::from_millis(2000),
        Duration::from_millis(1000),
        Duration::from_millis(750),
        Duration::from_millis(500),
    ]
}

impl GovernorConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(limit) = self.memory_limit_mb {
            if limit <= 0.0 {
                return Err("memory_limit_mb must be positive".to_string());
            }
        }
        let critical = self.critical_percent.unwrap_or(95.0);
        let recovery = self.recovery_percent.unwrap_or(75.0);
        if recovery >= critical {
            return Err("recovery_percent must be below critical_percent".to_string());
        }
        Ok(())
    }
}

impl GovernorConfig {
    pub fn builder() -> GovernorConfigBuilder {
        GovernorConfigBuilder::default()
    }

    /// Config with a given limit and default thresholds.
    pub fn with_limit(memory_limit_mb: f64) -> Self {
        Self {
            memory_limit_mb,
            ..Self::default()
        }
    }

    fn level_for(&self, usage_percent: f64) -> PressureLevel {
        if usage_percent >= self.emergency_percent {
            PressureLevel::Emergency
        } else if usage_percent >= self.critical_percent {
            PressureLevel::Critical
        } else if usage_percent >= self.high_percent {
            PressureLevel::High
        } else if usage_percent >= self.elevated_percent {
            PressureLevel::Elevated
        } else {
            PressureLevel::Normal
        }
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 2048.0,
            elevated_percent: 70.0,
            high_percent: 85.0,
            critical_percent: 95.0,
            emergency_percent: 100.0,
            recovery_percent: 75.0,
            consecutive_emergency_to_open: 2,
            rising_trend_mb: 1.0,
            trend_window: 5,
            sample_intervals: default_intervals(),
            batch_scales: [1.0, 0.75, 0.5, 0.25, 0.1],
        }
    }
}

/// Memory state computed from one sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub resident_mb: f64,
    pub limit_mb: f64,
    pub usage_percent: f64,
    pub pressure_level: PressureLevel,
    pub trend_mb_per_sample: f64,
}

/// Change in circuit state caused by a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitTransition {
    Opened(CircuitOpenReason),
    Closed,
}

/// What the caller should do after a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorDecision {
    pub status: MemoryStatus,
    /// Whether in-flight work must stop.
    pub circuit_open: bool,
    /// Set when this sample opened or closed the circuit.
    pub transition: Option<CircuitTransition>,
    /// Why the circuit is open, while it is.
    pub reason: Option<CircuitOpenReason>,
    /// When to take the next sample.
    pub next_sample_in: Duration,
    /// Multiplier for the recommended batch size.
    pub batch_scale: f64,
}

/// Memory circuit breaker state machine.
#[derive(Debug)]
pub struct ResourceGovernor {
    config: GovernorConfig,
    history: VecDeque<f64>,
    consecutive_emergency: u32,
    open_reason: Option<CircuitOpenReason>,
}

impl ResourceGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.trend_window.max(2)),
            config,
            consecutive_emergency: 0,
            open_reason: None,
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.open_reason.is_some()
    }

    /// Feed one sample of resident memory in MB.
    ///
    /// `None` means the OS query failed; the decision then assumes Normal
    /// pressure and leaves the circuit as it was.
    pub fn observe(&mut self, resident_mb: Option<f64>) -> GovernorDecision {
        let Some(resident_mb) = resident_mb.filter(|mb| mb.is_finite() && *mb >= 0.0) else {
            debug!("Memory sample unavailable, assuming normal pressure");
            let status = MemoryStatus {
                resident_mb: 0.0,
                limit_mb: self.config.memory_limit_mb,
                usage_percent: 0.0,
                pressure_level: PressureLevel::Normal,
                trend_mb_per_sample: 0.0,
            };
            return self.decide(status, None);
        };

        let window = self.config.trend_window.max(2);
        if self.history.len() == window {
            self.history.pop_front();
        }
        self.history.push_back(resident_mb);

        let limit_mb = self.config.memory_limit_mb;
        let usage_percent = if limit_mb > 0.0 { resident_mb / limit_mb * 100.0 } else { 0.0 };
        let status = MemoryStatus {
            resident_mb,
            limit_mb,
            usage_percent,
            pressure_level: self.config.level_for(usage_percent),
            trend_mb_per_sample: self.trend(),
        };

        if status.pressure_level == PressureLevel::Emergency {
            self.consecutive_emergency += 1;
        } else {
            self.consecutive_emergency = 0;
        }

        let mut transition = None;
        if self.open_reason.is_none() {
            let sustained = self.consecutive_emergency >= self.config.consecutive_emergency_to_open;
            let rising = status.pressure_level == PressureLevel::Critical
                && status.trend_mb_per_sample >= self.config.rising_trend_mb;
            if sustained || rising {
                let reason = CircuitOpenReason {
                    memory_mb: resident_mb,
                    limit_mb,
                    trend_mb_per_sample: status.trend_mb_per_sample,
                };
                warn!(%reason, level = %status.pressure_level, "Memory circuit opened");
                self.open_reason = Some(reason);
                transition = Some(CircuitTransition::Opened(reason));
            }
        } else if usage_percent < self.config.recovery_percent {
            info!(usage_percent, "Memory circuit closed");
            self.open_reason = None;
            self.consecutive_emergency = 0;
            transition = Some(CircuitTransition::Closed);
        }

        self.decide(status, transition)
    }

    fn decide(&self, status: MemoryStatus, transition: Option<CircuitTransition>) -> GovernorDecision {
        let level = if self.is_open() {
            status.pressure_level.max(PressureLevel::Critical)
        } else {
            status.pressure_level
        };
        let index = level as usize;
        GovernorDecision {
            status,
            circuit_open: self.is_open(),
            transition,
            reason: self.open_reason,
            next_sample_in: self.config.sample_intervals[index],
            batch_scale: self.config.batch_scales[index],
        }
    }

    /// Mean growth between consecutive samples in the window.
    fn trend(&self) -> f64 {
        if self.history.len() < 2 {
            return 0.0;
        }
        let (Some(first), Some(last)) = (self.history.front(), self.history.back()) else {
            return 0.0;
        };
        (last - first) / (self.history.len() - 1) as f64
    }
}

impl Default for ResourceGovernor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

/// Source of resident memory samples.
pub trait MemorySampler: Send {
    /// Current resident memory in MB, or `None` if it could not be read.
    fn sample_mb(&mut self) -> Option<f64>;
}

impl<F> MemorySampler for F
where
    F: FnMut() -> Option<f64> + Send,
{
    fn sample_mb(&mut self) -> Option<f64> {
        self()
    }
}

/// Reads the current process's resident memory through sysinfo.
pub struct SysinfoSampler {
    system: System,
    pid: Option<Pid>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample_mb(&mut self) -> Option<f64> {
        let pid = self.pid?;
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        let bytes = self.system.process(pid)?.memory();
        Some(bytes as f64 / (1024.0 * 1024.0))
    }
}

#[derive(Debug, Default)]
struct SharedState {
    level: Option<PressureLevel>,
    reason: Option<CircuitOpenReason>,
}

/// Cloneable view of the latest governor decision, shared between the
/// monitor and the work it guards.
#[derive(Debug, Clone, Default)]
pub struct GovernorHandle {
    state: Arc<RwLock<SharedState>>,
}

impl GovernorHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a decision.
    pub fn apply(&self, decision: &GovernorDecision) {
        let mut state = self.state.write();
        state.level = Some(decision.status.pressure_level);
        state.reason = decision.reason;
    }

    /// Whether in-flight work must stop.
    pub fn is_open(&self) -> bool {
        self.state.read().reason.is_some()
    }

    /// Why the circuit is open.
    pub fn reason(&self) -> Option<CircuitOpenReason> {
        self.state.read().reason
    }

    /// Latest pressure level, if anything was sampled yet.
    pub fn level(&self) -> Option<PressureLevel> {
        self.state.read().level
    }
}

/// Couples a governor to a sampler and publishes decisions to a handle.
pub struct MemoryMonitor<S> {
    governor: ResourceGovernor,
    sampler: S,
    handle: GovernorHandle,
}

impl<S: MemorySampler> MemoryMonitor<S> {
    pub fn new(governor: ResourceGovernor, sampler: S) -> Self {
        Self {
            governor,
            sampler,
            handle: GovernorHandle::new(),
        }
    }

    /// The handle scans and dispatchers should watch.
    pub fn handle(&self) -> GovernorHandle {
        self.handle.clone()
    }

    /// Take one sample and publish the decision.
    pub fn tick(&mut self) -> GovernorDecision {
        let decision = self.governor.observe(self.sampler.sample_mb());
        self.handle.apply(&decision);
        decision
    }

    /// Sample on the governor's adaptive schedule until `shutdown` flips
    /// to true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let decision = self.tick();
            tokio::select! {
                _ = tokio::time::sleep(decision.next_sample_in) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Memory monitor stopped");
    }
}
