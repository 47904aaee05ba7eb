//! Resource Monitor (§4.1)
//!
//! A process-wide singleton (lazy `OnceLock`, mirroring the cache
//! singletons in the teacher's `tickers` module) that samples memory/CPU
//! via `sysinfo`, classifies pressure into a four-state signal, derives
//! safe worker counts and batch sizes, and gates work behind a circuit
//! breaker. Reads are lock-free; only the breaker's last-exhausted
//! timestamp is guarded by a mutex, held for the duration of a single
//! write.

use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use sysinfo::System;

use crate::config::ResourceLimits;

/// Categorical resource pressure, ordered HEALTHY < WARNING < CRITICAL <
/// EXHAUSTED so callers can compare with `<=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceState {
    Healthy,
    Warning,
    Critical,
    Exhausted,
}

/// A single observation of the host's resource pressure.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    pub state: ResourceState,
    pub memory_percent_used: f32,
    pub available_mb: u64,
    pub process_mb: u64,
    pub cpu_percent_used: f32,
}

/// A callback invoked once per HEALTHY→WARNING transition edge, when
/// `auto_gc_on_warning` is set. Defaults to a no-op: Rust has no GC to
/// trigger, but an embedding application may use this hook to drop caches.
pub type GcHook = Box<dyn Fn() + Send + Sync>;

struct Inner {
    limits: ResourceLimits,
    sys: Mutex<System>,
    last_state: Mutex<ResourceState>,
    last_exhausted_at: Mutex<Option<Instant>>,
    gc_hook: Option<GcHook>,
    degraded: bool,
}

/// Handle to the process-wide Resource Monitor singleton.
pub struct ResourceMonitor {
    inner: Inner,
}

static GLOBAL: OnceLock<ResourceMonitor> = OnceLock::new();

impl ResourceMonitor {
    /// Returns the process-wide singleton, initializing it on first use.
    pub fn global() -> &'static ResourceMonitor {
        GLOBAL.get_or_init(|| ResourceMonitor::new(ResourceLimits::default(), None))
    }

    /// Builds a standalone monitor with custom limits, for tests and for
    /// embedding applications that want injected thresholds rather than
    /// the process-wide singleton.
    pub fn with_limits(limits: ResourceLimits) -> ResourceMonitor {
        ResourceMonitor::new(limits, None)
    }

    fn new(limits: ResourceLimits, gc_hook: Option<GcHook>) -> ResourceMonitor {
        let mut sys = System::new();
        // Degraded mode: if refresh panics or yields nothing useful the
        // monitor must never throw, only fall back to HEALTHY (§4.1
        // failure semantics). sysinfo itself does not panic on
        // unsupported platforms, but total_memory() can read 0.
        sys.refresh_memory();
        sys.refresh_cpu_usage();
        let degraded = sys.total_memory() == 0;
        if degraded {
            tracing::warn!("resource monitor: host memory metrics unavailable, entering degraded mode (always HEALTHY)");
        }

        ResourceMonitor {
            inner: Inner {
                limits,
                sys: Mutex::new(sys),
                last_state: Mutex::new(ResourceState::Healthy),
                last_exhausted_at: Mutex::new(None),
                gc_hook,
                degraded,
            },
        }
    }

    /// Reads current memory and CPU and classifies into one of the four
    /// states: each signal is classified independently against its own
    /// thresholds (§4.1's `ResourceLimits`), and the overall state is the
    /// more severe of the two. `ResourceLimits` has no
    /// `cpu_exhausted_threshold` (only warning/critical are defined for
    /// CPU), so CPU pressure alone never pushes the combined state past
    /// CRITICAL; only memory exhaustion (or free-memory starvation) can
    /// reach EXHAUSTED.
    pub fn snapshot(&self) -> ResourceSnapshot {
        if self.inner.degraded {
            return ResourceSnapshot {
                state: ResourceState::Healthy,
                memory_percent_used: 0.0,
                available_mb: u64::MAX / (1024 * 1024),
                process_mb: 0,
                cpu_percent_used: 0.0,
            };
        }

        let (memory_percent_used, available_mb, process_mb, cpu_percent_used) = {
            let mut sys = self.inner.sys.lock().unwrap();
            sys.refresh_memory();
            sys.refresh_cpu_usage();
            let total = sys.total_memory().max(1);
            let used = sys.used_memory();
            let available = sys.available_memory();
            let process_mb = sys
                .process(sysinfo::get_current_pid().unwrap_or(sysinfo::Pid::from(0)))
                .map(|p| p.memory() / (1024 * 1024))
                .unwrap_or(0);
            let cpus = sys.cpus();
            let cpu_percent_used = if cpus.is_empty() {
                0.0
            } else {
                cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
            };
            (
                (used as f64 / total as f64 * 100.0) as f32,
                available / (1024 * 1024),
                process_mb,
                cpu_percent_used,
            )
        };

        let limits = &self.inner.limits;

        let memory_state = if memory_percent_used >= limits.memory_exhausted_threshold
            || available_mb < limits.min_free_memory_mb
        {
            ResourceState::Exhausted
        } else if memory_percent_used >= limits.memory_critical_threshold {
            ResourceState::Critical
        } else if memory_percent_used >= limits.memory_warning_threshold {
            ResourceState::Warning
        } else {
            ResourceState::Healthy
        };

        let cpu_state = if cpu_percent_used >= limits.cpu_critical_threshold {
            ResourceState::Critical
        } else if cpu_percent_used >= limits.cpu_warning_threshold {
            ResourceState::Warning
        } else {
            ResourceState::Healthy
        };

        let state = memory_state.max(cpu_state);

        self.note_transition(state);

        ResourceSnapshot {
            state,
            memory_percent_used,
            available_mb,
            process_mb,
            cpu_percent_used,
        }
    }

    fn note_transition(&self, state: ResourceState) {
        let mut last = self.inner.last_state.lock().unwrap();
        let previous = *last;
        *last = state;

        if state == ResourceState::Exhausted {
            *self.inner.last_exhausted_at.lock().unwrap() = Some(Instant::now());
        }

        if self.inner.limits.auto_gc_on_warning
            && previous == ResourceState::Healthy
            && state == ResourceState::Warning
        {
            if let Some(hook) = &self.inner.gc_hook {
                hook();
            }
        }
    }

    /// `requested` if HEALTHY; halved if WARNING; quartered if CRITICAL;
    /// 1 if EXHAUSTED. Always in `[1, requested]`.
    pub fn safe_worker_count(&self, requested: usize) -> usize {
        let requested = requested.max(1);
        match self.snapshot().state {
            ResourceState::Healthy => requested,
            ResourceState::Warning => (requested / 2).max(1),
            ResourceState::Critical => (requested / 4).max(1),
            ResourceState::Exhausted => 1,
        }
    }

    /// `desired` if HEALTHY; halved if WARNING; tenthed if CRITICAL;
    /// `max(1000, desired/100)` if EXHAUSTED.
    pub fn safe_batch_size(&self, desired: usize) -> usize {
        match self.snapshot().state {
            ResourceState::Healthy => desired,
            ResourceState::Warning => (desired / 2).max(1),
            ResourceState::Critical => (desired / 10).max(1),
            ResourceState::Exhausted => (desired / 100).max(1000),
        }
    }

    /// Blocks (polling) until `snapshot().state <= target_state` or the
    /// timeout elapses. Returns whether the target was reached.
    pub fn wait_for(&self, target_state: ResourceState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.snapshot().state <= target_state {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50).min(timeout));
        }
    }

    /// True when the last EXHAUSTED observation is within
    /// `circuit_breaker_cooldown_seconds`.
    pub fn circuit_breaker_active(&self) -> bool {
        if !self.inner.limits.circuit_breaker_enabled {
            return false;
        }
        match *self.inner.last_exhausted_at.lock().unwrap() {
            Some(at) => {
                at.elapsed() < Duration::from_secs(self.inner.limits.circuit_breaker_cooldown_seconds)
            }
            None => false,
        }
    }
}
