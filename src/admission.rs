//! CPU-idle admission control for background jobs.
//!
//! Keeps a rolling window of idle-fraction samples and admits the next chunk
//! only while the windowed average stays at or above the threshold.

use crate::clock::{Clock, SystemClock};
use crate::config::AdmissionConfig;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::System;

/// Source of system-wide CPU idleness.
pub trait CpuSampler: Send {
    /// Fraction of CPU capacity currently idle, 0.0 (saturated) to 1.0.
    fn idle_fraction(&mut self) -> f32;
}

/// Production sampler backed by `sysinfo`.
pub struct SysinfoSampler {
    system: System,
    primed_at: Instant,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // Usage is computed as a delta, so the first refresh only primes it.
        system.refresh_cpu_usage();
        Self {
            system,
            primed_at: Instant::now(),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSampler for SysinfoSampler {
    fn idle_fraction(&mut self) -> f32 {
        let since_prime = self.primed_at.elapsed();
        if since_prime < sysinfo::MINIMUM_CPU_UPDATE_INTERVAL {
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL - since_prime);
        }
        self.system.refresh_cpu_usage();
        let busy = self.system.global_cpu_usage() / 100.0;
        (1.0 - busy).clamp(0.0, 1.0)
    }
}

/// Mock sampler for testing. Returns scripted values first, then the current
/// value. Clones share state.
#[derive(Debug, Clone)]
pub struct MockCpuSampler {
    script: Arc<Mutex<VecDeque<f32>>>,
    current: Arc<Mutex<f32>>,
    samples: Arc<AtomicUsize>,
}

impl MockCpuSampler {
    pub fn new(idle: f32) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            current: Arc::new(Mutex::new(idle)),
            samples: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Values returned, in order, before falling back to the current value.
    pub fn with_script(self, values: impl IntoIterator<Item = f32>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(values);
        self
    }

    pub fn set_idle(&self, idle: f32) {
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = idle;
    }

    pub fn sample_count(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

impl CpuSampler for MockCpuSampler {
    fn idle_fraction(&mut self) -> f32 {
        self.samples.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        scripted.unwrap_or_else(|| {
            *self
                .current
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        })
    }
}

struct SampleWindow {
    sampler: Box<dyn CpuSampler>,
    samples: VecDeque<(Instant, f32)>,
}

/// Decides whether a background chunk may start now.
///
/// Shared by every background job; all state sits behind one short-lived
/// lock that is never held while a caller idles.
pub struct AdmissionController {
    threshold: f32,
    window: Duration,
    min_sample_interval: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<SampleWindow>,
}

impl AdmissionController {
    pub fn new(config: &AdmissionConfig, sampler: Box<dyn CpuSampler>) -> Self {
        Self {
            threshold: config.cpu_idle_threshold,
            window: config.sample_window(),
            min_sample_interval: sysinfo::MINIMUM_CPU_UPDATE_INTERVAL,
            clock: Arc::new(SystemClock),
            state: Mutex::new(SampleWindow {
                sampler,
                samples: VecDeque::new(),
            }),
        }
    }

    /// Controller reading real CPU usage through `sysinfo`.
    pub fn system(config: &AdmissionConfig) -> Self {
        Self::new(config, Box::new(SysinfoSampler::new()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Samples closer together than this reuse the previous reading.
    pub fn with_min_sample_interval(mut self, interval: Duration) -> Self {
        self.min_sample_interval = interval;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Take a fresh sample if due, then compare the windowed average idle
    /// fraction against the threshold.
    pub fn can_proceed(&self) -> bool {
        let now = self.clock.now();
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let due = state
            .samples
            .back()
            .is_none_or(|(at, _)| now.saturating_duration_since(*at) >= self.min_sample_interval);
        if due {
            let idle = state.sampler.idle_fraction().clamp(0.0, 1.0);
            state.samples.push_back((now, idle));
        }

        while state.samples.len() > 1
            && state
                .samples
                .front()
                .is_some_and(|(at, _)| now.saturating_duration_since(*at) > self.window)
        {
            state.samples.pop_front();
        }

        let average = average_idle(&state.samples).unwrap_or(1.0);
        let admitted = average >= self.threshold;
        tracing::trace!(
            idle = average,
            threshold = self.threshold,
            admitted,
            "Admission check"
        );
        admitted
    }

    /// Current windowed idle average without sampling.
    pub fn windowed_idle(&self) -> Option<f32> {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        average_idle(&state.samples)
    }
}

fn average_idle(samples: &VecDeque<(Instant, f32)>) -> Option<f32> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().map(|(_, idle)| idle).sum::<f32>() / samples.len() as f32)
}
