// Per-supplier circuit breaker / health tracker.
//
// CLOSED -> OPEN after a run of consecutive failures; OPEN -> HALF_OPEN once
// the cooldown elapses; HALF_OPEN admits exactly one probe at a time and the
// probe's outcome alone decides whether the circuit closes or reopens. State
// is process-wide, shared by all in-flight flows for a supplier, and every
// update is done under a lock so counters never race.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::BreakerConfig;
use crate::types::SupplierId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn name(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Debug)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    /// `probe_started` is the admission time of the in-flight probe, if
    /// any. A probe whose holder never reports back (cancelled flow) is
    /// reclaimed once the cooldown elapses again.
    HalfOpen {
        probe_started: Option<Instant>,
        successes: u32,
    },
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    ok: bool,
    latency: Duration,
}

/// Result of asking the breaker for permission to call the supplier.
#[derive(Debug, Clone, Copy)]
pub enum Acquire {
    Permit,
    Rejected { retry_in: Duration },
}

impl Acquire {
    pub fn is_permit(&self) -> bool {
        matches!(self, Acquire::Permit)
    }
}

/// Health summary for one supplier, used by the aggregator's diagnostics.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub recent_failures: usize,
    pub recent_calls: usize,
    pub mean_latency: Option<Duration>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: State,
    window: VecDeque<Outcome>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: State::Closed {
                consecutive_failures: 0,
            },
            window: VecDeque::new(),
        }
    }

    pub fn state(&self) -> BreakerState {
        match self.state {
            State::Closed { .. } => BreakerState::Closed,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Whether a call may proceed right now. An OPEN breaker whose cooldown
    /// has elapsed moves to HALF_OPEN and admits the caller as the probe.
    pub fn try_acquire(&mut self) -> Acquire {
        match &mut self.state {
            State::Closed { .. } => Acquire::Permit,
            State::Open { opened_at } => {
                let elapsed = opened_at.elapsed();
                if elapsed >= self.config.cooldown {
                    self.state = State::HalfOpen {
                        probe_started: Some(Instant::now()),
                        successes: 0,
                    };
                    Acquire::Permit
                } else {
                    Acquire::Rejected {
                        retry_in: self.config.cooldown - elapsed,
                    }
                }
            }
            State::HalfOpen {
                probe_started, ..
            } => match probe_started {
                // One probe at a time; concurrent flows wait it out.
                Some(started) if started.elapsed() < self.config.cooldown => {
                    Acquire::Rejected {
                        retry_in: self.config.cooldown - started.elapsed(),
                    }
                }
                // Either the slot is free or its holder went away without
                // recording an outcome; admit the caller as the new probe.
                _ => {
                    *probe_started = Some(Instant::now());
                    Acquire::Permit
                }
            },
        }
    }

    pub fn record_success(&mut self, latency: Duration) {
        self.push_outcome(Outcome { ok: true, latency });
        match &mut self.state {
            State::Closed {
                consecutive_failures,
            } => *consecutive_failures = 0,
            State::HalfOpen {
                probe_started,
                successes,
            } => {
                *successes += 1;
                if *successes >= self.config.success_threshold {
                    self.state = State::Closed {
                        consecutive_failures: 0,
                    };
                } else {
                    *probe_started = None;
                }
            }
            State::Open { .. } => {}
        }
    }

    pub fn record_failure(&mut self, latency: Duration) {
        self.push_outcome(Outcome { ok: false, latency });
        match &mut self.state {
            State::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.config.failure_threshold {
                    self.state = State::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            State::HalfOpen { .. } => {
                self.state = State::Open {
                    opened_at: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }

    fn push_outcome(&mut self, outcome: Outcome) {
        if self.window.len() == self.config.window {
            self.window.pop_front();
        }
        self.window.push_back(outcome);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let recent_calls = self.window.len();
        let recent_failures = self.window.iter().filter(|o| !o.ok).count();
        let mean_latency = if recent_calls > 0 {
            let total: Duration = self.window.iter().map(|o| o.latency).sum();
            Some(total / recent_calls as u32)
        } else {
            None
        };
        BreakerSnapshot {
            state: self.state(),
            recent_failures,
            recent_calls,
            mean_latency,
        }
    }
}

/// Process-wide breaker map keyed by supplier id. Entries are created
/// lazily on first use; each entry is guarded by its own mutex so
/// read-modify-write transitions cannot race across concurrent flows.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<SupplierId, Mutex<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    fn with<T>(&self, supplier: &SupplierId, f: impl FnOnce(&mut CircuitBreaker) -> T) -> T {
        let entry = self
            .breakers
            .entry(supplier.clone())
            .or_insert_with(|| Mutex::new(CircuitBreaker::new(self.config.clone())));
        let mut breaker = entry.lock();
        f(&mut breaker)
    }

    pub fn try_acquire(&self, supplier: &SupplierId) -> Acquire {
        self.with(supplier, |b| b.try_acquire())
    }

    pub fn record(&self, supplier: &SupplierId, ok: bool, latency: Duration) {
        self.with(supplier, |b| {
            if ok {
                b.record_success(latency)
            } else {
                b.record_failure(latency)
            }
        })
    }

    /// Non-consuming peek: true only while the circuit is OPEN and still
    /// cooling down. Used by the aggregator to skip suppliers without
    /// stealing the half-open probe slot.
    pub fn is_open(&self, supplier: &SupplierId) -> bool {
        self.with(supplier, |b| match &b.state {
            State::Open { opened_at } => opened_at.elapsed() < b.config.cooldown,
            _ => false,
        })
    }

    pub fn snapshot(&self, supplier: &SupplierId) -> BreakerSnapshot {
        self.with(supplier, |b| b.snapshot())
    }
}
