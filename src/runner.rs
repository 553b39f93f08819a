use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{Config, RetryPolicy, Target};
use crate::error::Error;
use crate::session::{run_session, BulkChannel};

/// Finds the target and sets up a channel to it. `Ok(None)` means it is not plugged in.
pub trait Connector {
    type Channel: BulkChannel;

    fn connect(&mut self, target: &Target) -> Result<Option<Self::Channel>, Error>;
}

pub trait Pacer {
    fn pause(&mut self, duration: Duration);
}

const PAUSE_SLICE: Duration = Duration::from_millis(100);

/// Sleeps the calling thread, waking early once `running` is cleared.
pub struct ThreadPacer<'a> {
    running: &'a AtomicBool,
}

impl<'a> ThreadPacer<'a> {
    pub fn new(running: &'a AtomicBool) -> Self {
        ThreadPacer { running }
    }
}

impl Pacer for ThreadPacer<'_> {
    fn pause(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(PAUSE_SLICE));
        }
    }
}

/// Doubling retry delay, capped at the policy maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Backoff { policy, current: policy.initial, attempts: 0 }
    }

    /// Records a failed attempt and returns how long to wait before the next one,
    /// or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        let delay = self.current;
        self.current = (self.current * 2).min(self.policy.max);
        Some(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.current = self.policy.initial;
        self.attempts = 0;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sessions: u64,
    pub exchanges: u64,
}

/// Discovery loop. Returns when `running` is cleared, or with the first fatal error.
pub fn run<K, P, W>(
    connector: &mut K,
    config: &Config,
    pacer: &mut P,
    running: &AtomicBool,
    out: &mut W,
) -> Result<RunReport, Error>
where
    K: Connector,
    P: Pacer,
    W: Write,
{
    let target = &config.target;
    let mut backoff = Backoff::new(config.retry);
    let mut report = RunReport::default();

    while running.load(Ordering::Relaxed) {
        let failed = match connector.connect(target) {
            Ok(Some(mut channel)) => {
                info!("device {} connected", target);
                backoff.reset();
                report.sessions += 1;

                match run_session(&mut channel, &config.exchange, pacer, running, out) {
                    Ok(session) => {
                        report.exchanges += session.exchanges;
                        info!("session finished after {}", session);
                        continue;
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("session with {} aborted: {}", target, e);
                        true
                    }
                }
            }
            Ok(None) => false,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("cannot set up {}: {}", target, e);
                true
            }
        };

        if !running.load(Ordering::Relaxed) {
            break;
        }

        let delay = match backoff.next_delay() {
            Some(delay) => delay,
            None => {
                return Err(Error::GaveUp {
                    vendor_id: target.vendor_id,
                    product_id: target.product_id,
                    attempts: backoff.attempts(),
                })
            }
        };
        if !failed {
            if backoff.attempts() == 1 {
                info!("device {} not found, retrying in {:?}", target, delay);
            } else {
                debug!("device {} still not found (attempt {})", target, backoff.attempts());
            }
        }
        pacer.pause(delay);
    }

    Ok(report)
}
