// src/schedule.rs
// Interval task runner: per-task alignment, busy-flag reentrancy guards, and
// cooperative shutdown with drain.
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// When a task fires for the first time relative to scheduler start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPolicy {
    Immediate,
    /// Fixed stagger so tasks do not all hit external APIs at once.
    Offset(Duration),
    /// First tick at the next HH:00:00.
    NextHour,
    /// First tick at the next HH:MM:00.
    NextMinute,
    /// First tick at the next occurrence of `hour:minute` UTC, rolling to
    /// tomorrow when today's slot has already passed.
    AtTime { hour: u32, minute: u32 },
}

impl StartPolicy {
    pub fn initial_delay(&self, now: DateTime<Utc>) -> Duration {
        match *self {
            StartPolicy::Immediate => Duration::ZERO,
            StartPolicy::Offset(d) => d,
            StartPolicy::NextHour => delay_to_next_hour(now),
            StartPolicy::NextMinute => delay_to_next_minute(now),
            StartPolicy::AtTime { hour, minute } => delay_until_time(now, hour, minute),
        }
    }
}

/// Seconds until the next top of the hour. Exactly on the hour counts as
/// already passed and rolls a full hour; the result is never zero or
/// negative.
pub fn delay_to_next_hour(now: DateTime<Utc>) -> Duration {
    let into = u64::from(now.minute()) * 60 + u64::from(now.second());
    Duration::from_secs(3600 - into)
}

pub fn delay_to_next_minute(now: DateTime<Utc>) -> Duration {
    Duration::from_secs(60 - u64::from(now.second()))
}

/// Delay until `hour:minute:00` UTC today, or tomorrow when that moment has
/// already passed.
pub fn delay_until_time(now: DateTime<Utc>, hour: u32, minute: u32) -> Duration {
    let today = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .expect("valid target time")
        .and_utc();
    let target = if today <= now {
        today + chrono::Duration::days(1)
    } else {
        today
    };
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    pub name: &'static str,
    pub interval: Duration,
    pub start: StartPolicy,
}

impl TaskSpec {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            start: StartPolicy::Immediate,
        }
    }

    pub fn starting(mut self, start: StartPolicy) -> Self {
        self.start = start;
        self
    }
}

/// Owns every periodic task. One tokio task per schedule loop; each tick's
/// body is spawned separately so the loop keeps ticking (and skipping) while
/// a slow body runs. Failures and panics are contained at the body boundary.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    drain_tx: Option<mpsc::Sender<()>>,
    drain_rx: mpsc::Receiver<()>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
    busy: Vec<(&'static str, Arc<AtomicBool>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (drain_tx, drain_rx) = mpsc::channel(1);
        Self {
            shutdown_tx,
            drain_tx: Some(drain_tx),
            drain_rx,
            handles: Vec::new(),
            busy: Vec::new(),
        }
    }

    /// Register and start a task. `body` is invoked once per tick; a tick
    /// that fires while the previous body still runs is skipped outright.
    pub fn spawn<F, Fut>(&mut self, spec: TaskSpec, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let busy = Arc::new(AtomicBool::new(false));
        self.busy.push((spec.name, Arc::clone(&busy)));

        let mut shutdown = self.shutdown_tx.subscribe();
        let drain = self
            .drain_tx
            .clone()
            .expect("spawn called after shutdown");

        let handle = tokio::spawn(async move {
            let delay = spec.start.initial_delay(Utc::now());
            if delay > Duration::ZERO {
                tracing::debug!(task = spec.name, delay_secs = delay.as_secs(), "waiting for aligned start");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return,
                }
            }

            let mut ticker = tokio::time::interval(spec.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => return,
                }

                if busy.swap(true, Ordering::SeqCst) {
                    tracing::warn!(task = spec.name, "previous run still in progress, skipping tick");
                    continue;
                }

                let run = tokio::spawn(body());
                let busy = Arc::clone(&busy);
                let guard = drain.clone();
                tokio::spawn(async move {
                    match run.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::error!(task = spec.name, error = format!("{e:#}"), "task run failed")
                        }
                        Err(e) => {
                            tracing::error!(task = spec.name, error = %e, "task run panicked")
                        }
                    }
                    busy.store(false, Ordering::SeqCst);
                    drop(guard);
                });
            }
        });

        self.handles.push((spec.name, handle));
    }

    /// Busy state of a task, by name. Used by tests and diagnostics.
    pub fn is_busy(&self, name: &str) -> Option<bool> {
        self.busy
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, b)| b.load(Ordering::SeqCst))
    }

    /// Cooperative shutdown: stop every schedule loop between ticks, then
    /// wait for in-flight bodies to finish. Nothing is aborted mid-tick.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(task = name, error = %e, "schedule loop did not exit cleanly");
            }
        }
        // Each in-flight body holds a drain sender clone; recv returns None
        // once the last one is dropped.
        drop(self.drain_tx.take());
        while self.drain_rx.recv().await.is_some() {}
        tracing::info!("scheduler drained");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
