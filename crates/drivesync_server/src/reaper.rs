//! Idle session reaper.

use crate::handler::HandlerContext;
use crate::registry::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Users whose idle session was ended.
    pub ended: Vec<String>,
    /// Users whose idle session was killed for missing state.
    pub killed: Vec<String>,
}

impl ReapReport {
    /// Total sessions torn down.
    pub fn total(&self) -> usize {
        self.ended.len() + self.killed.len()
    }
}

/// Ends sessions that saw no request for longer than the idle timeout.
pub struct SessionReaper {
    context: Arc<HandlerContext>,
    idle_timeout: Duration,
}

impl SessionReaper {
    /// Creates a reaper using the context's configured idle timeout.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        let idle_timeout = context.config.session_idle_timeout;
        Self {
            context,
            idle_timeout,
        }
    }

    /// Tears down every session idle as of `now`.
    pub fn sweep(&self, now: Instant) -> ReapReport {
        let registry = &self.context.registry;
        let mut report = ReapReport::default();

        for record in registry.idle_sessions(now, self.idle_timeout) {
            match registry.expire(&record.owner, &record.token, now, self.idle_timeout) {
                Some(Expiry::Ended) => report.ended.push(record.owner),
                Some(Expiry::Killed) => report.killed.push(record.owner),
                None => {}
            }
        }

        if report.total() > 0 {
            debug!(
                ended = report.ended.len(),
                killed = report.killed.len(),
                "reaped idle sessions"
            );
        }
        report
    }

    /// Runs [`SessionReaper::sweep`] every `interval` on the current tokio
    /// runtime until the task is aborted.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep(Instant::now());
            }
        })
    }
}
