//! Progress reporting and cancellation for long-running passes

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};

/// Stage of a vocabulary build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Sampling,
    Clustering,
    WritingVocabulary,
    Encoding,
    Committing,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Sampling => "sampling",
            Phase::Clustering => "clustering",
            Phase::WritingVocabulary => "writing vocabulary",
            Phase::Encoding => "encoding",
            Phase::Committing => "committing",
        }
    }
}

/// Sink for progress updates
///
/// Called from a single reporter thread or from the driver thread, never
/// from encoding workers.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, phase: Phase, percent: u8);
}

/// Reporter that writes updates to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&self, phase: Phase, percent: u8) {
        log::info!("[{}] {}%", phase.name(), percent);
    }
}

/// Completed-document counter shared by every worker of a pass
#[derive(Debug)]
pub struct ProgressTracker {
    completed: AtomicUsize,
    total: usize,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
        }
    }

    #[inline]
    pub fn advance(&self, n: usize) {
        self.completed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn percent(&self) -> u8 {
        percent_of(self.completed(), self.total)
    }
}

pub(crate) fn percent_of(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}

/// Cooperative cancellation flag, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Error::Cancelled)` once cancelled
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Timer thread publishing a tracker's percentage until stopped
pub(crate) struct ReporterThread<'scope> {
    stop: &'scope AtomicBool,
    handle: ScopedJoinHandle<'scope, ()>,
}

impl<'scope> ReporterThread<'scope> {
    pub(crate) fn spawn<'env>(
        scope: &'scope Scope<'scope, 'env>,
        phase: Phase,
        tracker: &'scope ProgressTracker,
        reporter: &'scope dyn ProgressReporter,
        interval: Duration,
        stop: &'scope AtomicBool,
    ) -> Self {
        let handle = scope.spawn(move || {
            let mut last = None;
            loop {
                // Read the flag first so the last report sees every update
                let stopping = stop.load(Ordering::Acquire);
                let percent = tracker.percent();
                if last != Some(percent) {
                    reporter.report(phase, percent);
                    last = Some(percent);
                }
                if stopping {
                    break;
                }
                thread::park_timeout(interval);
            }
        });
        Self { stop, handle }
    }

    /// Stop the timer and wait for the thread to exit
    pub(crate) fn finish(self) {
        self.stop.store(true, Ordering::Release);
        self.handle.thread().unpark();
        if self.handle.join().is_err() {
            log::warn!("progress reporter thread panicked");
        }
    }
}
